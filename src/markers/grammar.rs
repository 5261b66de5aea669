//! Command call grammar.
//!
//! ```text
//! call  := NAME '(' args ')'
//! args  := ε | arg (',' arg)*
//! arg   := quoted | bare
//! ```
//!
//! `NAME` is matched case-insensitively as a whole word, with `(` immediately
//! after it. Inside the parentheses, quote state (`"` or `'`), backslash
//! escapes and nesting depth are tracked, so `)` and `,` inside quotes or
//! nested parentheses never end the call or split an argument. A quote only
//! opens a quoted section at the start of an argument; apostrophes inside
//! bare words (`d'água`) are literal.

use super::CommandKind;
use regex::Regex;
use std::sync::OnceLock;
use tracing::error;

/// A call located in the source text. All offsets are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct CallSpan {
    pub kind: CommandKind,
    /// Start of the name.
    pub start: usize,
    /// One past the closing `)`.
    pub end: usize,
    /// Inner argument text, between the parentheses.
    pub args_start: usize,
    pub args_end: usize,
}

fn name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        // Longest names first so `agendar2(` never resolves as `agendar`.
        let mut names: Vec<&str> = CommandKind::ALL.iter().map(|k| k.wire_name()).collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        let pattern = format!(r"(?i)\b({})\(", names.join("|"));
        match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                error!("command name pattern failed to compile: {e}");
                None
            }
        }
    })
    .as_ref()
}

/// Find every well-formed, non-overlapping call, left to right.
pub(super) fn scan_calls(text: &str) -> Vec<CallSpan> {
    let Some(re) = name_regex() else {
        return Vec::new();
    };
    let mut calls = Vec::new();
    let mut pos = 0;

    while let Some(caps) = re.captures_at(text, pos) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let Some(kind) = CommandKind::from_name(name.as_str()) else {
            pos = whole.end();
            continue;
        };
        let open = whole.end() - 1;
        match find_closing_paren(text, open) {
            Some(close) => {
                calls.push(CallSpan {
                    kind,
                    start: whole.start(),
                    end: close + 1,
                    args_start: open + 1,
                    args_end: close,
                });
                pos = close + 1;
            }
            // Unterminated: leave it in the text, keep looking after the name.
            None => pos = whole.end(),
        }
    }
    calls
}

/// Tracks quote and escape state while walking argument text.
#[derive(Default)]
struct Lexer {
    quote: Option<char>,
    escaped: bool,
    /// True while only whitespace has been seen since the last `(` or `,`.
    at_arg_start: bool,
}

enum Step {
    /// Character is inside a quote or escape sequence.
    Literal,
    /// Character is structural (outside quotes, not escaped).
    Structural,
}

impl Lexer {
    fn new() -> Self {
        Self {
            at_arg_start: true,
            ..Default::default()
        }
    }

    fn step(&mut self, c: char) -> Step {
        if self.escaped {
            self.escaped = false;
            return Step::Literal;
        }
        if c == '\\' {
            self.escaped = true;
            self.at_arg_start = false;
            return Step::Literal;
        }
        if let Some(q) = self.quote {
            if c == q {
                self.quote = None;
            }
            return Step::Literal;
        }
        if (c == '"' || c == '\'') && self.at_arg_start {
            self.quote = Some(c);
            self.at_arg_start = false;
            return Step::Literal;
        }
        match c {
            '(' | ',' => self.at_arg_start = true,
            c if c.is_whitespace() => {}
            _ => self.at_arg_start = false,
        }
        Step::Structural
    }
}

/// Index of the `)` that balances the `(` at `open`, or `None` if unterminated.
fn find_closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut lexer = Lexer::new();
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        if i == 0 {
            // The opening paren itself.
            depth = 1;
            continue;
        }
        if let Step::Structural = lexer.step(c) {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + i);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Split inner call text on top-level commas and clean each argument.
///
/// `""` and whitespace-only input yield no arguments.
pub fn split_args(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }

    let mut lexer = Lexer::new();
    let mut depth = 0usize;
    let mut raw_args = Vec::new();
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if let Step::Structural = lexer.step(c) {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    raw_args.push(&inner[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
    }
    raw_args.push(&inner[start..]);

    raw_args.into_iter().map(clean_arg).collect()
}

/// Strip surrounding matching quotes, unescape, trim.
fn clean_arg(raw: &str) -> String {
    let raw = raw.trim();
    let body = strip_quotes(raw).unwrap_or(raw);
    unescape(body).trim().to_string()
}

fn strip_quotes(raw: &str) -> Option<&str> {
    let first = raw.chars().next()?;
    if first != '"' && first != '\'' {
        return None;
    }
    let inner = raw.strip_prefix(first)?.strip_suffix(first)?;
    // The closing quote must not itself be escaped.
    let trailing_backslashes = inner.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_backslashes % 2 == 1 {
        return None;
    }
    Some(inner)
}

/// Resolve `\n`, `\r`, `\t`, `\\`, `\"`, `\'`; any other `\x` becomes `x`.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            // Lone trailing backslash is kept.
            None => out.push('\\'),
        }
    }
    out
}

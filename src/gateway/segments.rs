//! Response assembly: pick the visible text and split it into typed delivery segments.

use std::path::{Component, Path};
use zapflow_core::{config::ResponseConfig, message::DeliverySegment};

/// Text shown to the contact, or `None` when nothing visible survives.
///
/// Preference: cleaned model text, then command notes, then the configured
/// fallback. Everything from the first instructions separator on is dropped.
pub fn visible_text(cleaned: &str, notes: &[String], cfg: &ResponseConfig) -> Option<String> {
    let sep = cfg.instructions_separator.as_str();
    let candidates = [
        cut_at(cleaned, sep).trim().to_string(),
        cut_at(&notes.join("\n"), sep).trim().to_string(),
        cut_at(&cfg.fallback_text, sep).trim().to_string(),
    ];
    candidates.into_iter().find(|c| !c.is_empty())
}

fn cut_at<'a>(text: &'a str, separator: &str) -> &'a str {
    if separator.is_empty() {
        return text;
    }
    match text.find(separator) {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Split on `delimiter`, trim, drop empties, classify each piece.
pub fn split_segments(text: &str, delimiter: char) -> Vec<DeliverySegment> {
    text.split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(classify)
        .collect()
}

enum Directive {
    Image,
    Audio,
    Video,
    Contact,
}

const DIRECTIVES: [(&str, Directive); 4] = [
    ("img:", Directive::Image),
    ("audio:", Directive::Audio),
    ("video:", Directive::Video),
    ("contact:", Directive::Contact),
];

/// Classify one trimmed segment. Malformed directives stay text.
pub fn classify(raw: &str) -> DeliverySegment {
    let text = || DeliverySegment::Text {
        raw: raw.to_string(),
    };

    let Some((directive, payload)) = DIRECTIVES.iter().find_map(|(prefix, d)| {
        raw.get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| (d, raw[prefix.len()..].trim()))
    }) else {
        return text();
    };

    match directive {
        Directive::Contact => contact_card(payload).unwrap_or_else(text),
        media => {
            let (url, caption) = match payload.split_once('|') {
                Some((url, caption)) => (url.trim(), non_empty(caption)),
                None => (payload, None),
            };
            if !is_deliverable_url(url) {
                return text();
            }
            let url = url.to_string();
            match media {
                Directive::Image => DeliverySegment::Image { url, caption },
                Directive::Audio => DeliverySegment::Audio { url, caption },
                _ => DeliverySegment::Video { url, caption },
            }
        }
    }
}

fn contact_card(payload: &str) -> Option<DeliverySegment> {
    let mut parts = payload.splitn(3, '|');
    let phone: String = parts
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    if phone.len() < 8 {
        return None;
    }
    Some(DeliverySegment::Contact {
        phone,
        display_name: parts.next().and_then(non_empty),
        note: parts.next().and_then(non_empty),
    })
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// http(s) URL, or a relative path that stays inside the asset root.
pub fn is_deliverable_url(url: &str) -> bool {
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return lower
            .split_once("://")
            .is_some_and(|(_, rest)| !rest.is_empty());
    }
    if url.contains("://") || url.starts_with('\\') || url.contains(':') {
        return false;
    }
    is_confined_path(url)
}

/// Relative path with no root, prefix, or parent components.
pub fn is_confined_path(path: &str) -> bool {
    let mut saw_file = false;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => saw_file = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    saw_file
}

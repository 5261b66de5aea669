//! Inline command extraction from model output.
//!
//! Models embed function-call-like directives (`agendar("2024-01-05", ...)`)
//! in their replies. This module finds them, parses their arguments, and
//! returns the text that remains for the contact.
//!
//! - `grammar`: name scan, balanced-paren scanner, argument splitting, unescaping

mod grammar;

use grammar::split_args;

use crate::executor::CommandResult;
use serde::{Deserialize, Serialize};

/// Every command the engine understands. Serialized as its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "agendar")]
    ScheduleAt,
    #[serde(rename = "agendar2")]
    ScheduleIn,
    #[serde(rename = "reagendar")]
    ResetCadence,
    #[serde(rename = "listarAgendamentos")]
    ListSchedules,
    #[serde(rename = "apagarAgendamento")]
    DeleteSchedule,
    #[serde(rename = "apagarAgendamentosTag")]
    DeleteSchedulesByTag,
    #[serde(rename = "apagarAgendamentosCategoria")]
    DeleteSchedulesByCategory,
    #[serde(rename = "cancelarAgendamentos")]
    CancelSchedules,
    #[serde(rename = "setContexto")]
    SetContext,
    #[serde(rename = "getContexto")]
    GetContext,
    #[serde(rename = "limparContexto")]
    ClearContext,
    #[serde(rename = "listarContexto")]
    ListContext,
    #[serde(rename = "setVariavel")]
    SetVariable,
    #[serde(rename = "getVariavel")]
    GetVariable,
    #[serde(rename = "setNome")]
    SetContactName,
    #[serde(rename = "addTag")]
    AddContactTag,
    #[serde(rename = "removerTag")]
    RemoveContactTag,
    #[serde(rename = "optout")]
    OptOut,
    #[serde(rename = "registrarEvento")]
    LogEvent,
    #[serde(rename = "enviarEmail")]
    SendMail,
    #[serde(rename = "whatsapp")]
    SendMessage,
    #[serde(rename = "lerUrl")]
    FetchUrl,
    #[serde(rename = "verificarDisponibilidade")]
    CalendarAvailability,
    #[serde(rename = "sugerirHorarios")]
    CalendarSuggest,
    #[serde(rename = "marcarEvento")]
    CalendarBook,
    #[serde(rename = "remarcarEvento")]
    CalendarReschedule,
    #[serde(rename = "cancelarEvento")]
    CalendarCancel,
    #[serde(rename = "listarEventos")]
    CalendarList,
    #[serde(rename = "boomerang")]
    SelfTrigger,
}

impl CommandKind {
    pub const ALL: [CommandKind; 29] = [
        Self::ScheduleAt,
        Self::ScheduleIn,
        Self::ResetCadence,
        Self::ListSchedules,
        Self::DeleteSchedule,
        Self::DeleteSchedulesByTag,
        Self::DeleteSchedulesByCategory,
        Self::CancelSchedules,
        Self::SetContext,
        Self::GetContext,
        Self::ClearContext,
        Self::ListContext,
        Self::SetVariable,
        Self::GetVariable,
        Self::SetContactName,
        Self::AddContactTag,
        Self::RemoveContactTag,
        Self::OptOut,
        Self::LogEvent,
        Self::SendMail,
        Self::SendMessage,
        Self::FetchUrl,
        Self::CalendarAvailability,
        Self::CalendarSuggest,
        Self::CalendarBook,
        Self::CalendarReschedule,
        Self::CalendarCancel,
        Self::CalendarList,
        Self::SelfTrigger,
    ];

    /// The name the model writes.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ScheduleAt => "agendar",
            Self::ScheduleIn => "agendar2",
            Self::ResetCadence => "reagendar",
            Self::ListSchedules => "listarAgendamentos",
            Self::DeleteSchedule => "apagarAgendamento",
            Self::DeleteSchedulesByTag => "apagarAgendamentosTag",
            Self::DeleteSchedulesByCategory => "apagarAgendamentosCategoria",
            Self::CancelSchedules => "cancelarAgendamentos",
            Self::SetContext => "setContexto",
            Self::GetContext => "getContexto",
            Self::ClearContext => "limparContexto",
            Self::ListContext => "listarContexto",
            Self::SetVariable => "setVariavel",
            Self::GetVariable => "getVariavel",
            Self::SetContactName => "setNome",
            Self::AddContactTag => "addTag",
            Self::RemoveContactTag => "removerTag",
            Self::OptOut => "optout",
            Self::LogEvent => "registrarEvento",
            Self::SendMail => "enviarEmail",
            Self::SendMessage => "whatsapp",
            Self::FetchUrl => "lerUrl",
            Self::CalendarAvailability => "verificarDisponibilidade",
            Self::CalendarSuggest => "sugerirHorarios",
            Self::CalendarBook => "marcarEvento",
            Self::CalendarReschedule => "remarcarEvento",
            Self::CalendarCancel => "cancelarEvento",
            Self::CalendarList => "listarEventos",
            Self::SelfTrigger => "boomerang",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.wire_name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One recognized call in a model response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub kind: CommandKind,
    /// Unescaped, trimmed arguments.
    pub args: Vec<String>,
    /// Byte range of the whole call (`name(` through `)`) in the source text.
    pub span: (usize, usize),
    /// Filled in exactly once by the executor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
}

impl Command {
    pub fn new(kind: CommandKind, args: Vec<String>, span: (usize, usize)) -> Self {
        Self {
            kind,
            args,
            span,
            result: None,
        }
    }
}

/// Result of [`extract`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extraction {
    pub commands: Vec<Command>,
    pub cleaned_text: String,
}

/// Extract every well-formed call, left to right, and strip them from the text.
///
/// Calls are non-overlapping: a call nested inside the arguments of another
/// is part of the outer call's arguments. Unterminated calls stay in the text.
pub fn extract(text: &str) -> Extraction {
    let calls = grammar::scan_calls(text);
    if calls.is_empty() {
        return Extraction {
            commands: Vec::new(),
            cleaned_text: text.trim().to_string(),
        };
    }

    let mut commands = Vec::with_capacity(calls.len());
    let mut kept = String::with_capacity(text.len());
    let mut cursor = 0;
    for call in calls {
        kept.push_str(&text[cursor..call.start]);
        cursor = call.end;
        commands.push(Command::new(
            call.kind,
            split_args(&text[call.args_start..call.args_end]),
            (call.start, call.end),
        ));
    }
    kept.push_str(&text[cursor..]);

    Extraction {
        commands,
        cleaned_text: normalize_whitespace(&kept),
    }
}

/// Collapse runs of 2+ spaces to one and runs of 3+ newlines to two, then trim.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut spaces = 0usize;
    let mut newlines = 0usize;
    for c in text.chars() {
        match c {
            ' ' => {
                spaces += 1;
                if spaces == 1 {
                    out.push(c);
                }
            }
            '\n' => {
                spaces = 0;
                newlines += 1;
                if newlines <= 2 {
                    out.push(c);
                }
            }
            _ => {
                spaces = 0;
                newlines = 0;
                out.push(c);
            }
        }
    }
    out.trim().to_string()
}

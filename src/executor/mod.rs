//! Command executor: runs extracted commands against the collaborators.
//!
//! Commands run sequentially in source order. Every command gets exactly one
//! [`CommandResult`]; a failing handler never affects the next command.
//!
//! Handlers are split by concern:
//! - `schedule`: scheduled-message commands
//! - `state`: context, variables, contact metadata, event log
//! - `messaging`: mail, outbound messages, URL fetch, self-trigger
//! - `calendar`: availability, suggestions, bookings

mod calendar;
mod messaging;
mod schedule;
mod state;

use crate::gateway::RecentOutgoing;
use crate::markers::{Command, CommandKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use zapflow_core::{
    config::{CalendarConfig, Config},
    error::ZapError,
    traits::{Calendar, Mailer, SchedulerStore, StateStore, Transport, WebFetcher},
};

/// Result codes reported in [`CommandResult::code`].
pub mod code {
    pub const OK: &str = "OK";
    pub const ERR_MISSING_ARG: &str = "ERR_MISSING_ARG";
    pub const ERR_INVALID_ARG: &str = "ERR_INVALID_ARG";
    pub const ERR_NOT_CONNECTED: &str = "ERR_NOT_CONNECTED";
    pub const ERR_OPTED_OUT: &str = "ERR_OPTED_OUT";
    pub const ERR_NOT_FOUND: &str = "ERR_NOT_FOUND";
    pub const ERR_EXECUTION: &str = "ERR_EXECUTION";
}

/// Machine-readable outcome of one command. Never shown to the contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            code: code::OK.to_string(),
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn fail(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: code.to_string(),
            message: message.into(),
            data: Map::new(),
        }
    }

    /// Attach a data field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Whether `boomerang()` may start a nested run. Nested runs get `false`.
    pub allow_self_trigger: bool,
    /// Conversation is a group: schedules get group scope and opt-out is not checked.
    pub is_group: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_self_trigger: true,
            is_group: false,
        }
    }
}

impl SessionConfig {
    /// Session for a run started by `boomerang()`.
    pub fn nested(&self) -> Self {
        Self {
            allow_self_trigger: false,
            ..*self
        }
    }
}

/// What [`Executor::execute`] hands back to the pipeline.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Human-readable notes, shown only when the model wrote no visible text.
    pub notes: Vec<String>,
    /// The input commands, each with its result filled in.
    pub commands: Vec<Command>,
    /// A `boomerang()` asked for a nested run.
    pub self_trigger: bool,
}

/// Settings the handlers read from configuration.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub mail_from: String,
    pub fetch_max_chars: usize,
    pub boomerang_note: String,
    pub calendar: CalendarConfig,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            mail_from: cfg.mail.from.clone(),
            fetch_max_chars: cfg.response.fetch_max_chars,
            boomerang_note: cfg.response.boomerang_note.clone(),
            calendar: cfg.calendar.clone(),
        }
    }
}

/// Handler output before it is attached to its command.
pub(crate) struct Handled {
    result: CommandResult,
    note: Option<String>,
    self_trigger: bool,
}

impl From<CommandResult> for Handled {
    fn from(result: CommandResult) -> Self {
        Self {
            result,
            note: None,
            self_trigger: false,
        }
    }
}

impl Handled {
    fn with_note(result: CommandResult, note: String) -> Self {
        Self {
            result,
            note: Some(note),
            self_trigger: false,
        }
    }
}

/// Why a handler did not succeed.
pub(crate) enum Failure {
    /// Validation or precondition failure with a specific code.
    Rejected { code: &'static str, message: String },
    /// A collaborator returned an error.
    Collaborator(ZapError),
}

impl From<ZapError> for Failure {
    fn from(e: ZapError) -> Self {
        Self::Collaborator(e)
    }
}

impl Failure {
    fn missing(name: &str) -> Self {
        Self::Rejected {
            code: code::ERR_MISSING_ARG,
            message: format!("missing argument: {name}"),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code::ERR_INVALID_ARG,
            message: message.into(),
        }
    }

    fn not_connected(what: &str) -> Self {
        Self::Rejected {
            code: code::ERR_NOT_CONNECTED,
            message: format!("{what} is not connected"),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code::ERR_NOT_FOUND,
            message: message.into(),
        }
    }

    fn into_result(self, kind: CommandKind) -> CommandResult {
        match self {
            Self::Rejected { code, message } => CommandResult::fail(code, message),
            Self::Collaborator(e) => {
                warn!("command {kind} failed: {e}");
                CommandResult::fail(code::ERR_EXECUTION, e.to_string())
            }
        }
    }
}

pub(crate) type HandlerResult = Result<Handled, Failure>;

/// Who the current batch of commands runs for.
pub(crate) struct Invocation<'a> {
    pub conversation_id: &'a str,
    pub session: &'a SessionConfig,
}

/// Required argument at `idx`, non-empty after trimming.
pub(crate) fn required<'a>(args: &'a [String], idx: usize, name: &str) -> Result<&'a str, Failure> {
    optional(args, idx).ok_or_else(|| Failure::missing(name))
}

/// Optional argument at `idx`; blank counts as absent.
pub(crate) fn optional(args: &[String], idx: usize) -> Option<&str> {
    args.get(idx).map(|a| a.trim()).filter(|a| !a.is_empty())
}

/// Executes commands against the configured collaborators.
pub struct Executor {
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) jobs: Arc<dyn SchedulerStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) calendar: Option<Arc<dyn Calendar>>,
    pub(crate) mailer: Option<Arc<dyn Mailer>>,
    pub(crate) fetcher: Option<Arc<dyn WebFetcher>>,
    pub(crate) outgoing: Arc<RecentOutgoing>,
    pub(crate) settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        state: Arc<dyn StateStore>,
        jobs: Arc<dyn SchedulerStore>,
        transport: Arc<dyn Transport>,
        outgoing: Arc<RecentOutgoing>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            state,
            jobs,
            transport,
            calendar: None,
            mailer: None,
            fetcher: None,
            outgoing,
            settings,
        }
    }

    #[allow(dead_code)]
    pub fn with_calendar(mut self, calendar: Arc<dyn Calendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    #[allow(dead_code)]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn WebFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Run `commands` in order, filling in each result.
    pub async fn execute(
        &self,
        conversation_id: &str,
        commands: Vec<Command>,
        session: &SessionConfig,
    ) -> ExecutionReport {
        let inv = Invocation {
            conversation_id,
            session,
        };
        let mut report = ExecutionReport {
            commands: Vec::with_capacity(commands.len()),
            ..Default::default()
        };

        for mut cmd in commands {
            let handled = match self.dispatch(&inv, cmd.kind, &cmd.args).await {
                Ok(h) => h,
                Err(f) => f.into_result(cmd.kind).into(),
            };
            debug!(
                "command {} for {conversation_id}: {} {}",
                cmd.kind, handled.result.code, handled.result.message
            );
            if let Some(note) = handled.note {
                report.notes.push(note);
            }
            report.self_trigger |= handled.self_trigger;
            cmd.result = Some(handled.result);
            report.commands.push(cmd);
        }
        report
    }

    async fn dispatch(&self, inv: &Invocation<'_>, kind: CommandKind, args: &[String]) -> HandlerResult {
        use CommandKind::*;
        match kind {
            ScheduleAt => self.schedule_at(inv, args).await,
            ScheduleIn => self.schedule_in(inv, args).await,
            ResetCadence => self.reset_cadence(inv, args).await,
            ListSchedules => self.list_schedules(inv, args).await,
            DeleteSchedule => self.delete_schedule(inv, args).await,
            DeleteSchedulesByTag => self.delete_schedules_by_tag(inv, args).await,
            DeleteSchedulesByCategory => self.delete_schedules_by_category(inv, args).await,
            CancelSchedules => self.cancel_schedules(inv, args).await,
            SetContext => self.set_context(inv, args).await,
            GetContext => self.get_context(inv, args).await,
            ClearContext => self.clear_context(inv, args).await,
            ListContext => self.list_context(inv, args).await,
            SetVariable => self.set_variable(inv, args).await,
            GetVariable => self.get_variable(inv, args).await,
            SetContactName => self.set_contact_name(inv, args).await,
            AddContactTag => self.add_contact_tag(inv, args).await,
            RemoveContactTag => self.remove_contact_tag(inv, args).await,
            OptOut => self.opt_out(inv, args).await,
            LogEvent => self.log_event(inv, args).await,
            SendMail => self.send_mail(inv, args).await,
            SendMessage => self.send_message(inv, args).await,
            FetchUrl => self.fetch_url(inv, args).await,
            CalendarAvailability => self.calendar_availability(inv, args).await,
            CalendarSuggest => self.calendar_suggest(inv, args).await,
            CalendarBook => self.calendar_book(inv, args).await,
            CalendarReschedule => self.calendar_reschedule(inv, args).await,
            CalendarCancel => self.calendar_cancel(inv, args).await,
            CalendarList => self.calendar_list(inv, args).await,
            SelfTrigger => self.self_trigger(inv, args).await,
        }
    }
}

#[cfg(test)]
mod tests;

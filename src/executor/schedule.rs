//! Scheduled-message commands.

use super::{code, optional, required, CommandResult, Executor, Failure, HandlerResult, Invocation};
use chrono::NaiveDateTime;
use serde_json::json;
use tracing::info;
use zapflow_core::{
    clock::{format_wall, now_wall, parse_date, parse_offset, parse_time},
    records::{JobScope, NewJob},
};

/// Cause recorded on jobs replaced by a cadence reset.
pub(crate) const CADENCE_RESET_CAUSE: &str = "cadence reset";

/// Cause recorded on jobs cancelled without an explicit reason.
const DEFAULT_CANCEL_CAUSE: &str = "cancelled";

impl Executor {
    /// Reject scheduling for contacts that opted out. Groups have no opt-out.
    pub(crate) async fn ensure_reachable(&self, inv: &Invocation<'_>) -> Result<(), Failure> {
        if inv.session.is_group {
            return Ok(());
        }
        let opted_out = self
            .state
            .get_contact(inv.conversation_id)
            .await?
            .is_some_and(|c| c.opted_out);
        if opted_out {
            return Err(Failure::Rejected {
                code: code::ERR_OPTED_OUT,
                message: "contact opted out of messages".to_string(),
            });
        }
        Ok(())
    }

    fn scope_of(inv: &Invocation<'_>) -> JobScope {
        if inv.session.is_group {
            JobScope::Group
        } else {
            JobScope::Individual
        }
    }

    fn new_job(
        inv: &Invocation<'_>,
        message: &str,
        at: NaiveDateTime,
        tag: Option<&str>,
        category: Option<&str>,
    ) -> NewJob {
        if inv.session.is_group {
            NewJob::group(inv.conversation_id, message, at, tag, category)
        } else {
            NewJob::individual(inv.conversation_id, message, at, tag, category)
        }
    }

    async fn enqueue(&self, inv: &Invocation<'_>, job: NewJob) -> HandlerResult {
        self.ensure_reachable(inv).await?;
        let id = self.jobs.enqueue_job(&job).await?;
        let scheduled_at = format_wall(&job.scheduled_at);
        info!(
            "scheduled {id} for {} at {scheduled_at} [{}:{}]",
            job.target, job.tag, job.category
        );
        Ok(CommandResult::ok(format!("scheduled for {scheduled_at}"))
            .with("id", id)
            .with("scheduled_at", scheduled_at)
            .with("tag", job.tag)
            .with("category", job.category)
            .into())
    }

    /// `agendar(date, time, message, tag?, category?)`
    pub(crate) async fn schedule_at(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let date = required(args, 0, "date")?;
        let time = required(args, 1, "time")?;
        let message = required(args, 2, "message")?;

        let date = parse_date(date).ok_or_else(|| Failure::invalid(format!("invalid date: {date}")))?;
        let time = parse_time(time).ok_or_else(|| Failure::invalid(format!("invalid time: {time}")))?;
        let at = date.and_time(time);
        if at <= now_wall() {
            return Err(Failure::invalid(format!(
                "scheduled time is in the past: {}",
                format_wall(&at)
            )));
        }

        let job = Self::new_job(inv, message, at, optional(args, 3), optional(args, 4));
        self.enqueue(inv, job).await
    }

    /// `agendar2(offset, message, tag?, category?)`
    pub(crate) async fn schedule_in(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let offset = required(args, 0, "offset")?;
        let message = required(args, 1, "message")?;
        let delta =
            parse_offset(offset).ok_or_else(|| Failure::invalid(format!("invalid offset: {offset}")))?;

        let job = Self::new_job(
            inv,
            message,
            now_wall() + delta,
            optional(args, 2),
            optional(args, 3),
        );
        self.enqueue(inv, job).await
    }

    /// `reagendar(offset, message, tag?, category?)`: cancel every pending job of
    /// the conversation and schedule this one, atomically.
    pub(crate) async fn reset_cadence(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let offset = required(args, 0, "offset")?;
        let message = required(args, 1, "message")?;
        let delta =
            parse_offset(offset).ok_or_else(|| Failure::invalid(format!("invalid offset: {offset}")))?;
        self.ensure_reachable(inv).await?;

        let job = Self::new_job(
            inv,
            message,
            now_wall() + delta,
            optional(args, 2),
            optional(args, 3),
        );
        let (cancelled, id) = self.jobs.reset_cadence(&job, CADENCE_RESET_CAUSE).await?;
        let scheduled_at = format_wall(&job.scheduled_at);
        info!(
            "cadence reset for {}: {cancelled} cancelled, {id} at {scheduled_at}",
            job.target
        );
        Ok(
            CommandResult::ok(format!("{cancelled} cancelled, next at {scheduled_at}"))
                .with("cancelled", cancelled)
                .with("id", id)
                .with("scheduled_at", scheduled_at)
                .into(),
        )
    }

    /// `listarAgendamentos(tag?)`
    pub(crate) async fn list_schedules(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let jobs = self
            .jobs
            .pending_jobs_for(inv.conversation_id, optional(args, 0))
            .await?;
        let listed: Vec<_> = jobs
            .iter()
            .map(|j| {
                json!({
                    "id": j.id,
                    "scheduled_at": j.scheduled_at,
                    "message": j.message,
                    "tag": j.tag,
                    "category": j.category,
                })
            })
            .collect();
        Ok(CommandResult::ok(format!("{} pending", listed.len()))
            .with("jobs", listed)
            .into())
    }

    /// `apagarAgendamento(id)`
    pub(crate) async fn delete_schedule(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let id = required(args, 0, "id")?;
        if !self.jobs.delete_job(inv.conversation_id, id).await? {
            return Err(Failure::not_found(format!("schedule not found: {id}")));
        }
        Ok(CommandResult::ok("deleted").with("deleted", 1).into())
    }

    /// `apagarAgendamentosTag(tag)`
    pub(crate) async fn delete_schedules_by_tag(
        &self,
        inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let tag = required(args, 0, "tag")?;
        let deleted = self.jobs.delete_jobs_by_tag(inv.conversation_id, tag).await?;
        Ok(CommandResult::ok(format!("{deleted} deleted"))
            .with("deleted", deleted)
            .into())
    }

    /// `apagarAgendamentosCategoria(category)`
    pub(crate) async fn delete_schedules_by_category(
        &self,
        inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let category = required(args, 0, "category")?;
        let deleted = self
            .jobs
            .delete_jobs_by_category(inv.conversation_id, category)
            .await?;
        Ok(CommandResult::ok(format!("{deleted} deleted"))
            .with("deleted", deleted)
            .into())
    }

    /// `cancelarAgendamentos(cause?)`
    pub(crate) async fn cancel_schedules(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let cause = optional(args, 0).unwrap_or(DEFAULT_CANCEL_CAUSE);
        let cancelled = self
            .jobs
            .cancel_pending_for(Self::scope_of(inv), inv.conversation_id, cause)
            .await?;
        Ok(CommandResult::ok(format!("{cancelled} cancelled"))
            .with("cancelled", cancelled)
            .into())
    }
}

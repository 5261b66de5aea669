//! Context, variable, contact, and event-log commands.

use super::{optional, required, CommandResult, Executor, HandlerResult, Invocation};
use serde_json::{Map, Value};
use tracing::info;
use zapflow_core::records::{ContactRecord, JobScope};

const OPT_OUT_CAUSE: &str = "opt-out";

impl Executor {
    async fn load_contact(&self, conversation_id: &str) -> Result<ContactRecord, super::Failure> {
        Ok(self
            .state
            .get_contact(conversation_id)
            .await?
            .unwrap_or_else(|| ContactRecord::new(conversation_id)))
    }

    pub(crate) async fn set_context(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let key = required(args, 0, "key")?;
        let value = required(args, 1, "value")?;
        self.state
            .set_context(inv.conversation_id, key, value)
            .await?;
        Ok(CommandResult::ok(format!("{key} set"))
            .with("key", key)
            .with("value", value)
            .into())
    }

    /// A missing key is not an error: `data.value` is null.
    pub(crate) async fn get_context(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let key = required(args, 0, "key")?;
        let value = self.state.get_context(inv.conversation_id, key).await?;
        let message = if value.is_some() { "found" } else { "not set" };
        Ok(CommandResult::ok(message)
            .with("key", key)
            .with("value", value.map_or(Value::Null, Value::String))
            .into())
    }

    /// `limparContexto(key?)`: one key, or every key of the conversation.
    pub(crate) async fn clear_context(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let removed = match optional(args, 0) {
            Some(key) => u64::from(self.state.delete_context(inv.conversation_id, key).await?),
            None => self.state.clear_context(inv.conversation_id).await?,
        };
        Ok(CommandResult::ok(format!("{removed} removed"))
            .with("removed", removed)
            .into())
    }

    pub(crate) async fn list_context(&self, inv: &Invocation<'_>, _args: &[String]) -> HandlerResult {
        let entries = self.state.list_context(inv.conversation_id).await?;
        let count = entries.len();
        let values: Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Ok(CommandResult::ok(format!("{count} keys"))
            .with("values", values)
            .into())
    }

    pub(crate) async fn set_variable(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let name = required(args, 0, "name")?;
        let value = required(args, 1, "value")?;
        self.state.set_variable(name, value).await?;
        Ok(CommandResult::ok(format!("{name} set"))
            .with("name", name)
            .with("value", value)
            .into())
    }

    pub(crate) async fn get_variable(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let name = required(args, 0, "name")?;
        let value = self.state.get_variable(name).await?;
        let message = if value.is_some() { "found" } else { "not set" };
        Ok(CommandResult::ok(message)
            .with("name", name)
            .with("value", value.map_or(Value::Null, Value::String))
            .into())
    }

    pub(crate) async fn set_contact_name(
        &self,
        inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let name = required(args, 0, "name")?;
        let mut contact = self.load_contact(inv.conversation_id).await?;
        contact.display_name = Some(name.to_string());
        self.state.upsert_contact(&contact).await?;
        Ok(CommandResult::ok("name set").with("name", name).into())
    }

    pub(crate) async fn add_contact_tag(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let tag = required(args, 0, "tag")?;
        let mut contact = self.load_contact(inv.conversation_id).await?;
        let added = !contact.tags.iter().any(|t| t.eq_ignore_ascii_case(tag));
        if added {
            contact.tags.push(tag.to_string());
            self.state.upsert_contact(&contact).await?;
        }
        Ok(CommandResult::ok(if added { "tag added" } else { "tag already present" })
            .with("added", added)
            .with("tags", contact.tags)
            .into())
    }

    pub(crate) async fn remove_contact_tag(
        &self,
        inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let tag = required(args, 0, "tag")?;
        let mut contact = self.load_contact(inv.conversation_id).await?;
        let before = contact.tags.len();
        contact.tags.retain(|t| !t.eq_ignore_ascii_case(tag));
        let removed = contact.tags.len() != before;
        if removed {
            self.state.upsert_contact(&contact).await?;
        }
        Ok(CommandResult::ok(if removed { "tag removed" } else { "tag not present" })
            .with("removed", removed)
            .with("tags", contact.tags)
            .into())
    }

    /// `optout(reason?)`: flag the contact and cancel its pending schedules.
    pub(crate) async fn opt_out(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let reason = optional(args, 0);
        let mut contact = self.load_contact(inv.conversation_id).await?;
        contact.opted_out = true;
        self.state.upsert_contact(&contact).await?;

        let cancelled = self
            .jobs
            .cancel_pending_for(JobScope::Individual, inv.conversation_id, OPT_OUT_CAUSE)
            .await?;
        self.state
            .log_event(inv.conversation_id, "optout", reason)
            .await?;
        info!(
            "{} opted out ({cancelled} schedules cancelled)",
            inv.conversation_id
        );
        Ok(CommandResult::ok("opted out")
            .with("cancelled", cancelled)
            .into())
    }

    /// `registrarEvento(name, details?)`
    pub(crate) async fn log_event(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let name = required(args, 0, "name")?;
        let details = optional(args, 1);
        self.state
            .log_event(inv.conversation_id, name, details)
            .await?;
        Ok(CommandResult::ok("event logged").with("name", name).into())
    }
}

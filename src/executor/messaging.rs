//! Outbound side-effect commands: mail, direct messages, URL fetch, self-trigger.

use super::{optional, required, CommandResult, Executor, Failure, Handled, HandlerResult, Invocation};
use tracing::info;
use zapflow_core::{message::OutboundPayload, records::OutgoingMail};

/// Keep only the digits of a phone-like target.
pub(crate) fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "sim" | "yes" | "html" => Some(true),
        "false" | "0" | "nao" | "não" | "no" | "text" => Some(false),
        _ => None,
    }
}

impl Executor {
    /// `enviarEmail(to, subject, body, html?)`
    pub(crate) async fn send_mail(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let to = required(args, 0, "to")?;
        let subject = required(args, 1, "subject")?;
        let body = required(args, 2, "body")?;
        let html = match optional(args, 3) {
            Some(raw) => parse_flag(raw)
                .ok_or_else(|| Failure::invalid(format!("invalid html flag: {raw}")))?,
            None => false,
        };
        if !to.contains('@') || to.contains(char::is_whitespace) {
            return Err(Failure::invalid(format!("invalid email address: {to}")));
        }
        let mailer = self.mailer.as_ref().ok_or_else(|| Failure::not_connected("mail"))?;

        mailer
            .send_mail(&OutgoingMail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                from: self.settings.mail_from.clone(),
                html,
            })
            .await?;
        info!("mail sent to {to}: {subject}");
        Ok(CommandResult::ok("mail sent").with("to", to).into())
    }

    /// `whatsapp(target, message)`: plain text to another number.
    pub(crate) async fn send_message(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let raw_target = required(args, 0, "target")?;
        let message = required(args, 1, "message")?;
        let target = normalize_phone(raw_target);
        if target.len() < 8 {
            return Err(Failure::invalid(format!("invalid target: {raw_target}")));
        }
        if !self.transport.is_connected().await {
            return Err(Failure::not_connected("transport"));
        }

        self.transport
            .send(&target, &OutboundPayload::text(message))
            .await?;
        self.outgoing.remember(&target, message);
        self.state
            .record_message(&target, "assistant", message, None)
            .await?;
        info!("direct message sent to {target}");
        Ok(CommandResult::ok("message sent").with("target", target).into())
    }

    /// `lerUrl(url)`
    pub(crate) async fn fetch_url(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let url = required(args, 0, "url")?;
        let lower = url.to_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(Failure::invalid(format!("only http(s) URLs are allowed: {url}")));
        }
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| Failure::not_connected("web fetcher"))?;

        let max = self.settings.fetch_max_chars;
        let content = fetcher.fetch_text(url, max).await?;
        let content: String = content.chars().take(max).collect();
        Ok(CommandResult::ok(format!("{} chars", content.chars().count()))
            .with("url", url)
            .with("content", content)
            .into())
    }

    /// `boomerang()`: tell the contact to wait, and request one nested run.
    pub(crate) async fn self_trigger(&self, inv: &Invocation<'_>, _args: &[String]) -> HandlerResult {
        let triggered = inv.session.allow_self_trigger;
        let result = CommandResult::ok(if triggered {
            "nested run requested"
        } else {
            "nested run not allowed here"
        })
        .with("triggered", triggered);
        let mut handled = Handled::with_note(result, self.settings.boomerang_note.clone());
        handled.self_trigger = triggered;
        Ok(handled)
    }
}

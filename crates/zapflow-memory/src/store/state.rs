//! Conversation context, instance variables, contacts, and audit logs.

use super::Store;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;
use zapflow_core::{error::ZapError, records::ContactRecord, traits::StateStore};

#[async_trait]
impl StateStore for Store {
    async fn get_context(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> Result<Option<String>, ZapError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM context_values \
             WHERE instance_id = ? AND conversation_id = ? AND key = ?",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("get context failed: {e}")))?;
        Ok(row.map(|r| r.0))
    }

    async fn set_context(
        &self,
        conversation_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ZapError> {
        sqlx::query(
            "INSERT INTO context_values (instance_id, conversation_id, key, value) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(instance_id, conversation_id, key) \
             DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("set context failed: {e}")))?;
        Ok(())
    }

    async fn delete_context(&self, conversation_id: &str, key: &str) -> Result<bool, ZapError> {
        let result = sqlx::query(
            "DELETE FROM context_values \
             WHERE instance_id = ? AND conversation_id = ? AND key = ?",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("delete context failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_context(&self, conversation_id: &str) -> Result<u64, ZapError> {
        let result = sqlx::query(
            "DELETE FROM context_values WHERE instance_id = ? AND conversation_id = ?",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("clear context failed: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn list_context(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<(String, String)>, ZapError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM context_values \
             WHERE instance_id = ? AND conversation_id = ? ORDER BY key ASC",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("list context failed: {e}")))?;
        Ok(rows)
    }

    async fn get_variable(&self, name: &str) -> Result<Option<String>, ZapError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM variables WHERE instance_id = ? AND name = ?")
                .bind(&self.instance_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ZapError::Memory(format!("get variable failed: {e}")))?;
        Ok(row.map(|r| r.0))
    }

    async fn set_variable(&self, name: &str, value: &str) -> Result<(), ZapError> {
        sqlx::query(
            "INSERT INTO variables (instance_id, name, value) VALUES (?, ?, ?) \
             ON CONFLICT(instance_id, name) \
             DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        )
        .bind(&self.instance_id)
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("set variable failed: {e}")))?;
        Ok(())
    }

    async fn get_contact(&self, conversation_id: &str) -> Result<Option<ContactRecord>, ZapError> {
        let row: Option<(Option<String>, String, i64)> = sqlx::query_as(
            "SELECT display_name, tags, opted_out FROM contacts \
             WHERE instance_id = ? AND conversation_id = ?",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("get contact failed: {e}")))?;

        let Some((display_name, tags, opted_out)) = row else {
            return Ok(None);
        };
        let tags: Vec<String> = serde_json::from_str(&tags).unwrap_or_default();
        Ok(Some(ContactRecord {
            conversation_id: conversation_id.to_string(),
            display_name,
            tags,
            opted_out: opted_out != 0,
        }))
    }

    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<(), ZapError> {
        let tags = serde_json::to_string(&contact.tags)?;
        sqlx::query(
            "INSERT INTO contacts (instance_id, conversation_id, display_name, tags, opted_out) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(instance_id, conversation_id) DO UPDATE SET \
                display_name = excluded.display_name, \
                tags = excluded.tags, \
                opted_out = excluded.opted_out, \
                updated_at = datetime('now')",
        )
        .bind(&self.instance_id)
        .bind(&contact.conversation_id)
        .bind(&contact.display_name)
        .bind(&tags)
        .bind(i64::from(contact.opted_out))
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("upsert contact failed: {e}")))?;
        Ok(())
    }

    async fn log_event(
        &self,
        conversation_id: &str,
        name: &str,
        details: Option<&str>,
    ) -> Result<(), ZapError> {
        sqlx::query(
            "INSERT INTO events (id, instance_id, conversation_id, name, details) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(name)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("log event failed: {e}")))?;
        Ok(())
    }

    async fn record_message(
        &self,
        conversation_id: &str,
        role: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), ZapError> {
        let metadata = metadata.map(serde_json::Value::to_string);
        sqlx::query(
            "INSERT INTO messages (id, instance_id, conversation_id, role, text, metadata) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(role)
        .bind(text)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("record message failed: {e}")))?;

        debug!("message: {conversation_id} [{role}] {}", truncate(text, 80));
        Ok(())
    }

    async fn record_alert(
        &self,
        conversation_id: &str,
        kind: &str,
        detail: &str,
    ) -> Result<(), ZapError> {
        sqlx::query(
            "INSERT INTO alerts (id, instance_id, conversation_id, kind, detail) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(kind)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("record alert failed: {e}")))?;
        Ok(())
    }
}

impl Store {
    /// Recent messages of a conversation, oldest first: `(role, text, metadata)`.
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<(String, String, Option<String>)>, ZapError> {
        let mut rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT role, text, metadata FROM messages \
             WHERE instance_id = ? AND conversation_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("recent messages failed: {e}")))?;
        rows.reverse();
        Ok(rows)
    }

    /// Admin alerts of a conversation, oldest first: `(kind, detail)`.
    pub async fn alerts_for(&self, conversation_id: &str) -> Result<Vec<(String, String)>, ZapError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT kind, detail FROM alerts \
             WHERE instance_id = ? AND conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("list alerts failed: {e}")))?;
        Ok(rows)
    }

    /// Logged events of a conversation, oldest first: `(name, details)`.
    pub async fn events_for(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<(String, Option<String>)>, ZapError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT name, details FROM events \
             WHERE instance_id = ? AND conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&self.instance_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("list events failed: {e}")))?;
        Ok(rows)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

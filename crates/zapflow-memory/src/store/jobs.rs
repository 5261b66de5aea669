//! Scheduled job CRUD, cadence reset, and due-job polling.

use super::Store;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::SqliteConnection;
use uuid::Uuid;
use zapflow_core::{
    clock::{format_wall, now_wall},
    error::ZapError,
    records::{JobScope, JobStatus, NewJob, ScheduledJob},
    traits::SchedulerStore,
};

const JOB_COLUMNS: &str = "id, scope, target, message, scheduled_at, status, tag, category, \
                           instance_id, error, created_at, sent_at";

type JobRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
);

fn into_job(row: JobRow) -> Result<ScheduledJob, ZapError> {
    let (
        id,
        scope,
        target,
        message,
        scheduled_at,
        status,
        tag,
        category,
        instance_id,
        error,
        created_at,
        sent_at,
    ) = row;
    let scope = JobScope::parse(&scope)
        .ok_or_else(|| ZapError::Memory(format!("job {id}: unknown scope '{scope}'")))?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| ZapError::Memory(format!("job {id}: unknown status '{status}'")))?;
    Ok(ScheduledJob {
        id,
        scope,
        target,
        message,
        scheduled_at,
        status,
        tag,
        category,
        instance_id,
        error,
        created_at,
        sent_at,
    })
}

impl Store {
    async fn insert_job(
        conn: &mut SqliteConnection,
        instance_id: &str,
        job: &NewJob,
    ) -> Result<String, ZapError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO scheduled_jobs \
             (id, scope, target, message, scheduled_at, status, tag, category, instance_id) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(&id)
        .bind(job.scope.as_str())
        .bind(&job.target)
        .bind(&job.message)
        .bind(format_wall(&job.scheduled_at))
        .bind(&job.tag)
        .bind(&job.category)
        .bind(instance_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| ZapError::Memory(format!("enqueue job failed: {e}")))?;
        Ok(id)
    }

    async fn cancel_pending(
        conn: &mut SqliteConnection,
        instance_id: &str,
        scope: JobScope,
        target: &str,
        cause: &str,
    ) -> Result<u64, ZapError> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET status = 'failed', error = ? \
             WHERE instance_id = ? AND target = ? AND scope = ? \
             AND status = 'pending'",
        )
        .bind(cause)
        .bind(instance_id)
        .bind(target)
        .bind(scope.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| ZapError::Memory(format!("cancel pending jobs failed: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Fetch one job by id (any status).
    pub async fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>, ZapError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ? AND instance_id = ?"
        ))
        .bind(id)
        .bind(&self.instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("get job failed: {e}")))?;
        row.map(into_job).transpose()
    }

    /// Count pending jobs per scope for the status command: `(individual, group)`.
    pub async fn pending_counts(&self) -> Result<(i64, i64), ZapError> {
        let (individual, group): (i64, i64) = sqlx::query_as(
            "SELECT \
                COALESCE(SUM(CASE WHEN scope = 'individual' THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN scope = 'group' THEN 1 ELSE 0 END), 0) \
             FROM scheduled_jobs WHERE instance_id = ? AND status = 'pending'",
        )
        .bind(&self.instance_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("count pending jobs failed: {e}")))?;
        Ok((individual, group))
    }
}

#[async_trait]
impl SchedulerStore for Store {
    async fn enqueue_job(&self, job: &NewJob) -> Result<String, ZapError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ZapError::Memory(format!("acquire connection failed: {e}")))?;
        Self::insert_job(&mut conn, &self.instance_id, job).await
    }

    async fn pending_jobs_for(
        &self,
        target: &str,
        tag: Option<&str>,
    ) -> Result<Vec<ScheduledJob>, ZapError> {
        let rows: Vec<JobRow> = match tag {
            Some(tag) => sqlx::query_as(&format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs \
                 WHERE instance_id = ? AND target = ? AND tag = ? AND status = 'pending' \
                 ORDER BY scheduled_at ASC"
            ))
            .bind(&self.instance_id)
            .bind(target)
            .bind(tag)
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query_as(&format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs \
                 WHERE instance_id = ? AND target = ? AND status = 'pending' \
                 ORDER BY scheduled_at ASC"
            ))
            .bind(&self.instance_id)
            .bind(target)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| ZapError::Memory(format!("list pending jobs failed: {e}")))?;
        rows.into_iter().map(into_job).collect()
    }

    async fn delete_job(&self, target: &str, id: &str) -> Result<bool, ZapError> {
        let result = sqlx::query(
            "DELETE FROM scheduled_jobs WHERE id = ? AND target = ? AND instance_id = ?",
        )
        .bind(id)
        .bind(target)
        .bind(&self.instance_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("delete job failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_jobs_by_tag(&self, target: &str, tag: &str) -> Result<u64, ZapError> {
        let result = sqlx::query(
            "DELETE FROM scheduled_jobs WHERE tag = ? AND target = ? AND instance_id = ?",
        )
        .bind(tag)
        .bind(target)
        .bind(&self.instance_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("delete jobs by tag failed: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn delete_jobs_by_category(
        &self,
        target: &str,
        category: &str,
    ) -> Result<u64, ZapError> {
        let result = sqlx::query(
            "DELETE FROM scheduled_jobs WHERE category = ? AND target = ? AND instance_id = ?",
        )
        .bind(category)
        .bind(target)
        .bind(&self.instance_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("delete jobs by category failed: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn cancel_pending_for(
        &self,
        scope: JobScope,
        target: &str,
        cause: &str,
    ) -> Result<u64, ZapError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ZapError::Memory(format!("acquire connection failed: {e}")))?;
        Self::cancel_pending(&mut conn, &self.instance_id, scope, target, cause).await
    }

    async fn reset_cadence(&self, job: &NewJob, cause: &str) -> Result<(u64, String), ZapError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ZapError::Memory(format!("begin cadence reset failed: {e}")))?;

        let cancelled =
            Self::cancel_pending(&mut tx, &self.instance_id, job.scope, &job.target, cause).await?;
        let id = Self::insert_job(&mut tx, &self.instance_id, job).await?;

        tx.commit()
            .await
            .map_err(|e| ZapError::Memory(format!("commit cadence reset failed: {e}")))?;
        Ok((cancelled, id))
    }

    async fn due_jobs(
        &self,
        scope: JobScope,
        now: &NaiveDateTime,
        limit: u32,
    ) -> Result<Vec<ScheduledJob>, ZapError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs \
             WHERE instance_id = ? AND scope = ? AND status = 'pending' AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC LIMIT ?"
        ))
        .bind(&self.instance_id)
        .bind(scope.as_str())
        .bind(format_wall(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("get due jobs failed: {e}")))?;
        rows.into_iter().map(into_job).collect()
    }

    async fn job_status(&self, id: &str) -> Result<Option<JobStatus>, ZapError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM scheduled_jobs WHERE id = ? AND instance_id = ?")
                .bind(id)
                .bind(&self.instance_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ZapError::Memory(format!("job status failed: {e}")))?;
        Ok(row.and_then(|(s,)| JobStatus::parse(&s)))
    }

    async fn mark_sent(&self, id: &str) -> Result<bool, ZapError> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET status = 'sent', sent_at = ?, error = NULL \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(format_wall(&now_wall()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("mark sent failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: &str, cause: &str) -> Result<bool, ZapError> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET status = 'failed', error = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(cause)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ZapError::Memory(format!("mark failed failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

//! Scheduled-message dispatcher: delivers due jobs on a fixed interval.

use super::delivery::{Deliverer, DeliveryError};
use super::segments::split_segments;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use zapflow_core::{
    clock::now_wall,
    records::{JobScope, JobStatus, ScheduledJob},
    traits::{SchedulerStore, StateStore, Transport},
};

const OPT_OUT_CAUSE: &str = "opt-out";

/// Outcome of one dispatcher cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// The cycle did nothing: another was running or the transport was down.
    pub skipped: bool,
    pub sent: usize,
    pub failed: usize,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum JobOutcome {
    Sent,
    Failed,
    Skipped,
}

pub struct Dispatcher {
    jobs: Arc<dyn SchedulerStore>,
    state: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    deliverer: Arc<Deliverer>,
    segment_delimiter: char,
    batch_size: u32,
    in_flight: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn SchedulerStore>,
        state: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        deliverer: Arc<Deliverer>,
        segment_delimiter: char,
        batch_size: u32,
    ) -> Self {
        Self {
            jobs,
            state,
            transport,
            deliverer,
            segment_delimiter,
            batch_size: batch_size.max(1),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Tick now, then every `poll`.
    pub fn spawn(self: Arc<Self>, poll: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let report = self.flush_due_schedules().await;
                if !report.skipped && report.sent + report.failed > 0 {
                    info!(
                        "scheduler: {} sent, {} failed",
                        report.sent, report.failed
                    );
                }
            }
        })
    }

    /// Deliver every due job once. A cycle already in flight makes this a no-op.
    pub async fn flush_due_schedules(&self) -> CycleReport {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("scheduler: previous cycle still running, skipping");
            return CycleReport {
                skipped: true,
                ..Default::default()
            };
        };
        if !self.transport.is_connected().await {
            debug!("scheduler: transport disconnected, skipping cycle");
            return CycleReport {
                skipped: true,
                ..Default::default()
            };
        }

        let mut report = CycleReport::default();
        let now = now_wall();
        for scope in [JobScope::Individual, JobScope::Group] {
            let due = match self.jobs.due_jobs(scope, &now, self.batch_size).await {
                Ok(due) => due,
                Err(e) => {
                    error!("scheduler: failed to fetch due {} jobs: {e}", scope.as_str());
                    continue;
                }
            };
            for job in &due {
                match self.process(job).await {
                    JobOutcome::Sent => report.sent += 1,
                    JobOutcome::Failed => report.failed += 1,
                    JobOutcome::Skipped => {}
                }
            }
        }
        report
    }

    async fn fail(&self, job: &ScheduledJob, cause: &str) -> JobOutcome {
        warn!("scheduler: job {} for {} failed: {cause}", job.id, job.target);
        if let Err(e) = self.jobs.mark_failed(&job.id, cause).await {
            error!("scheduler: could not mark job {} failed: {e}", job.id);
        }
        JobOutcome::Failed
    }

    async fn process(&self, job: &ScheduledJob) -> JobOutcome {
        match self.jobs.job_status(&job.id).await {
            Ok(Some(JobStatus::Pending)) => {}
            Ok(_) => {
                debug!("scheduler: job {} no longer pending", job.id);
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!("scheduler: status check for {} failed: {e}", job.id);
                return JobOutcome::Skipped;
            }
        }

        if job.scope == JobScope::Individual {
            match self.state.get_contact(&job.target).await {
                Ok(Some(contact)) if contact.opted_out => {
                    return self.fail(job, OPT_OUT_CAUSE).await;
                }
                Ok(_) => {}
                Err(e) => warn!("scheduler: contact lookup for {} failed: {e}", job.target),
            }
        }

        let segments = split_segments(&job.message, self.segment_delimiter);
        if segments.is_empty() {
            return self.fail(job, "empty message").await;
        }

        let metadata = json!({
            "scheduled_job": job.id,
            "tag": job.tag,
            "category": job.category,
        });
        let mut metadata = Some(&metadata);
        for segment in &segments {
            match self.deliverer.send_segment(&job.target, segment).await {
                Ok(payload) => {
                    self.deliverer
                        .record(&job.target, &payload, metadata.take())
                        .await;
                }
                Err(DeliveryError::MissingAsset(url)) => {
                    self.deliverer.report_missing_asset(&job.target, &url).await;
                    return self.fail(job, &format!("missing asset: {url}")).await;
                }
                Err(DeliveryError::Send(e)) => {
                    return self.fail(job, &e.to_string()).await;
                }
            }
        }

        match self.jobs.mark_sent(&job.id).await {
            Ok(true) => {
                info!("scheduler: delivered job {} to {}", job.id, job.target);
                JobOutcome::Sent
            }
            Ok(false) => {
                warn!("scheduler: job {} changed state during delivery", job.id);
                JobOutcome::Sent
            }
            Err(e) => {
                error!("scheduler: could not mark job {} sent: {e}", job.id);
                JobOutcome::Sent
            }
        }
    }
}

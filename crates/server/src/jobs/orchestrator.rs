// crates/server/src/jobs/orchestrator.rs
//! Drives jobs through the pass state machine.
//!
//! Every observable effect follows the same recording order: append the
//! event to the durable log, apply the status transition, then publish to
//! live subscribers. A subscriber that sees a status can therefore always
//! find the event that caused it in the log.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use redraft_db::{Database, DbError, DbResult};
use redraft_types::{Job, JobEventType, JobFilter, JobStatus, JobTransition};

use crate::config::Config;
use crate::jobs::broadcaster::EventBroadcaster;
use crate::jobs::refiner::{FileSource, RefineError, Refiner};

/// Upper bound when scanning jobs for recovery; not a correctness limit.
const RECOVERY_SCAN_LIMIT: u32 = 10_000;

/// Drives jobs on background tasks.
///
/// Thread-safe handle: all shared state lives behind an inner `Arc`, the
/// way the per-task clones need it.
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    broadcaster: Arc<EventBroadcaster>,
    refiner: Arc<dyn Refiner>,
    file_source: Arc<dyn FileSource>,
    permits: Arc<Semaphore>,
    cancel_tokens: RwLock<HashMap<String, CancellationToken>>,
    pass_retries: u32,
    pass_timeout: Duration,
    stale_after: Duration,
}

enum PassOutcome {
    Refined(String),
    Failed { error: String },
    Cancelled,
}

impl JobOrchestrator {
    pub fn new(
        db: Database,
        broadcaster: Arc<EventBroadcaster>,
        refiner: Arc<dyn Refiner>,
        file_source: Arc<dyn FileSource>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                broadcaster,
                refiner,
                file_source,
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                cancel_tokens: RwLock::new(HashMap::new()),
                pass_retries: config.pass_retries,
                pass_timeout: config.pass_timeout,
                stale_after: config.stale_after,
            }),
        }
    }

    /// Start (or resume) driving a job on a background task.
    ///
    /// The task queues on the concurrency semaphore; the job stays
    /// `pending` until a permit is available.
    pub fn spawn(&self, job_id: String) {
        Inner::spawn_job(&self.inner, job_id);
    }

    /// Request cancellation of a non-terminal job.
    ///
    /// A job with a live driver is cancelled cooperatively at its next
    /// pass boundary; an orphaned job is finalized immediately.
    pub async fn cancel(&self, job_id: &str) -> DbResult<Job> {
        self.inner.cancel(job_id).await
    }

    /// Resume work left over from a previous process.
    ///
    /// Pending jobs are simply re-spawned. Processing jobs are repaired
    /// from their event log: a terminal event without the matching status
    /// gets the status applied, an unmatched `pass_started` is recorded as
    /// a failed attempt (the crash consumed one retry), and the job
    /// resumes from its last completed pass.
    pub async fn recover(&self) -> DbResult<()> {
        Inner::recover(&self.inner).await
    }

    /// Periodically sweep for processing jobs nobody is driving.
    pub fn start_watchdog(&self) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let period = inner.stale_after.max(Duration::from_secs(30)) / 2;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = Inner::sweep_stale(&inner).await {
                    warn!(error = %e, "stale-job sweep failed");
                }
            }
        })
    }
}

impl Inner {
    fn token_for(&self, job_id: &str) -> Option<CancellationToken> {
        let tokens = match self.cancel_tokens.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens.get(job_id).cloned()
    }

    fn register_token(&self, job_id: &str) -> CancellationToken {
        let mut tokens = match self.cancel_tokens.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens
            .entry(job_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    fn remove_token(&self, job_id: &str) {
        let mut tokens = match self.cancel_tokens.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens.remove(job_id);
    }

    fn spawn_job(inner: &Arc<Inner>, job_id: String) {
        let token = inner.register_token(&job_id);
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let permit = inner.permits.clone().acquire_owned().await;
            if permit.is_err() {
                // Semaphore closed: the process is shutting down.
                return;
            }
            if let Err(e) = inner.drive(&job_id, &token).await {
                error!(job_id = %job_id, error = %e, "job run aborted");
            }
            inner.remove_token(&job_id);
        });
    }

    async fn cancel(&self, job_id: &str) -> DbResult<Job> {
        let job = self.db.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(DbError::InvalidTransition {
                from: job.status,
                to: JobStatus::Cancelled,
            });
        }
        match self.token_for(job_id) {
            Some(token) => {
                info!(job_id = %job_id, "cancellation requested");
                token.cancel();
                Ok(job)
            }
            None => self.finish(job_id, JobTransition::Cancel).await,
        }
    }

    async fn recover(inner: &Arc<Inner>) -> DbResult<()> {
        let pending = inner
            .db
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Pending),
                limit: Some(RECOVERY_SCAN_LIMIT),
                ..Default::default()
            })
            .await?;
        for job in &pending {
            Inner::spawn_job(inner, job.id.clone());
        }

        let processing = inner
            .db
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Processing),
                limit: Some(RECOVERY_SCAN_LIMIT),
                ..Default::default()
            })
            .await?;
        let interrupted = processing.len();
        for job in processing {
            Inner::recover_job(inner, &job).await?;
        }

        if !pending.is_empty() || interrupted > 0 {
            info!(
                pending = pending.len(),
                interrupted, "recovered jobs from previous run"
            );
        }
        Ok(())
    }

    async fn recover_job(inner: &Arc<Inner>, job: &Job) -> DbResult<()> {
        if inner.token_for(&job.id).is_some() {
            return Ok(()); // already being driven by this process
        }

        match inner.db.last_event(&job.id).await? {
            Some(last) if last.event_type.is_terminal() => {
                // The event made it to the log but the status update did
                // not. Apply the missing transition; the event itself is
                // already durable, so nothing new is appended.
                // `finish` stores the result payload in the terminal
                // event's details, so the lost transition can be rebuilt
                // from the log verbatim.
                let transition = match last.event_type {
                    JobEventType::JobCompleted => JobTransition::Complete {
                        result: Some(last.details.clone()),
                    },
                    JobEventType::JobCancelled => JobTransition::Cancel,
                    _ => JobTransition::Fail {
                        error: last.message.clone(),
                    },
                };
                if let Err(e) = inner.db.update_job_state(&job.id, &transition).await {
                    // Another recovery path may have beaten us to it.
                    warn!(job_id = %job.id, error = %e, "could not re-apply terminal transition");
                }
                Ok(())
            }
            Some(last) if last.event_type == JobEventType::PassStarted => {
                // The process died mid-pass. Record the attempt as failed
                // and resume; the failed attempt counts against the pass's
                // retry budget.
                let event = inner
                    .db
                    .append_event(
                        &job.id,
                        JobEventType::PassFailed,
                        last.pass_number,
                        "pass interrupted by restart",
                        serde_json::json!({ "recovered": true }),
                    )
                    .await?;
                inner.broadcaster.publish(&event);
                warn!(job_id = %job.id, pass = ?last.pass_number, "recovering interrupted pass");
                Inner::spawn_job(inner, job.id.clone());
                Ok(())
            }
            _ => {
                Inner::spawn_job(inner, job.id.clone());
                Ok(())
            }
        }
    }

    async fn sweep_stale(inner: &Arc<Inner>) -> DbResult<()> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(inner.stale_after).unwrap_or(chrono::Duration::zero());
        for job in inner.db.list_stale_processing(cutoff).await? {
            if inner.token_for(&job.id).is_none() {
                warn!(job_id = %job.id, "found orphaned processing job");
                Inner::recover_job(inner, &job).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // The pass loop
    // =========================================================================

    async fn drive(&self, job_id: &str, token: &CancellationToken) -> DbResult<()> {
        let mut job = self.db.get_job(job_id).await?;

        match job.status {
            JobStatus::Pending => {
                if token.is_cancelled() {
                    self.finish(job_id, JobTransition::Cancel).await?;
                    return Ok(());
                }
                let event = self
                    .db
                    .append_event(
                        job_id,
                        JobEventType::JobStarted,
                        None,
                        "job started",
                        serde_json::json!({ "totalPasses": job.total_passes }),
                    )
                    .await?;
                job = match self.db.update_job_state(job_id, &JobTransition::Start).await {
                    Ok(job) => job,
                    Err(DbError::Conflict(_)) | Err(DbError::InvalidTransition { .. }) => {
                        // Lost a race with cancellation.
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                self.broadcaster.publish(&event);
            }
            JobStatus::Processing => {
                info!(job_id = %job_id, current_pass = job.current_pass, "resuming job");
            }
            _ => return Ok(()), // already terminal
        }

        if let Err(message) = self.ensure_original_snapshot(&job).await {
            self.fail_job(job_id, &message).await?;
            return Ok(());
        }

        let mut content = self
            .db
            .get_version(&job.file_id, job.current_pass)
            .await?
            .content;

        while job.current_pass < job.total_passes {
            if token.is_cancelled() {
                self.finish(job_id, JobTransition::Cancel).await?;
                return Ok(());
            }

            let pass = job.current_pass + 1;
            match self.run_pass(&job, pass, &content, token).await? {
                PassOutcome::Refined(refined) => {
                    // A crash between snapshot and event replays the pass;
                    // the snapshot from the first run wins.
                    let stored = match self.db.put_version(&job.file_id, pass, &refined).await {
                        Ok(v) => v.content,
                        Err(DbError::Conflict(_)) => {
                            self.db.get_version(&job.file_id, pass).await?.content
                        }
                        Err(e) => return Err(e),
                    };
                    let event = self
                        .db
                        .append_event(
                            job_id,
                            JobEventType::PassCompleted,
                            Some(pass),
                            &format!("pass {pass} of {} complete", job.total_passes),
                            serde_json::json!({ "chars": stored.len() }),
                        )
                        .await?;
                    job = self
                        .db
                        .update_job_state(job_id, &JobTransition::PassCompleted { pass })
                        .await?;
                    self.broadcaster.publish(&event);
                    content = stored;
                }
                PassOutcome::Failed { error } => {
                    self.fail_job(job_id, &error).await?;
                    return Ok(());
                }
                PassOutcome::Cancelled => {
                    self.finish(job_id, JobTransition::Cancel).await?;
                    return Ok(());
                }
            }
        }

        let result = serde_json::json!({
            "fileId": job.file_id,
            "finalPass": job.total_passes,
            "chars": content.len(),
        });
        self.finish(job_id, JobTransition::Complete { result: Some(result) })
            .await?;
        info!(job_id = %job_id, passes = job.total_passes, "job completed");
        Ok(())
    }

    /// Run one pass to completion, retrying transient failures within the
    /// pass's remaining retry budget.
    async fn run_pass(
        &self,
        job: &Job,
        pass: u32,
        content: &str,
        token: &CancellationToken,
    ) -> DbResult<PassOutcome> {
        // Failed attempts recorded by earlier runs of this process (or a
        // crashed predecessor) count against the budget.
        let mut failures = self
            .db
            .list_events(&job.id, 0)
            .await?
            .iter()
            .filter(|e| e.event_type == JobEventType::PassFailed && e.pass_number == Some(pass))
            .count() as u32;

        loop {
            // Boundary check: before the first attempt and before each retry.
            if token.is_cancelled() {
                return Ok(PassOutcome::Cancelled);
            }
            if failures > self.pass_retries {
                return Ok(PassOutcome::Failed {
                    error: format!("pass {pass} failed after {failures} attempts"),
                });
            }

            let event = self
                .db
                .append_event(
                    &job.id,
                    JobEventType::PassStarted,
                    Some(pass),
                    &format!("pass {pass} of {} started", job.total_passes),
                    serde_json::json!({ "attempt": failures + 1 }),
                )
                .await?;
            self.broadcaster.publish(&event);

            // The in-flight call is never interrupted: cancellation is
            // cooperative, so it runs to completion (or timeout) and the
            // result is discarded below if cancellation superseded it.
            let outcome = tokio::time::timeout(
                self.pass_timeout,
                self.refiner.run_pass(&job.file_id, pass, content, &job.model),
            )
            .await;

            if token.is_cancelled() {
                return Ok(PassOutcome::Cancelled);
            }

            let (message, fatal) = match outcome {
                Ok(Ok(refined)) => return Ok(PassOutcome::Refined(refined)),
                Ok(Err(RefineError::Fatal(message))) => (message, true),
                Ok(Err(RefineError::Transient(message))) => (message, false),
                Err(_) => (
                    format!("pass timed out after {:?}", self.pass_timeout),
                    false,
                ),
            };

            failures += 1;
            let will_retry = !fatal && failures <= self.pass_retries;
            let event = self
                .db
                .append_event(
                    &job.id,
                    JobEventType::PassFailed,
                    Some(pass),
                    &message,
                    serde_json::json!({ "attempt": failures, "willRetry": will_retry }),
                )
                .await?;
            self.broadcaster.publish(&event);
            warn!(job_id = %job.id, pass, attempt = failures, will_retry, "pass attempt failed: {message}");

            if fatal {
                return Ok(PassOutcome::Failed { error: message });
            }
        }
    }

    /// Seed the pass-0 snapshot from the file source if it is missing.
    async fn ensure_original_snapshot(&self, job: &Job) -> Result<(), String> {
        match self.db.get_version(&job.file_id, 0).await {
            Ok(_) => return Ok(()),
            Err(DbError::NotFound { .. }) => {}
            Err(e) => return Err(e.to_string()),
        }
        let original = self
            .file_source
            .fetch_original(&job.file_id)
            .await
            .map_err(|e| e.to_string())?;
        match self.db.put_version(&job.file_id, 0, &original).await {
            Ok(_) | Err(DbError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Record a terminal (or cancel) transition: event, status, publish.
    async fn finish(&self, job_id: &str, transition: JobTransition) -> DbResult<Job> {
        let (event_type, message, details) = match &transition {
            JobTransition::Complete { result } => (
                JobEventType::JobCompleted,
                "job completed".to_string(),
                result.clone().unwrap_or_else(|| serde_json::json!({})),
            ),
            JobTransition::Fail { error } => (
                JobEventType::JobFailed,
                error.clone(),
                serde_json::json!({}),
            ),
            JobTransition::Cancel => (
                JobEventType::JobCancelled,
                "job cancelled".to_string(),
                serde_json::json!({}),
            ),
            other => {
                return Err(DbError::Validation(format!(
                    "finish called with non-terminal transition {other:?}"
                )))
            }
        };
        let event = self
            .db
            .append_event(job_id, event_type, None, &message, details)
            .await?;
        let job = self.db.update_job_state(job_id, &transition).await?;
        self.broadcaster.publish(&event);
        Ok(job)
    }

    async fn fail_job(&self, job_id: &str, error: &str) -> DbResult<Job> {
        self.finish(
            job_id,
            JobTransition::Fail {
                error: error.to_string(),
            },
        )
        .await
    }
}

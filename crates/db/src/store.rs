// crates/db/src/store.rs
// Job store: job CRUD, state-machine transitions, and the append-only
// event log with atomic per-job sequence assignment.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use redraft_types::{Job, JobEvent, JobEventType, JobFilter, JobStatus, JobTransition, NewJob};

use crate::{Database, DbError, DbResult};

const JOB_COLUMNS: &str = "id, file_id, file_name, user_id, status, current_pass, total_passes, \
     model, created_at, updated_at, completed_at, error_message, result, metadata";

const EVENT_COLUMNS: &str =
    "id, job_id, event_type, pass_number, message, details, sequence, created_at";

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn job_from_row(row: &SqliteRow) -> DbResult<Job> {
    let status_raw: String = row.get("status");
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| DbError::Validation(format!("unknown job status in store: {status_raw}")))?;
    let result: Option<String> = row.get("result");
    let metadata: String = row.get("metadata");
    Ok(Job {
        id: row.get("id"),
        file_id: row.get("file_id"),
        file_name: row.get("file_name"),
        user_id: row.get("user_id"),
        status,
        current_pass: row.get::<i64, _>("current_pass") as u32,
        total_passes: row.get::<i64, _>("total_passes") as u32,
        model: row.get("model"),
        created_at: timestamp(row.get("created_at")),
        updated_at: timestamp(row.get("updated_at")),
        completed_at: row
            .get::<Option<i64>, _>("completed_at")
            .map(timestamp),
        error_message: row.get("error_message"),
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        metadata: serde_json::from_str(&metadata)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
    })
}

fn event_from_row(row: &SqliteRow) -> DbResult<JobEvent> {
    let type_raw: String = row.get("event_type");
    let event_type = JobEventType::parse(&type_raw)
        .ok_or_else(|| DbError::Validation(format!("unknown event type in store: {type_raw}")))?;
    let details: String = row.get("details");
    Ok(JobEvent {
        id: row.get("id"),
        job_id: row.get("job_id"),
        event_type,
        pass_number: row
            .get::<Option<i64>, _>("pass_number")
            .map(|p| p as u32),
        message: row.get("message"),
        details: serde_json::from_str(&details)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
        sequence: row.get("sequence"),
        created_at: timestamp(row.get("created_at")),
    })
}

impl Database {
    /// Create a new job in `pending` status.
    ///
    /// Rejects `total_passes < 1` with a validation error before touching
    /// the store.
    pub async fn create_job(&self, new: &NewJob) -> DbResult<Job> {
        if new.total_passes < 1 {
            return Err(DbError::Validation(format!(
                "totalPasses must be >= 1, got {}",
                new.total_passes
            )));
        }
        if new.file_id.is_empty() {
            return Err(DbError::Validation("fileId must not be empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let metadata = serde_json::to_string(&new.metadata)
            .map_err(|e| DbError::Validation(format!("metadata not serializable: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, file_id, file_name, user_id, status, current_pass,
                total_passes, model, created_at, updated_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?7, ?8)
            "#,
        )
        .bind(&id)
        .bind(&new.file_id)
        .bind(&new.file_name)
        .bind(&new.user_id)
        .bind(new.total_passes as i64)
        .bind(&new.model)
        .bind(now)
        .bind(&metadata)
        .execute(self.pool())
        .await?;

        self.get_job(&id).await
    }

    /// Fetch a single job by id.
    pub async fn get_job(&self, job_id: &str) -> DbResult<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::not_found("job", job_id))?;
        job_from_row(&row)
    }

    /// List jobs matching the filter, most recent first.
    pub async fn list_jobs(&self, filter: &JobFilter) -> DbResult<Vec<Job>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1=1"));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(after) = filter.created_after {
            qb.push(" AND created_at >= ")
                .push_bind(after.timestamp_millis());
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at <= ")
                .push_bind(before.timestamp_millis());
        }
        let limit = filter.limit.unwrap_or(JobFilter::DEFAULT_LIMIT);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit as i64);

        let rows = qb.build().fetch_all(self.pool()).await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Apply one state-machine transition to a job.
    ///
    /// Legality is pre-checked against the current status, but the UPDATE
    /// itself carries a status guard in its WHERE clause (compare-and-set),
    /// so a concurrent writer (e.g. a duplicate crash-recovery attempt)
    /// gets a conflict instead of a double-applied transition.
    pub async fn update_job_state(&self, job_id: &str, transition: &JobTransition) -> DbResult<Job> {
        let row = sqlx::query("SELECT status, current_pass, total_passes FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DbError::not_found("job", job_id))?;
        let status_raw: String = row.get("status");
        let from = JobStatus::parse(&status_raw).ok_or_else(|| {
            DbError::Validation(format!("unknown job status in store: {status_raw}"))
        })?;
        let current_pass = row.get::<i64, _>("current_pass") as u32;
        let total_passes = row.get::<i64, _>("total_passes") as u32;

        if !transition.legal_from(from) {
            return Err(DbError::InvalidTransition {
                from,
                to: transition.target(),
            });
        }

        let now = Utc::now().timestamp_millis();
        let result = match transition {
            JobTransition::Start => {
                sqlx::query(
                    "UPDATE jobs SET status = 'processing', updated_at = ?2 \
                     WHERE id = ?1 AND status = 'pending'",
                )
                .bind(job_id)
                .bind(now)
                .execute(self.pool())
                .await?
            }
            JobTransition::PassCompleted { pass } => {
                if *pass != current_pass + 1 || *pass > total_passes {
                    return Err(DbError::Validation(format!(
                        "pass {pass} cannot complete after pass {current_pass} of {total_passes}"
                    )));
                }
                sqlx::query(
                    "UPDATE jobs SET current_pass = ?2, updated_at = ?3 \
                     WHERE id = ?1 AND status = 'processing'",
                )
                .bind(job_id)
                .bind(*pass as i64)
                .bind(now)
                .execute(self.pool())
                .await?
            }
            JobTransition::Complete { result } => {
                if current_pass != total_passes {
                    return Err(DbError::Validation(format!(
                        "cannot complete at pass {current_pass} of {total_passes}"
                    )));
                }
                let result_json = match result {
                    Some(value) => Some(serde_json::to_string(value).map_err(|e| {
                        DbError::Validation(format!("result not serializable: {e}"))
                    })?),
                    None => None,
                };
                sqlx::query(
                    "UPDATE jobs SET status = 'completed', completed_at = ?2, result = ?3, \
                     error_message = NULL, updated_at = ?2 \
                     WHERE id = ?1 AND status = 'processing'",
                )
                .bind(job_id)
                .bind(now)
                .bind(result_json)
                .execute(self.pool())
                .await?
            }
            JobTransition::Fail { error } => {
                if error.is_empty() {
                    return Err(DbError::Validation(
                        "failed jobs require a non-empty error message".to_string(),
                    ));
                }
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', error_message = ?2, updated_at = ?3 \
                     WHERE id = ?1 AND status = 'processing'",
                )
                .bind(job_id)
                .bind(error)
                .bind(now)
                .execute(self.pool())
                .await?
            }
            JobTransition::Cancel => {
                sqlx::query(
                    "UPDATE jobs SET status = 'cancelled', updated_at = ?2 \
                     WHERE id = ?1 AND status IN ('pending', 'processing')",
                )
                .bind(job_id)
                .bind(now)
                .execute(self.pool())
                .await?
            }
        };

        if result.rows_affected() == 0 {
            // Legal when we looked, gone by the time we wrote.
            return Err(DbError::Conflict(format!(
                "job {job_id} changed state concurrently"
            )));
        }

        self.get_job(job_id).await
    }

    /// Append an event to a job's log, atomically assigning the next
    /// sequence number for that job.
    ///
    /// The sequence is computed inside the INSERT statement itself, which
    /// holds SQLite's write lock for its whole evaluation, so assignment
    /// stays monotonic under concurrent writers. If a second writer still
    /// lands the same sequence (crash-recovery double-append), the
    /// `(job_id, sequence)` unique index turns it into a conflict error.
    pub async fn append_event(
        &self,
        job_id: &str,
        event_type: JobEventType,
        pass_number: Option<u32>,
        message: &str,
        details: serde_json::Value,
    ) -> DbResult<JobEvent> {
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;
        if exists.is_none() {
            return Err(DbError::not_found("job", job_id));
        }

        let now = Utc::now().timestamp_millis();
        let details_json = serde_json::to_string(&details)
            .map_err(|e| DbError::Validation(format!("details not serializable: {e}")))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO job_events (job_id, event_type, pass_number, message, details, sequence, created_at)
            VALUES (
                ?1, ?2, ?3, ?4, ?5,
                (SELECT COALESCE(MAX(sequence), 0) + 1 FROM job_events WHERE job_id = ?1),
                ?6
            )
            "#,
        )
        .bind(job_id)
        .bind(event_type.as_str())
        .bind(pass_number.map(|p| p as i64))
        .bind(message)
        .bind(&details_json)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| DbError::from_unique_violation(e, "duplicate event sequence"))?;

        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM job_events WHERE id = ?1"
        ))
        .bind(inserted.last_insert_rowid())
        .fetch_one(self.pool())
        .await?;
        event_from_row(&row)
    }

    /// List a job's events with `sequence > since_sequence`, ascending.
    /// Used for replay/catch-up.
    pub async fn list_events(&self, job_id: &str, since_sequence: i64) -> DbResult<Vec<JobEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM job_events \
             WHERE job_id = ?1 AND sequence > ?2 ORDER BY sequence ASC"
        ))
        .bind(job_id)
        .bind(since_sequence)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    /// Most recent event for a job, if any. Crash recovery inspects this
    /// to decide whether a pass was in flight.
    pub async fn last_event(&self, job_id: &str) -> DbResult<Option<JobEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM job_events \
             WHERE job_id = ?1 ORDER BY sequence DESC LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    /// Jobs stuck in `processing` whose last update is older than `cutoff`.
    /// The watchdog sweep re-claims these after a crash.
    pub async fn list_stale_processing(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'processing' AND updated_at < ?1 ORDER BY updated_at ASC"
        ))
        .bind(cutoff.timestamp_millis())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(job_from_row).collect()
    }
}

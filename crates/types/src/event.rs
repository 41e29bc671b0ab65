// crates/types/src/event.rs
//! Append-only job event log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of fact recorded in the event log.
///
/// `ResyncRequired` is runtime-only: the broadcaster injects it into a
/// subscriber's feed when that subscriber fell too far behind and its
/// live buffer was dropped. It is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    JobStarted,
    PassStarted,
    PassCompleted,
    PassFailed,
    JobCompleted,
    JobFailed,
    JobCancelled,
    ResyncRequired,
}

impl JobEventType {
    /// Stable snake_case name, used as the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventType::JobStarted => "job_started",
            JobEventType::PassStarted => "pass_started",
            JobEventType::PassCompleted => "pass_completed",
            JobEventType::PassFailed => "pass_failed",
            JobEventType::JobCompleted => "job_completed",
            JobEventType::JobFailed => "job_failed",
            JobEventType::JobCancelled => "job_cancelled",
            JobEventType::ResyncRequired => "resync_required",
        }
    }

    /// Parse the storage representation back into an event type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "job_started" => Some(JobEventType::JobStarted),
            "pass_started" => Some(JobEventType::PassStarted),
            "pass_completed" => Some(JobEventType::PassCompleted),
            "pass_failed" => Some(JobEventType::PassFailed),
            "job_completed" => Some(JobEventType::JobCompleted),
            "job_failed" => Some(JobEventType::JobFailed),
            "job_cancelled" => Some(JobEventType::JobCancelled),
            "resync_required" => Some(JobEventType::ResyncRequired),
            _ => None,
        }
    }

    /// Whether this event marks the end of a job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEventType::JobCompleted | JobEventType::JobFailed | JobEventType::JobCancelled
        )
    }
}

impl std::fmt::Display for JobEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable fact about a job's progress.
///
/// Events for a given job are totally ordered by `sequence` (store-assigned,
/// strictly increasing, starting at 1) and are never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_number: Option<u32>,
    pub message: String,
    pub details: serde_json::Value,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl JobEvent {
    /// Build the broadcaster's resync sentinel for a lagging subscriber.
    pub fn resync_sentinel(job_id: &str, last_delivered: i64) -> Self {
        Self {
            id: 0,
            job_id: job_id.to_string(),
            event_type: JobEventType::ResyncRequired,
            pass_number: None,
            message: "subscriber fell behind; reconnect with sinceSequence to resync".to_string(),
            details: serde_json::json!({ "lastDeliveredSequence": last_delivered }),
            sequence: last_delivered,
            created_at: Utc::now(),
        }
    }
}

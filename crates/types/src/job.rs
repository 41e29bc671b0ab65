// crates/types/src/job.rs
//! Job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a refinement job.
///
/// `Pending` and `Processing` are the only non-terminal states; no
/// transition ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Stable lowercase name, used as the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether no further transition can occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legality check for the state machine.
    ///
    /// `pending -> processing | cancelled`; `processing -> completed |
    /// failed | cancelled`. A job never re-enters `pending`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a caller asks for an illegal state transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid job transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One refinement run of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub file_id: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: JobStatus,
    /// Last pass that completed successfully (0 before any pass finishes).
    pub current_pass: u32,
    pub total_passes: u32,
    /// Model tag, opaque to the orchestration core.
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

impl Job {
    /// Completed fraction in `[0, 1]`, derived from the pass counters.
    pub fn progress(&self) -> f64 {
        if self.total_passes == 0 {
            return 0.0;
        }
        f64::from(self.current_pass) / f64::from(self.total_passes)
    }
}

/// One state-machine transition applied through the job store.
///
/// Each variant carries the side effects the transition writes along with
/// the status change; the store rejects the whole transition if it is not
/// legal from the job's current status.
#[derive(Debug, Clone)]
pub enum JobTransition {
    /// `pending -> processing`.
    Start,
    /// `processing -> processing`, advancing `current_pass` to `pass`.
    PassCompleted { pass: u32 },
    /// `processing -> completed`; sets `completed_at` and `result`.
    Complete { result: Option<serde_json::Value> },
    /// `processing -> failed`; sets `error_message`.
    Fail { error: String },
    /// `pending | processing -> cancelled`.
    Cancel,
}

impl JobTransition {
    /// Target status of this transition.
    pub fn target(&self) -> JobStatus {
        match self {
            JobTransition::Start => JobStatus::Processing,
            JobTransition::PassCompleted { .. } => JobStatus::Processing,
            JobTransition::Complete { .. } => JobStatus::Completed,
            JobTransition::Fail { .. } => JobStatus::Failed,
            JobTransition::Cancel => JobStatus::Cancelled,
        }
    }

    /// Whether the transition is legal from `from`.
    ///
    /// `PassCompleted` is the one self-loop: it requires the job to already
    /// be `processing`.
    pub fn legal_from(&self, from: JobStatus) -> bool {
        match self {
            JobTransition::PassCompleted { .. } => from == JobStatus::Processing,
            other => from.can_transition_to(other.target()),
        }
    }
}

/// Request payload for starting a new job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub file_id: String,
    pub file_name: String,
    pub total_passes: u32,
    pub model: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Filter for job listings. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub user_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum rows returned; listings default to the 100 most recent.
    pub limit: Option<u32>,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: u32 = 100;
}

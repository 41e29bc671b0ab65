// crates/types/src/lib.rs
//! Shared domain types for the redraft job-orchestration backend.
//!
//! Everything that crosses a crate boundary lives here: jobs and their
//! state machine, the append-only event log records, version snapshots,
//! and the computed diff value objects.

pub mod diff;
pub mod event;
pub mod job;
pub mod version;

pub use diff::{ChangeTag, Diff, DiffChange, DiffGranularity, DiffStats};
pub use event::{JobEvent, JobEventType};
pub use job::{InvalidTransition, Job, JobFilter, JobStatus, JobTransition, NewJob};
pub use version::Version;

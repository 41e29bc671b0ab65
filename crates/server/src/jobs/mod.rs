// crates/server/src/jobs/mod.rs
//! Job orchestration: the pass state machine, live event fan-out, and the
//! seams to the external refinement service and file source.

pub mod broadcaster;
pub mod orchestrator;
pub mod refiner;

pub use broadcaster::EventBroadcaster;
pub use orchestrator::JobOrchestrator;
pub use refiner::{DirFileSource, FetchError, FileSource, HttpRefiner, RefineError, Refiner};

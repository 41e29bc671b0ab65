// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use redraft_db::Database;

use crate::config::Config;
use crate::jobs::{EventBroadcaster, FileSource, JobOrchestrator, Refiner};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Database handle for jobs, events, and version snapshots.
    pub db: Database,
    /// Live event fan-out for SSE and WebSocket subscribers.
    pub broadcaster: Arc<EventBroadcaster>,
    /// Drives jobs through the pass state machine on background tasks.
    pub orchestrator: Arc<JobOrchestrator>,
    /// Runtime settings, kept around for the health endpoint.
    pub config: Config,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(
        db: Database,
        refiner: Arc<dyn Refiner>,
        file_source: Arc<dyn FileSource>,
        config: Config,
    ) -> Arc<Self> {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let orchestrator = Arc::new(JobOrchestrator::new(
            db.clone(),
            Arc::clone(&broadcaster),
            refiner,
            file_source,
            &config,
        ));
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            broadcaster,
            orchestrator,
            config,
        })
    }

    /// Seconds since the server started.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

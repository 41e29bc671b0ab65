//! API route handlers for the redraft server.

pub mod health;
pub mod jobs;
pub mod progress_ws;
pub mod versions;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router with all routes.
///
/// Routes:
/// - POST /jobs - Start a new refinement job
/// - GET /jobs - List jobs (filterable, newest first)
/// - GET /jobs/:id - Job snapshot
/// - GET /jobs/:id/events - Poll the event log from a sequence cursor
/// - GET /jobs/:id/stream - SSE stream of job events
/// - POST /jobs/:id/cancel - Request cooperative cancellation
/// - POST /jobs/:id/retry - Clone a finished job into a fresh run
/// - GET /ws/progress/:job_id - WebSocket framing of the event stream
/// - GET /files/:file_id/passes - Recorded pass numbers for a file
/// - GET /files/:file_id/versions/:pass - One snapshot's content
/// - GET /files/:file_id/diff - Changes between two passes
/// - GET /health - Health check
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(progress_ws::router())
        .merge(versions::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_state, StubRefiner};

    #[tokio::test]
    async fn test_api_routes_creation() {
        let state = test_state(StubRefiner::echo()).await;
        let _router = api_routes(state);
    }
}

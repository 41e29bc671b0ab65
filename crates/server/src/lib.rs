// crates/server/src/lib.rs
//! Redraft server library.
//!
//! This crate provides the Axum-based HTTP server for redraft: it starts
//! multi-pass refinement jobs, streams their progress over polling, SSE,
//! and WebSocket, and serves version snapshots and pass-to-pass diffs.

pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

#[cfg(test)]
pub mod test_support;

pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (jobs, event streams, versions, diffs, health)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_state, StubRefiner};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_app(test_state(StubRefiner::echo()).await);
        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
        assert!(body.contains("\"uptime_secs\""));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = create_app(test_state(StubRefiner::echo()).await);
        let (status, _) = get(app, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_jobs_empty() {
        let app = create_app(test_state(StubRefiner::echo()).await);
        let (status, body) = get(app, "/jobs").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["total"], 0);
        assert!(json["jobs"].as_array().unwrap().is_empty());
    }
}

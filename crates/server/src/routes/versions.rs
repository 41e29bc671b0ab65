// crates/server/src/routes/versions.rs
//! API routes for version snapshots and pass-to-pass diffs.
//!
//! - GET /files/{file_id}/passes — Recorded pass numbers for a file
//! - GET /files/{file_id}/versions/{pass} — One snapshot's content
//! - GET /files/{file_id}/diff?from=&to= — Changes between two passes

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use redraft_db::DbError;
use redraft_types::{Diff, Version};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct PassListResponse {
    pub file_id: String,
    pub passes: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: u32,
    pub to: u32,
}

/// GET /files/{file_id}/passes — Pass numbers with a recorded snapshot.
async fn list_passes(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<PassListResponse>, ApiError> {
    let passes = state.db.list_passes(&file_id).await?;
    if passes.is_empty() {
        return Err(ApiError::Database(DbError::NotFound {
            kind: "file",
            id: file_id,
        }));
    }
    Ok(Json(PassListResponse { file_id, passes }))
}

/// GET /files/{file_id}/versions/{pass} — One snapshot.
async fn get_version(
    State(state): State<Arc<AppState>>,
    Path((file_id, pass)): Path<(String, u32)>,
) -> Result<Json<Version>, ApiError> {
    Ok(Json(state.db.get_version(&file_id, pass).await?))
}

/// GET /files/{file_id}/diff?from=&to= — Diff between two recorded passes.
///
/// Both endpoints must exist; `from == to` yields the identity diff.
async fn diff_passes(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<Diff>, ApiError> {
    let from = state.db.get_version(&file_id, query.from).await?;
    let to = state.db.get_version(&file_id, query.to).await?;
    let diff = redraft_diff::compute(&file_id, query.from, query.to, &from.content, &to.content);
    Ok(Json(diff))
}

/// Build the versions router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files/{file_id}/passes", get(list_passes))
        .route("/files/{file_id}/versions/{pass}", get(get_version))
        .route("/files/{file_id}/diff", get(diff_passes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_state, StubRefiner};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().merge(router()).with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_passes_404_for_unknown_file() {
        let state = test_state(StubRefiner::echo()).await;
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/files/nope/passes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_passes_and_fetch_version() {
        let state = test_state(StubRefiner::echo()).await;
        state.db.put_version("f1", 0, "original").await.unwrap();
        state.db.put_version("f1", 1, "revised").await.unwrap();

        let app = app(state);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/files/f1/passes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["passes"], serde_json::json!([0, 1]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/files/f1/versions/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["content"], "revised");
    }

    #[tokio::test]
    async fn test_diff_between_passes() {
        let state = test_state(StubRefiner::echo()).await;
        state
            .db
            .put_version("f1", 0, "Intro.\n\nBody text.\n")
            .await
            .unwrap();
        state
            .db
            .put_version("f1", 1, "Intro.\n\nBetter body text.\n")
            .await
            .unwrap();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/files/f1/diff?from=0&to=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["fromPass"], 0);
        assert_eq!(json["toPass"], 1);
        assert_eq!(json["stats"]["modified"], 1);
        assert_eq!(json["stats"]["unchanged"], 1);
    }

    #[tokio::test]
    async fn test_diff_missing_endpoint_is_404() {
        let state = test_state(StubRefiner::echo()).await;
        state.db.put_version("f1", 0, "original").await.unwrap();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/files/f1/diff?from=0&to=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_diff_same_pass_is_identity() {
        let state = test_state(StubRefiner::echo()).await;
        state.db.put_version("f1", 0, "original").await.unwrap();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/files/f1/diff?from=0&to=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["stats"]["added"], 0);
        assert_eq!(json["stats"]["removed"], 0);
        assert_eq!(json["stats"]["modified"], 0);
    }
}

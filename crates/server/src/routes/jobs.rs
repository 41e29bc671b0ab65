// crates/server/src/routes/jobs.rs
//! API routes for refinement job management.
//!
//! - POST /jobs — Start a new refinement job
//! - GET /jobs — List jobs (filterable, newest first)
//! - GET /jobs/{id} — Job snapshot
//! - GET /jobs/{id}/events — Poll the event log from a sequence cursor
//! - GET /jobs/{id}/stream — SSE stream of job events
//! - POST /jobs/{id}/cancel — Request cooperative cancellation
//! - POST /jobs/{id}/retry — Clone a finished job into a fresh run

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use redraft_db::DbError;
use redraft_types::{Job, JobEvent, JobFilter, NewJob};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    pub events: Vec<JobEvent>,
    /// Cursor for the next poll: pass back as `?since=`.
    pub last_sequence: i64,
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since: i64,
}

/// POST /jobs — Create a job and start driving it.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewJob>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.db.create_job(&new).await?;
    info!(job_id = %job.id, file_id = %job.file_id, passes = job.total_passes, "job created");
    state.orchestrator.spawn(job.id.clone());
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs — List jobs, newest first. All filter fields optional.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.db.list_jobs(&filter).await?;
    let total = jobs.len();
    Ok(Json(JobListResponse { jobs, total }))
}

/// GET /jobs/{id} — Current job snapshot.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.db.get_job(&id).await?))
}

/// GET /jobs/{id}/events?since=N — Events with sequence > N, in order.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<EventListResponse>, ApiError> {
    // 404 for unknown jobs rather than an empty log.
    state.db.get_job(&id).await?;
    let events = state.db.list_events(&id, query.since).await?;
    let last_sequence = events.last().map(|e| e.sequence).unwrap_or(query.since);
    Ok(Json(EventListResponse {
        events,
        last_sequence,
    }))
}

/// GET /jobs/{id}/stream?since=N — SSE stream of job events.
///
/// Emits each event under its event-type name. The stream closes after a
/// terminal event, or after a `resync_required` event if the client fell
/// behind (reconnect with `?since=` to resync).
async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.db.get_job(&id).await?;
    let events = state
        .broadcaster
        .subscribe(state.db.clone(), id, query.since);

    let stream = events.map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(event.event_type.as_str()).data(json))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /jobs/{id}/cancel — Request cancellation.
///
/// Cancellation is cooperative: a running job stops at its next pass
/// boundary, so the returned snapshot may still read `processing`.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.orchestrator.cancel(&id).await?;
    Ok(Json(job))
}

/// POST /jobs/{id}/retry — Start a fresh job re-running a finished one.
///
/// The new job gets its own id and a clean event log; the source job is
/// referenced through `retryOf` in the new job's metadata.
async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let source = state.db.get_job(&id).await?;
    if !source.status.is_terminal() {
        return Err(ApiError::Database(DbError::Conflict(format!(
            "job {id} is still {}; cancel it before retrying",
            source.status
        ))));
    }

    let mut metadata = source.metadata.clone();
    if let Some(map) = metadata.as_object_mut() {
        map.insert("retryOf".to_string(), serde_json::json!(source.id));
    } else {
        metadata = serde_json::json!({ "retryOf": source.id });
    }

    let job = state
        .db
        .create_job(&NewJob {
            file_id: source.file_id,
            file_name: source.file_name,
            total_passes: source.total_passes,
            model: source.model,
            user_id: source.user_id,
            metadata,
        })
        .await?;
    info!(job_id = %job.id, retry_of = %id, "job retried");
    state.orchestrator.spawn(job.id.clone());
    Ok((StatusCode::CREATED, Json(job)))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/events", get(list_events))
        .route("/jobs/{id}/stream", get(stream_events))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/retry", post(retry_job))
}

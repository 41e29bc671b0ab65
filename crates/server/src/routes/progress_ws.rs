// crates/server/src/routes/progress_ws.rs
//! WebSocket framing of a job's event subscription.
//!
//! - GET /ws/progress/{job_id}?since=N — upgrade, then:
//!   - a `connected` hello frame,
//!   - one `event` frame per job event (catch-up spliced with live),
//!   - periodic `heartbeat` frames while the job is quiet,
//!   - a close frame after the terminal event (or a `resync_required`
//!     event if the subscriber lagged).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures_util::StreamExt;
use tracing::debug;

use redraft_types::JobEvent;

use crate::routes::jobs::SinceQuery;
use crate::state::AppState;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(15);

/// HTTP upgrade handler -- validates the job, then upgrades.
///
/// Unknown jobs still upgrade, send one `error` frame, and close: at this
/// point the HTTP handshake has been spent and a WebSocket reply is the
/// only channel the client is listening on.
async fn ws_progress_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<SinceQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let known = state.db.get_job(&job_id).await.is_ok();
    if !known {
        return ws.on_upgrade(move |mut socket| async move {
            let err_msg = serde_json::json!({
                "type": "error",
                "message": format!("Job '{}' not found", job_id),
            });
            let _ = socket.send(Message::Text(err_msg.to_string().into())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 4004,
                    reason: "Job not found".into(),
                })))
                .await;
        });
    }

    ws.on_upgrade(move |socket| handle_progress_ws(socket, state, job_id, query.since))
}

async fn handle_progress_ws(
    mut socket: WebSocket,
    state: Arc<AppState>,
    job_id: String,
    since: i64,
) {
    let hello = serde_json::json!({
        "type": "connected",
        "jobId": job_id,
    });
    if socket
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut events = Box::pin(
        state
            .broadcaster
            .subscribe(state.db.clone(), job_id.clone(), since),
    );
    let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
    heartbeat.reset(); // no heartbeat before the first period elapses

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            return; // client went away
                        }
                    }
                    None => break, // terminal event or resync delivered
                }
            }
            _ = heartbeat.tick() => {
                let frame = serde_json::json!({ "type": "heartbeat" });
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
            // Drain client frames so pings are answered; anything else from
            // the client (including close) ends the subscription.
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(other)) => {
                        debug!(job_id = %job_id, "ignoring client frame: {other:?}");
                    }
                    Some(Err(_)) => return,
                }
            }
        }
    }

    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: "Job finished".into(),
        })))
        .await;
}

async fn send_event(socket: &mut WebSocket, event: &JobEvent) -> Result<(), axum::Error> {
    let frame = serde_json::json!({
        "type": "event",
        "event": event,
    });
    socket.send(Message::Text(frame.to_string().into())).await
}

/// Build the progress WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws/progress/{job_id}", any(ws_progress_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_creation() {
        let _router = router();
    }

    #[test]
    fn test_hello_frame_shape() {
        let hello = serde_json::json!({
            "type": "connected",
            "jobId": "j1",
        });
        assert_eq!(hello["type"], "connected");
        assert_eq!(hello["jobId"], "j1");
    }
}

//! Progress polling and Server-Sent Events
//!
//! Mounted inside [`admin_routes`](crate::api::admin_routes), so the admin
//! token guards them like every other `/admin` path.

use axum::{
    extract::{Query, State},
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

use crate::services::ProgressEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewParams {
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "task".to_string()
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    #[serde(default)]
    pub id: String,
}

/// GET /admin/progress/new?tag=
pub async fn new_progress(
    State(state): State<AppState>,
    Query(params): Query<NewParams>,
) -> Json<Value> {
    let id = state.progress.create(&params.tag);
    Json(json!({ "id": id }))
}

/// GET /admin/progress/get?id=
///
/// Returns the record, or `{"missing": true}` for unknown or expired ids.
pub async fn get_progress(State(state): State<AppState>, Query(params): Query<IdParams>) -> Json<Value> {
    match state.progress.read(&params.id) {
        Some(record) => Json(serde_json::to_value(record).unwrap_or_else(|_| json!({}))),
        None => Json(json!({ "missing": true })),
    }
}

fn to_sse_event(event: ProgressEvent) -> Event {
    let name = event.event_name();
    let base = Event::default().event(name);
    let data = match &event {
        ProgressEvent::Progress(record) | ProgressEvent::Done(record) => base.json_data(record),
        ProgressEvent::Gone => base.json_data(json!({ "missing": true })),
    };
    data.unwrap_or_else(|e| {
        warn!(error = %e, "SSE: Failed to serialize progress event");
        Event::default().event(name)
    })
}

/// GET /admin/progress/stream?id=
///
/// Streams `progress` events until the task is done, then one `done` event.
/// Unknown ids get a single `gone` event.
pub async fn stream_progress(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Response {
    debug!(progress_id = %params.id, "SSE: progress subscriber connected");

    let stream = state
        .progress
        .subscribe(&params.id)
        .map(|event| Ok::<_, Infallible>(to_sse_event(event)));

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    );

    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        sse,
    )
        .into_response()
}

/// Progress routes (merged under the admin token layer)
pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/progress/new", get(new_progress))
        .route("/admin/progress/get", get(get_progress))
        .route("/admin/progress/stream", get(stream_progress))
}

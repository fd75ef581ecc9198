//! `/api/admin/*`: operator-facing introspection endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use stream_gateway_core::types::ActiveStreamSnapshot;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ListStreamsResponse {
    pub streams: Vec<ActiveStreamSnapshot>,
    pub count: usize,
}

pub async fn list_streams(State(state): State<Arc<AppState>>) -> Json<ListStreamsResponse> {
    let streams = state.stream_tracker.list();
    Json(ListStreamsResponse {
        count: streams.len(),
        streams,
    })
}

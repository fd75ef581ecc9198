//! `/video/hls/*` handlers: playlist, segment, keep-alive, status, seek.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stream_gateway_core::types::HlsSessionState;

use crate::error::Result;
use crate::http::cross_origin_headers;
use crate::state::AppState;

pub async fn serve_playlist(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let playlist = state.hls.serve_playlist(session_id)?;
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(
            axum::http::header::CONTENT_TYPE,
            "application/vnd.apple.mpegurl",
        )
        .body(Body::from(playlist))
        .unwrap();
    resp.headers_mut().extend(cross_origin_headers());
    Ok(resp)
}

pub async fn serve_segment(
    State(state): State<Arc<AppState>>,
    Path((session_id, segment)): Path<(Uuid, String)>,
) -> Result<Response> {
    let bytes = if segment == "init.mp4" {
        state.hls.serve_init_segment(session_id).await?
    } else {
        state.hls.serve_segment(session_id, &segment).await?
    };

    let content_type = if segment == "init.mp4" {
        "video/mp4"
    } else {
        "video/iso.segment"
    };

    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .unwrap();
    resp.headers_mut().extend(cross_origin_headers());
    Ok(resp)
}

pub async fn keep_alive(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.hls.keep_alive(session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "segmentsOnDisk")]
    pub segments_on_disk: u64,
    pub duration: Option<f64>,
    #[serde(rename = "startOffset")]
    pub start_offset: f64,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionStatusResponse>> {
    let snapshot = state.hls.get_session_status(session_id)?;
    Ok(Json(SessionStatusResponse {
        running: snapshot.state == HlsSessionState::Running,
        error: snapshot.error,
        segments_on_disk: snapshot.highest_segment_on_disk.map(|s| s + 1).unwrap_or(0),
        duration: snapshot.duration_secs,
        start_offset: snapshot.start_offset_secs,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SeekQuery {
    pub position: f64,
}

#[derive(Debug, Serialize)]
pub struct SeekResponse {
    #[serde(rename = "startOffset")]
    pub start_offset: f64,
}

pub async fn seek(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Query(q): Query<SeekQuery>,
) -> Result<Json<SeekResponse>> {
    let session = state.hls.seek(session_id, q.position).await?;
    Ok(Json(SeekResponse {
        start_offset: session.start_offset_secs,
    }))
}

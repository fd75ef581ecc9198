//! `/video/hls/{session_id}/subtitles.vtt`: the sidecar WebVTT track
//! attached to a running HLS session (distinct from the standalone
//! `/api/video/subtitle-extract` flow in `video.rs`, though both are
//! backed by the same `SubtitleManager`).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use uuid::Uuid;

use stream_gateway_core::error::GatewayError;

use crate::error::Result;
use crate::http::cross_origin_headers;
use crate::state::AppState;

pub async fn serve_session_vtt(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let hls_session = state.hls.get(session_id)?;
    if hls_session.selected_subtitle_track < 0 {
        return Err(GatewayError::not_found(format!(
            "hls session {session_id} has no subtitle track selected"
        ))
        .into());
    }

    let extraction = state
        .subtitles
        .get_or_create(
            &hls_session.source_path,
            hls_session.selected_subtitle_track as usize,
            hls_session.start_offset_secs,
        )
        .await?;
    let bytes = state.subtitles.serve_subtitles(&extraction).await?;

    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/vtt")
        .body(Body::from(bytes))
        .unwrap();
    resp.headers_mut().extend(cross_origin_headers());
    Ok(resp)
}

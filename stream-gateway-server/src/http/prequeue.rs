//! `/api/prequeue*` handlers: kick off the pre-playback pipeline, poll
//! its status, and start sidecar subtitle extraction once ready.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stream_gateway_core::error::GatewayError;
use stream_gateway_core::types::{MediaType, PrequeueStatus, TargetEpisode};

use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrequeueRequest {
    pub title_id: String,
    pub title_name: String,
    pub user_id: String,
    pub client_id: Option<String>,
    pub media_type: MediaType,
    pub year: Option<u32>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub start_offset: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrequeueResponse {
    pub prequeue_id: Uuid,
    pub target_episode: Option<TargetEpisode>,
    pub status: PrequeueStatus,
}

pub async fn create_prequeue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePrequeueRequest>,
) -> Result<Json<CreatePrequeueResponse>> {
    let requested_episode = match (req.season_number, req.episode_number) {
        (Some(s), Some(e)) => Some((s, e)),
        _ => None,
    };

    let handle = state.orchestrator.prequeue(
        req.title_id,
        req.title_name,
        req.user_id,
        req.client_id,
        req.media_type,
        req.year,
        requested_episode,
        req.start_offset.unwrap_or(0.0),
    );

    let entry = handle.lock().await;
    Ok(Json(CreatePrequeueResponse {
        prequeue_id: entry.id,
        target_episode: entry.target_episode,
        status: entry.status,
    }))
}

/// Cancels a still-running prequeue worker (and any HLS session it
/// already created) and drops the entry. Idempotent: cancelling an
/// already-gone entry 404s rather than erroring.
pub async fn cancel_prequeue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.prequeue_store.cancel(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::not_found(format!("prequeue entry {id}")).into())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrequeueStatusResponse {
    pub prequeue_id: Uuid,
    pub status: PrequeueStatus,
    pub target_episode: Option<TargetEpisode>,
    pub has_dolby_vision: bool,
    pub has_hdr10: bool,
    pub dolby_vision_profile: Option<String>,
    pub needs_audio_transcode: bool,
    pub selected_audio_track: i64,
    pub selected_subtitle_track: i64,
    pub duration_secs: Option<f64>,
    pub hls_session_id: Option<Uuid>,
    pub hls_playlist_url: Option<String>,
    pub error: Option<String>,
}

pub async fn get_prequeue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PrequeueStatusResponse>> {
    let handle = state
        .prequeue_store
        .get(id)
        .ok_or_else(|| GatewayError::not_found(format!("prequeue entry {id}")))?;
    let entry = handle.lock().await;

    Ok(Json(PrequeueStatusResponse {
        prequeue_id: entry.id,
        status: entry.status,
        target_episode: entry.target_episode,
        has_dolby_vision: entry.has_dolby_vision,
        has_hdr10: entry.has_hdr10,
        dolby_vision_profile: entry.dolby_vision_profile.clone(),
        needs_audio_transcode: entry.needs_audio_transcode,
        selected_audio_track: entry.selected_audio_track,
        selected_subtitle_track: entry.selected_subtitle_track,
        duration_secs: entry.duration_secs,
        hls_session_id: entry.hls_session_id,
        hls_playlist_url: entry.hls_playlist_url.clone(),
        error: entry.error.clone(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSubtitlesRequest {
    pub start_offset: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct StartSubtitlesResponse {
    #[serde(rename = "subtitleSessions")]
    pub subtitle_sessions: std::collections::HashMap<i64, SubtitleSessionRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleSessionRef {
    pub session_id: Uuid,
    pub vtt_url: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub codec: String,
    pub is_forced: bool,
    pub is_extracting: bool,
    pub first_cue_time: Option<f64>,
}

pub async fn start_subtitles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<StartSubtitlesRequest>,
) -> Result<Json<StartSubtitlesResponse>> {
    let handle = state
        .prequeue_store
        .get(id)
        .ok_or_else(|| GatewayError::not_found(format!("prequeue entry {id}")))?;

    let (source_path, subtitle_streams) = {
        let entry = handle.lock().await;
        if entry.status != PrequeueStatus::Ready {
            return Err(GatewayError::Conflict(format!(
                "prequeue entry {id} is not ready (status={:?})",
                entry.status
            ))
            .into());
        }
        let path = entry
            .stream_path
            .clone()
            .ok_or_else(|| GatewayError::Internal("ready entry missing stream_path".to_string()))?;
        (path, entry.subtitle_streams.clone())
    };

    let indices: Vec<usize> = subtitle_streams
        .iter()
        .filter(|s| !stream_gateway_core::subtitle::is_bitmap_subtitle(&s.codec))
        .map(|s| s.absolute_index)
        .collect();

    let start_offset = req.start_offset.unwrap_or(0.0);
    let results = state
        .subtitles
        .start_pre_extraction(&source_path, &indices, start_offset)
        .await;

    let mut subtitle_sessions = std::collections::HashMap::new();
    let mut entry = handle.lock().await;
    for (info, result) in subtitle_streams.iter().filter(|s| indices.contains(&s.absolute_index)).zip(results) {
        if let Ok(session) = result {
            let reference = stream_gateway_core::types::PrequeueSubtitleRef {
                session_id: session.id,
                vtt_url: format!("/api/video/subtitles/{}/subtitles.vtt", session.id),
                language: info.language.clone(),
                title: info.title.clone(),
                codec: info.codec.clone(),
                is_forced: info.forced,
                is_extracting: true,
                first_cue_time: None,
            };
            entry
                .subtitle_sessions
                .insert(info.absolute_index as i64, reference.clone());
            subtitle_sessions.insert(
                info.absolute_index as i64,
                SubtitleSessionRef {
                    session_id: reference.session_id,
                    vtt_url: reference.vtt_url,
                    language: reference.language,
                    title: reference.title,
                    codec: reference.codec,
                    is_forced: reference.is_forced,
                    is_extracting: reference.is_extracting,
                    first_cue_time: reference.first_cue_time,
                },
            );
        }
    }
    entry.touch();

    Ok(Json(StartSubtitlesResponse { subtitle_sessions }))
}

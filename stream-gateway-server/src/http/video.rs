//! `/api/video/*` handlers: direct/transmux streaming, HLS session
//! creation, probing, direct-URL passthrough, and subtitle extraction.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stream_gateway_core::error::GatewayError;
use stream_gateway_core::hls::CreateSessionParams;
use stream_gateway_core::provider::ByteRange;
use stream_gateway_core::track_selector::SelectionPreferences;
use stream_gateway_core::transmux;

use crate::error::{Result, ServerError};
use crate::http::cross_origin_headers;
use crate::http::stream_body::streamed_body;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub path: String,
    pub target: Option<String>,
    pub transmux: Option<String>,
    pub dv: Option<bool>,
}

fn parse_range(headers: &HeaderMap, total_hint: Option<u64>) -> Option<ByteRange> {
    let raw = headers.get(axum::http::header::RANGE)?.to_str().ok()?;
    let spec = raw.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    let start: u64 = start_s.parse().ok()?;
    let end = if end_s.is_empty() {
        None
    } else {
        end_s.parse().ok()
    };
    let _ = total_hint;
    Some(ByteRange { start, end })
}

pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StreamQuery>,
    headers: HeaderMap,
    method: axum::http::Method,
) -> Result<Response> {
    if q.path.starts_with("http://") || q.path.starts_with("https://") {
        return stream_external(state, q, headers, method).await;
    }

    let transmux_forced = q.transmux.as_deref() == Some("force") || q.dv.unwrap_or(false);
    let needs_transmux = transmux::requires_transmux(&q.path, q.target.as_deref(), transmux_forced);

    if needs_transmux {
        if method == axum::http::Method::HEAD {
            let mut resp = StatusCode::OK.into_response();
            resp.headers_mut().insert(
                axum::http::header::ACCEPT_RANGES,
                "none".parse().unwrap(),
            );
            return Ok(resp);
        }

        let probe = state
            .characteriser
            .probe(state.provider.as_ref(), &q.path)
            .await?;
        let audio_copy = probe
            .audio_streams
            .first()
            .map(|a| stream_gateway_core::track_selector::is_compatible_codec(&a.codec))
            .unwrap_or(true);
        let has_ac3_or_eac3_copy = audio_copy
            && probe
                .audio_streams
                .first()
                .map(|a| matches!(a.codec.as_str(), "ac3" | "eac3"))
                .unwrap_or(false);
        let text_subtitles = probe
            .subtitle_streams
            .iter()
            .filter(|s| matches!(s.codec.as_str(), "subrip" | "ass" | "ssa" | "mov_text"))
            .map(|s| s.absolute_index)
            .collect();

        let plan = transmux::TransmuxPlan {
            audio_copy,
            text_subtitle_absolute_indices: text_subtitles,
            has_ac3_or_eac3_copy,
        };

        let ffmpeg_bin = state.config.ffmpeg_bin.clone();
        let provider = state.provider.clone();
        let tracker = state.stream_tracker.clone();
        let path = q.path.clone();

        let body = streamed_body(move |writer| async move {
            if let Err(e) =
                transmux::serve(&ffmpeg_bin, provider.as_ref(), &path, &plan, writer, &tracker, None, None)
                    .await
            {
                tracing::warn!(error = %e, "transmux stream ended with error");
            }
        });

        let mut resp = Response::builder()
            .status(StatusCode::OK)
            .header(axum::http::header::CONTENT_TYPE, "video/mp4")
            .header(axum::http::header::ACCEPT_RANGES, "none")
            .body(body)
            .unwrap();
        resp.headers_mut().extend(cross_origin_headers());
        return Ok(resp);
    }

    let range = parse_range(&headers, None);

    if method == axum::http::Method::HEAD {
        let resp = state
            .provider
            .stream(&q.path, stream_gateway_core::provider::HttpMethod::Head, range)
            .await
            .map_err(GatewayError::from)?;
        let mut builder = Response::builder().status(if resp.status == 206 { 206 } else { 200 });
        if let Some(len) = resp.content_length {
            builder = builder.header(axum::http::header::CONTENT_LENGTH, len);
        }
        if let Some(cr) = &resp.content_range {
            builder = builder.header(axum::http::header::CONTENT_RANGE, cr.clone());
        }
        builder = builder.header(axum::http::header::ACCEPT_RANGES, "bytes");
        let mut out = builder.body(Body::empty()).unwrap();
        out.headers_mut().extend(cross_origin_headers());
        return Ok(out);
    }

    let provider = state.provider.clone();
    let tracker = state.stream_tracker.clone();
    let path = q.path.clone();
    let range_for_headers = range;

    // Probe headers up front (status/content-length/content-range) by
    // issuing the real provider call once and splitting its body off into
    // the streamed response; avoids a second upstream round-trip.
    let initial = provider
        .stream(&path, stream_gateway_core::provider::HttpMethod::Get, range_for_headers)
        .await
        .map_err(GatewayError::from)?;
    let status = initial.status;
    let content_type = initial.content_type.clone();
    let content_length = initial.content_length;
    let content_range = initial.content_range.clone();

    let body = streamed_body(move |writer| async move {
        let record = stream_gateway_core::types::ActiveStreamRecord::new(
            path.clone(),
            path.rsplit('/').next().unwrap_or(&path).to_string(),
            None,
            None,
            None,
            content_length,
            None,
        );
        let handle = tracker.register(record);
        if let Err(e) = stream_gateway_core::copy_loop::copy_with_disconnect_detection(
            initial.body,
            writer,
            content_length,
            Some(&handle),
        )
        .await
        {
            tracing::warn!(error = %e, "direct proxy stream ended with error");
        }
    });

    let mut builder = Response::builder().status(status);
    builder = builder.header(axum::http::header::ACCEPT_RANGES, "bytes");
    if let Some(ct) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    if let Some(len) = content_length {
        builder = builder.header(axum::http::header::CONTENT_LENGTH, len);
    }
    if let Some(cr) = content_range {
        builder = builder.header(axum::http::header::CONTENT_RANGE, cr);
    }
    let mut resp = builder.body(body).unwrap();
    resp.headers_mut().extend(cross_origin_headers());
    Ok(resp)
}

/// Pre-resolved third-party CDN URLs bypass the provider abstraction
/// entirely and go through the outbound proxy (C11) instead.
async fn stream_external(
    state: Arc<AppState>,
    q: StreamQuery,
    headers: HeaderMap,
    method: axum::http::Method,
) -> Result<Response> {
    let range_header = headers
        .get(axum::http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if method == axum::http::Method::HEAD {
        let target = stream_gateway_core::external_proxy::reencode_url(&q.path);
        let mut req = state.external_client.head(&target);
        if let Some(range) = &range_header {
            req = req.header("Range", range);
        }
        let upstream = req
            .send()
            .await
            .map_err(|e| ServerError::Gateway(GatewayError::BadGateway(e.to_string())))?;
        let mut builder = Response::builder().status(upstream.status().as_u16());
        if let Some(len) = upstream.content_length() {
            builder = builder.header(axum::http::header::CONTENT_LENGTH, len);
        }
        builder = builder.header(axum::http::header::ACCEPT_RANGES, "bytes");
        let mut out = builder.body(Body::empty()).unwrap();
        out.headers_mut().extend(cross_origin_headers());
        return Ok(out);
    }

    let client = state.external_client.clone();
    let tracker = state.stream_tracker.clone();
    let url = q.path.clone();

    let target = stream_gateway_core::external_proxy::reencode_url(&url);
    let mut req = client
        .get(&target)
        .header("User-Agent", "VLC/3.0.18 LibVLC/3.0.18")
        .header("Accept-Encoding", "identity");
    if let Some(range) = &range_header {
        req = req.header("Range", range.clone());
    }
    let upstream = req
        .send()
        .await
        .map_err(|e| ServerError::Gateway(GatewayError::BadGateway(e.to_string())))?;

    let status = upstream.status().as_u16();
    let content_type = upstream
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            stream_gateway_core::external_proxy::infer_content_type(&target).to_string()
        });
    let content_length = upstream.content_length();
    let content_range = upstream
        .headers()
        .get(axum::http::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = streamed_body(move |writer| async move {
        use futures_util::TryStreamExt;
        let record = stream_gateway_core::types::ActiveStreamRecord::new(
            target.clone(),
            target.rsplit('/').next().unwrap_or(&target).to_string(),
            None,
            None,
            None,
            content_length,
            Some("VLC/3.0.18 LibVLC/3.0.18".to_string()),
        );
        let handle = tracker.register(record);
        let body_stream = upstream
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        if let Err(e) = stream_gateway_core::copy_loop::copy_with_disconnect_detection(
            body_stream,
            writer,
            content_length,
            Some(&handle),
        )
        .await
        {
            tracing::warn!(error = %e, "external proxy stream ended with error");
        }
    });

    let mut builder = Response::builder().status(status);
    builder = builder.header(axum::http::header::ACCEPT_RANGES, "bytes");
    builder = builder.header(axum::http::header::CONTENT_TYPE, content_type);
    if let Some(len) = content_length {
        builder = builder.header(axum::http::header::CONTENT_LENGTH, len);
    }
    if let Some(cr) = content_range {
        builder = builder.header(axum::http::header::CONTENT_RANGE, cr);
    }
    let mut resp = builder.body(body).unwrap();
    resp.headers_mut().extend(cross_origin_headers());
    Ok(resp)
}

#[derive(Debug, Deserialize)]
pub struct HlsCreateQuery {
    pub path: String,
    pub dv: Option<bool>,
    #[serde(rename = "dvProfile")]
    pub dv_profile: Option<String>,
    pub hdr: Option<bool>,
    #[serde(rename = "forceAAC")]
    pub force_aac: Option<bool>,
    #[serde(rename = "startOffset")]
    pub start_offset: Option<f64>,
    #[serde(rename = "audioTrack")]
    pub audio_track: Option<i64>,
    #[serde(rename = "subtitleTrack")]
    pub subtitle_track: Option<i64>,
    #[serde(rename = "profileId")]
    pub profile_id: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HlsCreateResponse {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    #[serde(rename = "playlistUrl")]
    pub playlist_url: String,
    #[serde(rename = "startOffset")]
    pub start_offset: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(rename = "remainingDuration", skip_serializing_if = "Option::is_none")]
    pub remaining_duration: Option<f64>,
}

pub async fn create_hls_session(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HlsCreateQuery>,
) -> Result<Json<HlsCreateResponse>> {
    let policy = state.settings.hdr_policy().await;
    if policy == stream_gateway_core::types::HdrPolicy::IncludeHdr
        && q.dv_profile.as_deref().map(|p| p.starts_with("dvhe.05")).unwrap_or(false)
    {
        return Err(ServerError::Gateway(GatewayError::dv_profile_incompatible(
            q.dv_profile.as_deref().unwrap_or("dvhe.05"),
        )));
    }

    // Profile 7 has no device-reliable tag: always downgraded synchronously.
    let (has_dv, dv_profile) = match q.dv_profile.as_deref() {
        Some(p) if p.starts_with("dvhe.07") => (false, None),
        Some(p) => (q.dv.unwrap_or(false), Some(p.to_string())),
        None => (false, None),
    };

    let probe = state
        .characteriser
        .probe(state.provider.as_ref(), &q.path)
        .await?;

    let audio_idx = q.audio_track.unwrap_or_else(|| {
        stream_gateway_core::track_selector::select_audio_track(
            &probe.audio_streams,
            &SelectionPreferences::default(),
        )
    });
    let subtitle_idx = q.subtitle_track.unwrap_or(-1);

    let needs_transcode = audio_idx >= 0
        && probe
            .audio_streams
            .iter()
            .find(|a| a.absolute_index as i64 == audio_idx)
            .map(|a| !stream_gateway_core::track_selector::is_compatible_codec(&a.codec))
            .unwrap_or(false);

    let params = CreateSessionParams {
        source_path: q.path.clone(),
        original_path: q.path.clone(),
        has_dolby_vision: has_dv,
        dolby_vision_profile: dv_profile,
        has_hdr10: q.hdr.unwrap_or(probe.has_hdr10),
        force_aac: q.force_aac.unwrap_or(false),
        start_offset_secs: q.start_offset.unwrap_or(0.0),
        duration_secs: Some(probe.duration_secs),
        selected_audio_track: audio_idx,
        selected_subtitle_track: subtitle_idx,
        audio_needs_transcode: needs_transcode,
        profile_id: q.profile_id,
        profile_name: None,
        client_ip: None,
        user_agent: None,
    };

    let session = state.hls.create_session(params).await?;
    let remaining = session.duration_secs.map(|d| (d - session.start_offset_secs).max(0.0));

    Ok(Json(HlsCreateResponse {
        session_id: session.id,
        playlist_url: format!("/video/hls/{}/stream.m3u8", session.id),
        start_offset: session.start_offset_secs,
        duration: session.duration_secs,
        remaining_duration: remaining,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    #[serde(rename = "durationSecs")]
    pub duration_secs: f64,
    #[serde(rename = "hasDolbyVision")]
    pub has_dolby_vision: bool,
    #[serde(rename = "hasHDR10")]
    pub has_hdr10: bool,
    #[serde(rename = "dolbyVisionProfile")]
    pub dolby_vision_profile: Option<String>,
    #[serde(rename = "hasTrueHD")]
    pub has_truehd: bool,
    #[serde(rename = "hasCompatibleAudio")]
    pub has_compatible_audio: bool,
    #[serde(rename = "audioStreams")]
    pub audio_streams: Vec<stream_gateway_core::types::AudioStreamInfo>,
    #[serde(rename = "subtitleStreams")]
    pub subtitle_streams: Vec<stream_gateway_core::types::SubtitleStreamInfo>,
    #[serde(rename = "recommendedAudioTrack")]
    pub recommended_audio_track: i64,
    #[serde(rename = "recommendedSubtitleTrack")]
    pub recommended_subtitle_track: i64,
}

pub async fn probe(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PathQuery>,
) -> Result<Json<ProbeResponse>> {
    let result = state
        .characteriser
        .probe(state.provider.as_ref(), &q.path)
        .await?;
    let prefs = SelectionPreferences::default();
    let recommended_audio_track = stream_gateway_core::track_selector::select_audio_track(&result.audio_streams, &prefs);
    let recommended_subtitle_track =
        stream_gateway_core::track_selector::select_subtitle_track(&result.subtitle_streams, &prefs);

    Ok(Json(ProbeResponse {
        duration_secs: result.duration_secs,
        has_dolby_vision: result.has_dolby_vision,
        has_hdr10: result.has_hdr10,
        dolby_vision_profile: result.dolby_vision_profile,
        has_truehd: result.has_truehd,
        has_compatible_audio: result.has_compatible_audio,
        audio_streams: result.audio_streams,
        subtitle_streams: result.subtitle_streams,
        recommended_audio_track,
        recommended_subtitle_track,
    }))
}

#[derive(Debug, Serialize)]
pub struct DirectUrlResponse {
    pub url: String,
}

pub async fn direct_url(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PathQuery>,
) -> Response {
    let Some(cap) = state.provider.direct_url_capability() else {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    };
    match cap.get_direct_url(&q.path).await {
        Ok(url) => Json(DirectUrlResponse { url }).into_response(),
        Err(e) => ServerError::from(GatewayError::from(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubtitleExtractQuery {
    pub path: String,
    #[serde(rename = "subtitleTrack")]
    pub subtitle_track: usize,
    #[serde(rename = "startOffset")]
    pub start_offset: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SubtitleExtractResponse {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    #[serde(rename = "subtitleUrl")]
    pub subtitle_url: String,
}

pub async fn subtitle_extract(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SubtitleExtractQuery>,
) -> Result<Json<SubtitleExtractResponse>> {
    let session = state
        .subtitles
        .get_or_create(&q.path, q.subtitle_track, q.start_offset.unwrap_or(0.0))
        .await?;
    Ok(Json(SubtitleExtractResponse {
        session_id: session.id,
        subtitle_url: format!("/api/video/subtitles/{}/subtitles.vtt", session.id),
    }))
}

pub async fn serve_subtitle_extract(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let session = state
        .subtitles
        .get_by_id(session_id)
        .ok_or_else(|| GatewayError::not_found(format!("subtitle session {session_id}")))?;
    let bytes = state.subtitles.serve_subtitles(&session).await?;
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/vtt")
        .body(Body::from(bytes))
        .unwrap();
    resp.headers_mut().extend(cross_origin_headers());
    Ok(resp)
}

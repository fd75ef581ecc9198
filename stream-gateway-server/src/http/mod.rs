pub mod admin;
pub mod hls;
pub mod middleware;
pub mod prequeue;
pub mod stream_body;
pub mod subtitles;
pub mod video;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

const EXPOSE_HEADERS: &str =
    "Content-Length, Content-Range, Accept-Ranges, Content-Type, Content-Duration, X-Content-Duration, X-Filename";

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::DELETE])
        .expose_headers(
            EXPOSE_HEADERS
                .split(", ")
                .map(|h| HeaderName::try_from(h).unwrap())
                .collect::<Vec<_>>(),
        );

    Router::new()
        .route("/api/prequeue", post(prequeue::create_prequeue))
        .route(
            "/api/prequeue/{id}",
            get(prequeue::get_prequeue).delete(prequeue::cancel_prequeue),
        )
        .route(
            "/api/prequeue/{id}/subtitles",
            post(prequeue::start_subtitles),
        )
        .route(
            "/api/video/stream",
            get(video::stream).head(video::stream),
        )
        .route("/api/video/hls", post(video::create_hls_session))
        .route("/api/video/probe", get(video::probe))
        .route("/api/video/direct-url", get(video::direct_url))
        .route(
            "/api/video/subtitle-extract",
            post(video::subtitle_extract),
        )
        .route(
            "/api/video/subtitles/{session_id}/subtitles.vtt",
            get(video::serve_subtitle_extract),
        )
        .route(
            "/video/hls/{session_id}/stream.m3u8",
            get(hls::serve_playlist),
        )
        .route("/video/hls/{session_id}/{segment}", get(hls::serve_segment))
        .route(
            "/video/hls/{session_id}/subtitles.vtt",
            get(subtitles::serve_session_vtt),
        )
        .route(
            "/video/hls/{session_id}/keep-alive",
            post(hls::keep_alive),
        )
        .route("/video/hls/{session_id}/status", get(hls::status))
        .route("/video/hls/{session_id}/seek", post(hls::seek))
        .route("/api/admin/streams", get(admin::list_streams))
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .with_state(state)
}

pub(crate) fn cross_origin_headers() -> [(HeaderName, HeaderValue); 1] {
    [(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("cross-origin"),
    )]
}

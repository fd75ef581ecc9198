//! Subtitle Extraction Manager (C8): per-subtitle-track ffmpeg→WebVTT
//! sessions, keyed by path+track, reused across requests, progressively
//! served while extraction runs, idle-reaped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::ffmpeg_proc;
use crate::types::SubtitleExtractionSession;

const IDLE_THRESHOLD_SECS: u64 = 5 * 60;
const MINIMAL_VTT_HEADER: &str = "WEBVTT\n\n";

/// Bitmap subtitle codecs cannot be converted to WebVTT; callers must
/// exclude these from the extraction inventory entirely rather than
/// attempt extraction and fail.
pub fn is_bitmap_subtitle(codec: &str) -> bool {
    matches!(codec.to_lowercase().as_str(), "pgs" | "hdmv_pgs_subtitle" | "dvdsub" | "dvd_subtitle")
}

pub struct SubtitleManager {
    ffmpeg_bin: String,
    scratch_root: PathBuf,
    sessions: DashMap<(String, usize), Arc<SubtitleExtractionSession>>,
}

impl SubtitleManager {
    pub fn new(ffmpeg_bin: impl Into<String>, scratch_root: PathBuf) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            scratch_root,
            sessions: DashMap::new(),
        }
    }

    /// Returns the existing session for (path, track) if one exists,
    /// otherwise creates and spawns a new one. Calling this twice with
    /// the same key returns the same session id.
    pub async fn get_or_create(
        &self,
        source_path: &str,
        absolute_track_index: usize,
        start_offset_secs: f64,
    ) -> Result<Arc<SubtitleExtractionSession>> {
        let key = (source_path.to_string(), absolute_track_index);
        if let Some(existing) = self.sessions.get(&key) {
            return Ok(existing.clone());
        }

        let id = Uuid::new_v4();
        let output_dir = self.scratch_root.join(id.to_string());
        tokio::fs::create_dir_all(&output_dir).await?;
        let vtt_path = output_dir.join("subtitles.vtt");

        let session = Arc::new(SubtitleExtractionSession {
            id,
            source_path: source_path.to_string(),
            subtitle_track: absolute_track_index,
            output_dir: output_dir.clone(),
            vtt_path: vtt_path.clone(),
            created_at: crate::types::now_unix(),
            last_access: std::sync::atomic::AtomicU64::new(crate::types::now_unix()),
            first_cue_time: Mutex::new(None),
            extraction_done: std::sync::atomic::AtomicBool::new(false),
            extraction_err: Mutex::new(None),
        });

        // Race-safe insert: another concurrent caller may have beaten us
        // to it between the initial `get` and here.
        if let Some(existing) = self.sessions.get(&key) {
            let _ = tokio::fs::remove_dir_all(&output_dir).await;
            return Ok(existing.clone());
        }
        self.sessions.insert(key, session.clone());

        self.spawn_extraction(source_path, absolute_track_index, start_offset_secs, session.clone());

        Ok(session)
    }

    fn spawn_extraction(
        &self,
        source_path: &str,
        absolute_track_index: usize,
        start_offset_secs: f64,
        session: Arc<SubtitleExtractionSession>,
    ) {
        let ffmpeg_bin = self.ffmpeg_bin.clone();
        let source_path = source_path.to_string();

        tokio::spawn(async move {
            let mut args = vec![];
            if start_offset_secs > 0.0 {
                args.push("-ss".to_string());
                args.push(format!("{start_offset_secs:.3}"));
            }
            args.extend([
                "-i".to_string(),
                source_path,
                "-map".to_string(),
                format!("0:{absolute_track_index}"),
                "-c".to_string(),
                "webvtt".to_string(),
                "-f".to_string(),
                "webvtt".to_string(),
                "-flush_packets".to_string(),
                "1".to_string(),
                session.vtt_path.to_string_lossy().to_string(),
            ]);

            let result = ffmpeg_proc::spawn_long_lived(
                &ffmpeg_bin,
                &args,
                Stdio::null(),
                Stdio::null(),
                Stdio::piped(),
            );

            match result {
                Ok(mut child) => {
                    let mut stderr = child.stderr.take();
                    let status = child.wait().await;
                    match status {
                        Ok(s) if s.success() => {
                            if let Ok(first_line) =
                                tokio::fs::read_to_string(&session.vtt_path).await
                            {
                                *session.first_cue_time.lock() = parse_first_cue(&first_line);
                            }
                        }
                        Ok(s) => {
                            let tail = if let Some(stderr) = stderr.as_mut() {
                                ffmpeg_proc::read_stderr_tail(stderr).await
                            } else {
                                String::new()
                            };
                            error!(status = ?s, stderr = %tail, "subtitle extraction ffmpeg failed");
                            *session.extraction_err.lock() =
                                Some(format!("ffmpeg exited with {s}: {tail}"));
                        }
                        Err(e) => {
                            warn!(error = %e, "subtitle extraction wait() failed");
                            *session.extraction_err.lock() = Some(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    *session.extraction_err.lock() = Some(e.to_string());
                }
            }
            session
                .extraction_done
                .store(true, std::sync::atomic::Ordering::Relaxed);
        });
    }

    /// Spawns one extraction session per track concurrently, seeded with
    /// the resume offset.
    pub async fn start_pre_extraction(
        &self,
        source_path: &str,
        absolute_track_indices: &[usize],
        start_offset_secs: f64,
    ) -> Vec<Result<Arc<SubtitleExtractionSession>>> {
        let mut results = Vec::with_capacity(absolute_track_indices.len());
        for &idx in absolute_track_indices {
            results.push(
                self.get_or_create(source_path, idx, start_offset_secs)
                    .await,
            );
        }
        results
    }

    /// Reads whatever is currently on disk; serves the minimal header if
    /// extraction hasn't produced a file yet. Errors surface as 500.
    pub async fn serve_subtitles(&self, session: &SubtitleExtractionSession) -> Result<Vec<u8>> {
        session.touch();
        if let Some(err) = session.extraction_err.lock().clone() {
            return Err(GatewayError::Internal(err));
        }
        match tokio::fs::read(&session.vtt_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(MINIMAL_VTT_HEADER.as_bytes().to_vec())
            }
            Err(e) => Err(GatewayError::Io(e)),
        }
    }

    /// Linear scan by session id. Session cardinality is bounded by
    /// concurrently-active subtitle tracks, not requests, so this is cheap
    /// in practice; a secondary id index isn't worth the bookkeeping.
    pub fn get_by_id(&self, id: Uuid) -> Option<Arc<SubtitleExtractionSession>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.value().clone())
    }

    pub async fn reap_idle(&self) -> usize {
        let mut stale_keys = Vec::new();
        for entry in self.sessions.iter() {
            if entry.value().idle_secs() > IDLE_THRESHOLD_SECS {
                stale_keys.push(entry.key().clone());
            }
        }
        let count = stale_keys.len();
        for key in stale_keys {
            if let Some((_, session)) = self.sessions.remove(&key) {
                let _ = tokio::fs::remove_dir_all(&session.output_dir).await;
            }
        }
        count
    }
}

fn parse_first_cue(vtt: &str) -> Option<f64> {
    for line in vtt.lines() {
        if let Some((start, _)) = line.split_once(" --> ") {
            return parse_timestamp(start.trim());
        }
    }
    None
}

fn parse_timestamp(ts: &str) -> Option<f64> {
    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].replace(',', ".").parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_subtitle_codecs_are_excluded() {
        assert!(is_bitmap_subtitle("pgs"));
        assert!(is_bitmap_subtitle("DVDSUB"));
        assert!(!is_bitmap_subtitle("subrip"));
    }

    #[test]
    fn parses_first_cue_timestamp_from_vtt() {
        let vtt = "WEBVTT\n\n00:01:02.500 --> 00:01:05.000\nHello\n";
        assert_eq!(parse_first_cue(vtt), Some(62.5));
    }

    #[test]
    fn missing_cue_returns_none() {
        assert_eq!(parse_first_cue("WEBVTT\n\n"), None);
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_path_and_track() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SubtitleManager::new("ffmpeg", dir.path().to_path_buf());
        let a = manager.get_or_create("/m/x.mkv", 3, 0.0).await.unwrap();
        let b = manager.get_or_create("/m/x.mkv", 3, 0.0).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn serve_subtitles_returns_minimal_header_before_extraction_writes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SubtitleManager::new("ffmpeg", dir.path().to_path_buf());
        let session = manager.get_or_create("/m/y.mkv", 2, 0.0).await.unwrap();
        // Not asserting on the background extraction outcome (requires a
        // real ffmpeg binary); only that the not-yet-written path serves
        // the header rather than erroring.
        if !session.vtt_path.exists() {
            let bytes = manager.serve_subtitles(&session).await.unwrap();
            assert_eq!(bytes, MINIMAL_VTT_HEADER.as_bytes());
        }
    }
}

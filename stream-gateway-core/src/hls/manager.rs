//! HLS Session Manager (C5): creates, serves, keeps alive, seeks, and
//! evicts HLS sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::hls::playlist::generate_main_playlist;
use crate::hls::session::{CreateSessionParams, HlsSession};
use crate::types::{HlsSessionSnapshot, HlsSessionState};

pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 5 * 60;

pub struct HlsSessionManager {
    ffmpeg_bin: String,
    scratch_root: PathBuf,
    sessions: DashMap<Uuid, Arc<HlsSession>>,
    idle_threshold_secs: u64,
}

impl HlsSessionManager {
    pub fn new(ffmpeg_bin: impl Into<String>, scratch_root: PathBuf) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            scratch_root,
            sessions: DashMap::new(),
            idle_threshold_secs: DEFAULT_IDLE_THRESHOLD_SECS,
        }
    }

    pub async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<Arc<HlsSession>> {
        let output_dir = self.scratch_root.join(Uuid::new_v4().to_string());
        let session = HlsSession::create(&self.ffmpeg_bin, output_dir, params).await?;
        self.sessions.insert(session.id, session.clone());
        info!(session_id = %session.id, "hls session created");
        Ok(session)
    }

    pub fn get(&self, session_id: Uuid) -> Result<Arc<HlsSession>> {
        self.sessions
            .get(&session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::not_found(format!("hls session {session_id}")))
    }

    pub fn serve_playlist(&self, session_id: Uuid) -> Result<String> {
        let session = self.get(session_id)?;
        session.touch();
        let vod_complete = session.state() == HlsSessionState::Exited;
        Ok(generate_main_playlist(
            session.counters.highest_segment(),
            vod_complete,
        ))
    }

    /// Serves a segment from disk, waiting a short bounded interval if the
    /// requested segment is the next-expected one and still being
    /// written.
    pub async fn serve_segment(&self, session_id: Uuid, segment_name: &str) -> Result<Vec<u8>> {
        let session = self.get(session_id)?;
        session.touch();

        let path = session.output_dir.join(segment_name);
        for _ in 0..20 {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    session
                        .counters
                        .segments_served
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return Ok(bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !is_plausibly_pending(&session, segment_name) {
                        return Err(GatewayError::not_found(segment_name.to_string()));
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => return Err(GatewayError::Io(e)),
            }
        }
        Err(GatewayError::not_found(segment_name.to_string()))
    }

    pub async fn serve_init_segment(&self, session_id: Uuid) -> Result<Vec<u8>> {
        let session = self.get(session_id)?;
        session.touch();
        tokio::fs::read(session.output_dir.join("init.mp4"))
            .await
            .map_err(GatewayError::Io)
    }

    pub fn keep_alive(&self, session_id: Uuid) -> Result<()> {
        let session = self.get(session_id)?;
        session.touch();
        Ok(())
    }

    pub fn get_session_status(&self, session_id: Uuid) -> Result<HlsSessionSnapshot> {
        let session = self.get(session_id)?;
        Ok(session.snapshot())
    }

    /// Stops the current ffmpeg, purges existing segments, and launches a
    /// new process seeked to `position_secs` under the same session id so
    /// the caller's playlist URL keeps working across the seek.
    pub async fn seek(&self, session_id: Uuid, position_secs: f64) -> Result<Arc<HlsSession>> {
        let old = self.get(session_id)?;
        old.stop().await;

        let mut entries = tokio::fs::read_dir(&old.output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }

        let params = CreateSessionParams {
            source_path: old.source_path.clone(),
            original_path: old.original_path.clone(),
            has_dolby_vision: old.has_dolby_vision,
            dolby_vision_profile: old.dolby_vision_profile.clone(),
            has_hdr10: old.has_hdr10,
            force_aac: old.force_aac,
            start_offset_secs: position_secs,
            duration_secs: old.duration_secs,
            selected_audio_track: old.selected_audio_track,
            selected_subtitle_track: old.selected_subtitle_track,
            audio_needs_transcode: old.force_aac,
            profile_id: old.profile_id.clone(),
            profile_name: old.profile_name.clone(),
            client_ip: old.client_ip.clone(),
            user_agent: old.user_agent.clone(),
        };

        let new_session =
            HlsSession::create_with_id(session_id, &self.ffmpeg_bin, old.output_dir.clone(), params)
                .await?;
        self.sessions.insert(session_id, new_session.clone());
        Ok(new_session)
    }

    pub async fn cleanup_session(&self, session_id: Uuid) -> Result<()> {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            session.cleanup().await;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.cleanup_session(id).await;
        }
    }

    /// Scans sessions and evicts any idle beyond the threshold. Intended
    /// to be driven by a periodic background task.
    pub async fn reap_idle(&self) -> usize {
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|e| e.value().idle_secs() > self.idle_threshold_secs)
            .map(|e| *e.key())
            .collect();
        let count = stale.len();
        for id in stale {
            let _ = self.cleanup_session(id).await;
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn is_plausibly_pending(session: &HlsSession, segment_name: &str) -> bool {
    let requested: Option<u64> = segment_name
        .strip_prefix("segment")
        .and_then(|s| s.strip_suffix(".m4s"))
        .and_then(|s| s.parse().ok());
    match requested {
        Some(seq) => {
            let next_expected = session.counters.highest_segment().map(|h| h + 1).unwrap_or(0);
            seq <= next_expected && session.state() == HlsSessionState::Running
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_unknown_session_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = HlsSessionManager::new("ffmpeg", dir.path().to_path_buf());
        let err = manager.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn session_count_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let manager = HlsSessionManager::new("ffmpeg", dir.path().to_path_buf());
        assert_eq!(manager.session_count(), 0);
    }
}

//! Shared data model: prequeue entries, HLS sessions, probe results,
//! subtitle extraction sessions, and active stream records.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// HDR/Dolby-Vision compatibility policy, configured server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HdrPolicy {
    IncludeHdrDv,
    IncludeHdr,
    SdrOnly,
}

impl Default for HdrPolicy {
    fn default() -> Self {
        HdrPolicy::IncludeHdrDv
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetEpisode {
    pub season_number: u32,
    pub episode_number: u32,
    /// Resolved absolute-episode number, for anime series indexed that way.
    pub absolute_episode: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrequeueStatus {
    Queued,
    Searching,
    Resolving,
    Probing,
    Ready,
    Failed,
}

impl PrequeueStatus {
    /// Status is monotonic except the one-shot move into `Failed`.
    pub fn can_transition_to(self, next: PrequeueStatus) -> bool {
        use PrequeueStatus::*;
        if next == Failed {
            return self != Failed;
        }
        matches!(
            (self, next),
            (Queued, Searching)
                | (Searching, Resolving)
                | (Resolving, Probing)
                | (Probing, Ready)
                | (Queued, Queued)
                | (Searching, Searching)
                | (Resolving, Resolving)
                | (Probing, Probing)
                | (Ready, Ready)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub absolute_index: usize,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub channels: u16,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleStreamInfo {
    pub absolute_index: usize,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub forced: bool,
    pub is_default: bool,
}

/// Unified probe result, distilled from raw ffprobe JSON. Opaque to
/// downstream consumers and safe to cache (never the raw JSON — see C2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedProbeResult {
    pub duration_secs: f64,
    pub has_dolby_vision: bool,
    pub has_hdr10: bool,
    pub dolby_vision_profile: Option<String>,
    pub has_truehd: bool,
    pub has_compatible_audio: bool,
    pub audio_streams: Vec<AudioStreamInfo>,
    pub subtitle_streams: Vec<SubtitleStreamInfo>,
}

impl UnifiedProbeResult {
    pub fn needs_hls(&self) -> bool {
        self.has_dolby_vision || self.has_hdr10 || self.has_truehd
    }
}

/// Per-relative-index sidecar subtitle session attached to a prequeue
/// entry once `StartSubtitles` has been called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrequeueSubtitleRef {
    pub session_id: Uuid,
    pub vtt_url: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub codec: String,
    pub is_forced: bool,
    pub is_extracting: bool,
    pub first_cue_time: Option<f64>,
}

/// Prequeue entry — the pre-playback pipeline's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrequeueEntry {
    pub id: Uuid,
    pub title_id: String,
    pub title_name: String,
    pub user_id: String,
    pub client_id: Option<String>,
    pub media_type: MediaType,
    pub year: Option<u32>,
    pub target_episode: Option<TargetEpisode>,
    pub status: PrequeueStatus,
    pub stream_path: Option<String>,
    pub file_size: Option<u64>,
    pub health_status: Option<String>,
    pub has_dolby_vision: bool,
    pub has_hdr10: bool,
    pub dolby_vision_profile: Option<String>,
    pub needs_audio_transcode: bool,
    /// Absolute stream index, or -1 if nothing matched.
    pub selected_audio_track: i64,
    pub selected_subtitle_track: i64,
    pub duration_secs: Option<f64>,
    pub audio_streams: Vec<AudioStreamInfo>,
    pub subtitle_streams: Vec<SubtitleStreamInfo>,
    pub hls_session_id: Option<Uuid>,
    pub hls_playlist_url: Option<String>,
    pub subtitle_sessions: std::collections::HashMap<i64, PrequeueSubtitleRef>,
    pub error: Option<String>,
    pub created_at: u64,
    pub last_touched: u64,
    /// Cancels the orchestrator worker driving this entry (and tears down
    /// anything it already spawned, e.g. an HLS session) on explicit
    /// cancel or TTL eviction. Not part of the wire representation.
    #[serde(skip, default = "CancellationToken::new")]
    pub cancel_token: CancellationToken,
}

impl PrequeueEntry {
    pub fn new(
        title_id: String,
        title_name: String,
        user_id: String,
        client_id: Option<String>,
        media_type: MediaType,
        year: Option<u32>,
    ) -> Self {
        let now = now_unix();
        Self {
            id: Uuid::new_v4(),
            title_id,
            title_name,
            user_id,
            client_id,
            media_type,
            year,
            target_episode: None,
            status: PrequeueStatus::Queued,
            stream_path: None,
            file_size: None,
            health_status: None,
            has_dolby_vision: false,
            has_hdr10: false,
            dolby_vision_profile: None,
            needs_audio_transcode: false,
            selected_audio_track: -1,
            selected_subtitle_track: -1,
            duration_secs: None,
            audio_streams: Vec::new(),
            subtitle_streams: Vec::new(),
            hls_session_id: None,
            hls_playlist_url: None,
            subtitle_sessions: std::collections::HashMap::new(),
            error: None,
            created_at: now,
            last_touched: now,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Requests cancellation of the worker driving this entry.
    pub fn request_cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Attempts a status transition, enforcing monotonicity. Returns false
    /// (no-op) on an invalid transition rather than panicking — callers
    /// treat that as a logic bug to log, not crash on.
    pub fn transition(&mut self, next: PrequeueStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.touch();
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = PrequeueStatus::Failed;
        self.error = Some(error.into());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_touched = now_unix();
    }

    pub fn idle_secs(&self) -> u64 {
        now_unix().saturating_sub(self.last_touched)
    }
}

/// Running state of an HLS session's ffmpeg process, as observed by
/// `GetSessionStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HlsSessionState {
    Running,
    Exited,
    Errored,
}

/// HLS session record. The ffmpeg `Child` handle lives in
/// `crate::hls::session::HlsSession` (not serializable); this type is the
/// snapshot shape returned to callers and serialized into status
/// responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsSessionSnapshot {
    pub id: Uuid,
    pub source_path: String,
    pub original_path: String,
    pub created_at: u64,
    pub last_access: u64,
    pub start_offset_secs: f64,
    pub duration_secs: Option<f64>,
    pub segments_created: u64,
    pub segments_served: u64,
    pub highest_segment_on_disk: Option<u64>,
    pub has_dolby_vision: bool,
    pub dolby_vision_profile: Option<String>,
    pub has_hdr10: bool,
    pub force_aac: bool,
    pub selected_audio_track: i64,
    pub selected_subtitle_track: i64,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub bytes_written: u64,
    pub state: HlsSessionState,
    pub error: Option<String>,
}

/// Atomically-updated counters shared between the session actor task and
/// the HTTP handlers that read session status.
#[derive(Debug)]
pub struct SessionCounters {
    pub last_access: AtomicU64,
    pub segments_created: AtomicU64,
    pub segments_served: AtomicU64,
    pub highest_segment_on_disk: AtomicI64,
    pub bytes_written: AtomicU64,
    pub running: AtomicBool,
    pub errored: AtomicBool,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self {
            last_access: AtomicU64::new(now_unix()),
            segments_created: AtomicU64::new(0),
            segments_served: AtomicU64::new(0),
            highest_segment_on_disk: AtomicI64::new(-1),
            bytes_written: AtomicU64::new(0),
            running: AtomicBool::new(true),
            errored: AtomicBool::new(false),
        }
    }
}

impl SessionCounters {
    pub fn touch(&self) {
        self.last_access.store(now_unix(), Ordering::Relaxed);
    }

    pub fn idle_secs(&self) -> u64 {
        now_unix().saturating_sub(self.last_access.load(Ordering::Relaxed))
    }

    pub fn highest_segment(&self) -> Option<u64> {
        let v = self.highest_segment_on_disk.load(Ordering::Relaxed);
        if v < 0 {
            None
        } else {
            Some(v as u64)
        }
    }

    pub fn note_segment_written(&self, seq: u64) {
        self.segments_created.fetch_add(1, Ordering::Relaxed);
        self.highest_segment_on_disk
            .fetch_max(seq as i64, Ordering::Relaxed);
    }
}

/// Per-subtitle-track ffmpeg-to-WebVTT extraction session.
#[derive(Debug)]
pub struct SubtitleExtractionSession {
    pub id: Uuid,
    pub source_path: String,
    pub subtitle_track: usize,
    pub output_dir: PathBuf,
    pub vtt_path: PathBuf,
    pub created_at: u64,
    pub last_access: AtomicU64,
    pub first_cue_time: parking_lot::Mutex<Option<f64>>,
    pub extraction_done: AtomicBool,
    pub extraction_err: parking_lot::Mutex<Option<String>>,
}

impl SubtitleExtractionSession {
    pub fn touch(&self) {
        self.last_access.store(now_unix(), Ordering::Relaxed);
    }

    pub fn idle_secs(&self) -> u64 {
        now_unix().saturating_sub(self.last_access.load(Ordering::Relaxed))
    }
}

/// Active stream record (C10), registered when a proxy or HLS session
/// begins writing bytes to a client.
#[derive(Debug)]
pub struct ActiveStreamRecord {
    pub id: Uuid,
    pub path: String,
    pub filename: String,
    pub client_ip: Option<String>,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub start_time: u64,
    pub last_activity: AtomicU64,
    pub bytes_streamed: AtomicU64,
    pub content_length: Option<u64>,
    pub user_agent: Option<String>,
}

impl ActiveStreamRecord {
    pub fn new(
        path: impl Into<String>,
        filename: impl Into<String>,
        client_ip: Option<String>,
        profile_id: Option<String>,
        profile_name: Option<String>,
        content_length: Option<u64>,
        user_agent: Option<String>,
    ) -> Self {
        let now = now_unix();
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            filename: filename.into(),
            client_ip,
            profile_id,
            profile_name,
            start_time: now,
            last_activity: AtomicU64::new(now),
            bytes_streamed: AtomicU64::new(0),
            content_length,
            user_agent,
        }
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_streamed.fetch_add(n, Ordering::Relaxed);
        self.last_activity.store(now_unix(), Ordering::Relaxed);
    }
}

/// Snapshot form of `ActiveStreamRecord`, serializable for the admin
/// listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveStreamSnapshot {
    pub id: Uuid,
    pub path: String,
    pub filename: String,
    pub client_ip: Option<String>,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub start_time: u64,
    pub last_activity: u64,
    pub bytes_streamed: u64,
    pub content_length: Option<u64>,
    pub user_agent: Option<String>,
}

impl From<&ActiveStreamRecord> for ActiveStreamSnapshot {
    fn from(r: &ActiveStreamRecord) -> Self {
        Self {
            id: r.id,
            path: r.path.clone(),
            filename: r.filename.clone(),
            client_ip: r.client_ip.clone(),
            profile_id: r.profile_id.clone(),
            profile_name: r.profile_name.clone(),
            start_time: r.start_time,
            last_activity: r.last_activity.load(Ordering::Relaxed),
            bytes_streamed: r.bytes_streamed.load(Ordering::Relaxed),
            content_length: r.content_length,
            user_agent: r.user_agent.clone(),
        }
    }
}

pub type Shared<T> = Arc<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic_except_failed() {
        assert!(PrequeueStatus::Queued.can_transition_to(PrequeueStatus::Searching));
        assert!(PrequeueStatus::Probing.can_transition_to(PrequeueStatus::Ready));
        assert!(!PrequeueStatus::Ready.can_transition_to(PrequeueStatus::Queued));
        assert!(!PrequeueStatus::Probing.can_transition_to(PrequeueStatus::Searching));
        assert!(PrequeueStatus::Searching.can_transition_to(PrequeueStatus::Failed));
        assert!(!PrequeueStatus::Failed.can_transition_to(PrequeueStatus::Failed));
    }

    #[test]
    fn entry_transition_rejects_backward_moves() {
        let mut entry = PrequeueEntry::new(
            "tmdb:tv:1400".into(),
            "Seinfeld".into(),
            "u1".into(),
            None,
            MediaType::Series,
            None,
        );
        assert!(entry.transition(PrequeueStatus::Searching));
        assert!(entry.transition(PrequeueStatus::Resolving));
        assert!(!entry.transition(PrequeueStatus::Queued));
        assert_eq!(entry.status, PrequeueStatus::Resolving);
    }

    #[test]
    fn entry_fail_is_always_reachable() {
        let mut entry = PrequeueEntry::new(
            "tmdb:movie:1".into(),
            "Film".into(),
            "u1".into(),
            None,
            MediaType::Movie,
            None,
        );
        entry.fail("indexer unreachable");
        assert_eq!(entry.status, PrequeueStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("indexer unreachable"));
    }

    #[test]
    fn needs_hls_true_when_any_hdr_flag_set() {
        let mut probe = UnifiedProbeResult {
            duration_secs: 100.0,
            has_dolby_vision: false,
            has_hdr10: false,
            dolby_vision_profile: None,
            has_truehd: false,
            has_compatible_audio: true,
            audio_streams: vec![],
            subtitle_streams: vec![],
        };
        assert!(!probe.needs_hls());
        probe.has_truehd = true;
        assert!(probe.needs_hls());
    }

    #[test]
    fn session_counters_track_highest_segment_monotonically() {
        let counters = SessionCounters::default();
        assert_eq!(counters.highest_segment(), None);
        counters.note_segment_written(3);
        counters.note_segment_written(1);
        assert_eq!(counters.highest_segment(), Some(3));
    }
}

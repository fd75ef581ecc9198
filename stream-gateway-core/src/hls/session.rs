//! A single HLS session modeled as an owning actor: one task supervises
//! the ffmpeg `Child` handle; external callers interact only through
//! `HlsSession`'s thread-safe methods, never the raw process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ProcessError, Result};
use crate::ffmpeg_proc;
use crate::types::{HlsSessionSnapshot, HlsSessionState, SessionCounters};

const SIGTERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub source_path: String,
    pub original_path: String,
    pub has_dolby_vision: bool,
    pub dolby_vision_profile: Option<String>,
    pub has_hdr10: bool,
    pub force_aac: bool,
    pub start_offset_secs: f64,
    pub duration_secs: Option<f64>,
    pub selected_audio_track: i64,
    pub selected_subtitle_track: i64,
    pub audio_needs_transcode: bool,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Builds the ffmpeg argument plan for HLS mode: never piped (seekable
/// input required), `-ss` before `-i`, video passthrough with DV/HEVC
/// tagging, conditional AAC transcode, fragmented-MP4 segment output.
pub fn build_ffmpeg_args(params: &CreateSessionParams, output_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();

    if params.start_offset_secs > 0.0 {
        args.push("-ss".into());
        args.push(format!("{:.3}", params.start_offset_secs));
    }
    args.push("-i".into());
    args.push(params.source_path.clone());

    args.push("-map".into());
    args.push("0:v:0".into());
    args.push("-c:v".into());
    args.push("copy".into());

    if params.has_dolby_vision && params.dolby_vision_profile.is_some() {
        args.push("-tag:v".into());
        args.push("dvh1".into());
        args.push("-vf".into());
        args.push(
            "setparams=colorspace=bt2020nc:color_primaries=bt2020:color_trc=smpte2084".into(),
        );
    } else {
        args.push("-tag:v".into());
        args.push("hvc1".into());
    }

    if params.selected_audio_track >= 0 {
        args.push("-map".into());
        args.push(format!("0:{}", params.selected_audio_track));
        if params.force_aac || params.audio_needs_transcode {
            args.push("-c:a".into());
            args.push("aac".into());
            args.push("-b:a".into());
            args.push("192k".into());
        } else {
            args.push("-c:a".into());
            args.push("copy".into());
        }
    }

    args.push("-f".into());
    args.push("hls".into());
    args.push("-hls_segment_type".into());
    args.push("fmp4".into());
    args.push("-hls_time".into());
    args.push("6".into());
    args.push("-hls_flags".into());
    args.push("independent_segments".into());
    args.push("-hls_fmp4_init_filename".into());
    args.push("init.mp4".into());
    args.push("-hls_segment_filename".into());
    args.push(
        output_dir
            .join("segment%d.m4s")
            .to_string_lossy()
            .to_string(),
    );
    args.push(output_dir.join("stream.m3u8").to_string_lossy().to_string());

    args
}

pub struct HlsSession {
    pub id: Uuid,
    pub source_path: String,
    pub original_path: String,
    pub output_dir: PathBuf,
    pub created_at: u64,
    pub start_offset_secs: f64,
    pub duration_secs: Option<f64>,
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
    pub counters: Arc<SessionCounters>,
    /// Fires to ask the supervisor to tear the child down; `stop()` is the
    /// only caller. `Notify` buffers at most one permit, which is exactly
    /// what lets `stop()` race-free against a supervisor that's already
    /// about to exit on its own.
    stop_requested: Notify,
    /// Fires once from the supervisor task after the child has actually
    /// exited (naturally or via `stop_requested`), so `stop()` can await a
    /// real exit instead of contending with the supervisor for a lock.
    finished: Notify,
    /// Serializes concurrent `stop()` callers; never touched by the
    /// supervisor, so it can never be held across the supervisor's
    /// `child.wait()`.
    stop_lock: AsyncMutex<()>,
    error: parking_lot::Mutex<Option<String>>,
}

impl HlsSession {
    pub async fn create(
        ffmpeg_bin: &str,
        output_dir: PathBuf,
        params: CreateSessionParams,
    ) -> Result<Arc<Self>> {
        Self::create_with_id(Uuid::new_v4(), ffmpeg_bin, output_dir, params).await
    }

    /// Like [`create`](Self::create) but with an explicit session id;
    /// `HlsSessionManager::seek` uses this so a reopened session keeps the
    /// same id (and therefore the same playlist URL) as the one it
    /// replaces.
    pub async fn create_with_id(
        id: Uuid,
        ffmpeg_bin: &str,
        output_dir: PathBuf,
        params: CreateSessionParams,
    ) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&output_dir).await?;

        let args = build_ffmpeg_args(&params, &output_dir);
        let child = ffmpeg_proc::spawn_long_lived(
            ffmpeg_bin,
            &args,
            Stdio::null(),
            Stdio::null(),
            Stdio::piped(),
        )?;

        let session = Arc::new(Self {
            id,
            source_path: params.source_path,
            original_path: params.original_path,
            output_dir,
            created_at: crate::types::now_unix(),
            start_offset_secs: params.start_offset_secs,
            duration_secs: params.duration_secs,
            has_dolby_vision: params.has_dolby_vision,
            dolby_vision_profile: params.dolby_vision_profile,
            has_hdr10: params.has_hdr10,
            force_aac: params.force_aac,
            selected_audio_track: params.selected_audio_track,
            selected_subtitle_track: params.selected_subtitle_track,
            profile_id: params.profile_id,
            profile_name: params.profile_name,
            client_ip: params.client_ip,
            user_agent: params.user_agent,
            counters: Arc::new(SessionCounters::default()),
            stop_requested: Notify::new(),
            finished: Notify::new(),
            stop_lock: AsyncMutex::new(()),
            error: parking_lot::Mutex::new(None),
        });

        session.clone().spawn_supervisor(child);
        session.clone().spawn_disk_watcher();

        Ok(session)
    }

    /// Supervises the ffmpeg process: waits for exit (or an explicit stop
    /// request) and records non-zero status as an error on the session
    /// (does NOT tear the session down — already-written segments remain
    /// servable). Owns the `Child` outright so `stop()` never has to
    /// contend with this task's `wait()` for a shared lock.
    fn spawn_supervisor(self: Arc<Self>, mut child: Child) {
        tokio::spawn(async move {
            let mut stderr = child.stderr.take();

            enum Outcome {
                Exited(std::io::Result<std::process::ExitStatus>),
                Stopped,
            }

            let outcome = tokio::select! {
                status = child.wait() => Outcome::Exited(status),
                _ = self.stop_requested.notified() => {
                    ffmpeg_proc::terminate(child, SIGTERM_GRACE).await;
                    Outcome::Stopped
                }
            };

            self.counters.running.store(false, Ordering::Relaxed);

            match outcome {
                Outcome::Exited(Ok(s)) if s.success() => {
                    info!(session_id = %self.id, "hls ffmpeg exited cleanly");
                }
                Outcome::Exited(Ok(s)) => {
                    let tail = if let Some(stderr) = stderr.as_mut() {
                        ffmpeg_proc::read_stderr_tail(stderr).await
                    } else {
                        String::new()
                    };
                    warn!(session_id = %self.id, status = ?s, stderr = %tail, "hls ffmpeg exited non-zero");
                    self.counters.errored.store(true, Ordering::Relaxed);
                    *self.error.lock() = Some(format!("ffmpeg exited with {s}: {tail}"));
                }
                Outcome::Exited(Err(e)) => {
                    error!(session_id = %self.id, error = %e, "failed to wait on hls ffmpeg");
                    self.counters.errored.store(true, Ordering::Relaxed);
                    *self.error.lock() = Some(e.to_string());
                }
                Outcome::Stopped => {
                    info!(session_id = %self.id, "hls ffmpeg stopped");
                }
            }

            self.finished.notify_one();
        });
    }

    /// Scans the output directory periodically to detect newly-fsynced
    /// segments; `ServeSegment`/`ServePlaylist` only ever reference
    /// segments the ffmpeg process has actually finished writing.
    fn spawn_disk_watcher(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut seen: std::collections::HashSet<u64> = std::collections::HashSet::new();
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if !self.counters.running.load(Ordering::Relaxed) {
                    if let Ok(mut entries) = tokio::fs::read_dir(&self.output_dir).await {
                        let mut highest: i64 = -1;
                        while let Ok(Some(entry)) = entries.next_entry().await {
                            if let Some(seq) = parse_segment_seq(&entry.file_name().to_string_lossy()) {
                                highest = highest.max(seq as i64);
                            }
                        }
                        if highest >= 0 {
                            self.counters
                                .highest_segment_on_disk
                                .fetch_max(highest, Ordering::Relaxed);
                        }
                    }
                    break;
                }
                if let Ok(mut entries) = tokio::fs::read_dir(&self.output_dir).await {
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        if let Some(seq) = parse_segment_seq(&entry.file_name().to_string_lossy()) {
                            if seen.insert(seq) {
                                self.counters.note_segment_written(seq);
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn touch(&self) {
        self.counters.touch();
    }

    pub fn idle_secs(&self) -> u64 {
        self.counters.idle_secs()
    }

    pub fn state(&self) -> HlsSessionState {
        if self.counters.errored.load(Ordering::Relaxed) {
            HlsSessionState::Errored
        } else if self.counters.running.load(Ordering::Relaxed) {
            HlsSessionState::Running
        } else {
            HlsSessionState::Exited
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn snapshot(&self) -> HlsSessionSnapshot {
        HlsSessionSnapshot {
            id: self.id,
            source_path: self.source_path.clone(),
            original_path: self.original_path.clone(),
            created_at: self.created_at,
            last_access: self
                .counters
                .last_access
                .load(Ordering::Relaxed),
            start_offset_secs: self.start_offset_secs,
            duration_secs: self.duration_secs,
            segments_created: self.counters.segments_created.load(Ordering::Relaxed),
            segments_served: self.counters.segments_served.load(Ordering::Relaxed),
            highest_segment_on_disk: self.counters.highest_segment(),
            has_dolby_vision: self.has_dolby_vision,
            dolby_vision_profile: self.dolby_vision_profile.clone(),
            has_hdr10: self.has_hdr10,
            force_aac: self.force_aac,
            selected_audio_track: self.selected_audio_track,
            selected_subtitle_track: self.selected_subtitle_track,
            profile_id: self.profile_id.clone(),
            profile_name: self.profile_name.clone(),
            client_ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            state: self.state(),
            error: self.error_message(),
        }
    }

    /// Stops the current ffmpeg process and waits for the supervisor to
    /// actually observe its exit before returning. Safe to call more than
    /// once, and safe to call after the process has already exited on its
    /// own — `stop_lock` is never held by the supervisor, so this never
    /// waits on the thing it's trying to interrupt.
    pub async fn stop(&self) {
        let _guard = self.stop_lock.lock().await;
        if !self.counters.running.load(Ordering::Relaxed) {
            return;
        }
        self.stop_requested.notify_one();
        self.finished.notified().await;
    }

    pub async fn cleanup(&self) {
        self.stop().await;
        let _ = tokio::fs::remove_dir_all(&self.output_dir).await;
    }
}

fn parse_segment_seq(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("segment")?
        .strip_suffix(".m4s")?
        .parse()
        .ok()
}

pub fn process_error_to_internal(e: ProcessError) -> crate::error::GatewayError {
    crate::error::GatewayError::Process(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> CreateSessionParams {
        CreateSessionParams {
            source_path: "/direct/x.mkv".into(),
            original_path: "/m/x.mkv".into(),
            has_dolby_vision: false,
            dolby_vision_profile: None,
            has_hdr10: false,
            force_aac: false,
            start_offset_secs: 0.0,
            duration_secs: Some(3600.0),
            selected_audio_track: 1,
            selected_subtitle_track: -1,
            audio_needs_transcode: false,
            profile_id: None,
            profile_name: None,
            client_ip: None,
            user_agent: None,
        }
    }

    #[test]
    fn dv_preserved_tags_stream_dvh1() {
        let mut params = base_params();
        params.has_dolby_vision = true;
        params.dolby_vision_profile = Some("dvhe.08.06".into());
        let args = build_ffmpeg_args(&params, Path::new("/tmp/sess"));
        assert!(args.windows(2).any(|w| w[0] == "-tag:v" && w[1] == "dvh1"));
    }

    #[test]
    fn non_dv_tags_stream_hvc1() {
        let params = base_params();
        let args = build_ffmpeg_args(&params, Path::new("/tmp/sess"));
        assert!(args.windows(2).any(|w| w[0] == "-tag:v" && w[1] == "hvc1"));
    }

    #[test]
    fn force_aac_transcodes_audio() {
        let mut params = base_params();
        params.force_aac = true;
        let args = build_ffmpeg_args(&params, Path::new("/tmp/sess"));
        assert!(args.iter().any(|a| a == "aac"));
    }

    #[test]
    fn start_offset_is_placed_before_input() {
        let mut params = base_params();
        params.start_offset_secs = 42.5;
        let args = build_ffmpeg_args(&params, Path::new("/tmp/sess"));
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss_pos < i_pos);
    }

    #[test]
    fn segment_seq_parses_numeric_suffix() {
        assert_eq!(parse_segment_seq("segment12.m4s"), Some(12));
        assert_eq!(parse_segment_seq("init.mp4"), None);
    }
}

//! Pre-queue Orchestrator (C9): turns a title identifier into a
//! ready-to-play stream descriptor via the `queued → searching →
//! resolving → probing → ready | failed` state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::hls::{CreateSessionParams, HlsSessionManager};
use crate::prequeue::collaborators::{
    HealthChecker, HealthStatus, MetadataService, PlaybackResolver, SearchCandidate,
    SearchIndexer, SettingsStore,
};
use crate::prequeue::store::PrequeueStore;
use crate::probe::VideoCharacteriser;
use crate::provider::StreamProvider;
use crate::track_selector::{
    is_compatible_codec, select_audio_track, select_subtitle_track, SelectionPreferences,
};
use crate::types::{HdrPolicy, MediaType, PrequeueEntry, PrequeueStatus, TargetEpisode};

const WORKER_DEADLINE: Duration = Duration::from_secs(120);
const TOP_N: usize = 10;
const CANDIDATE_LIMIT: usize = 50;
const HEALTH_CHECK_CONCURRENCY: usize = 5;

pub struct OrchestratorDeps {
    pub store: Arc<PrequeueStore>,
    pub indexer: Arc<dyn SearchIndexer>,
    pub metadata: Arc<dyn MetadataService>,
    pub resolver: Arc<dyn PlaybackResolver>,
    pub health: Arc<dyn HealthChecker>,
    pub settings: Arc<dyn SettingsStore>,
    pub characteriser: Arc<VideoCharacteriser>,
    pub hls: Arc<HlsSessionManager>,
    pub provider: Arc<dyn StreamProvider>,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    /// Creates a new prequeue entry in `queued` state and spawns the
    /// worker. Returns the entry id immediately; callers poll
    /// `GET /api/prequeue/{id}` for status.
    pub fn prequeue(
        self: &Arc<Self>,
        title_id: String,
        title_name: String,
        user_id: String,
        client_id: Option<String>,
        media_type: MediaType,
        year: Option<u32>,
        requested_episode: Option<(u32, u32)>,
        start_offset_secs: f64,
    ) -> Arc<tokio::sync::Mutex<PrequeueEntry>> {
        let mut entry = PrequeueEntry::new(title_id, title_name, user_id, client_id, media_type, year);

        // `mediaType=series` with no explicit episode defaults to S01E01.
        if media_type == MediaType::Series {
            let (season, episode) = requested_episode.unwrap_or((1, 1));
            entry.target_episode = Some(TargetEpisode {
                season_number: season,
                episode_number: episode,
                absolute_episode: None,
            });
        }

        let cancel_token = entry.cancel_token.clone();
        let handle = self.deps.store.insert(entry);

        let this = self.clone();
        let worker_handle = handle.clone();
        tokio::spawn(async move {
            let id = worker_handle.lock().await.id;
            let work = tokio::time::timeout(
                WORKER_DEADLINE,
                this.run_worker(worker_handle.clone(), start_offset_secs),
            );

            tokio::select! {
                result = work => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(prequeue_id = %id, error = %e, "prequeue worker failed");
                            worker_handle.lock().await.fail(e.to_string());
                        }
                        Err(_) => {
                            warn!(prequeue_id = %id, "prequeue worker deadline exceeded");
                            worker_handle
                                .lock()
                                .await
                                .fail("deadline exceeded".to_string());
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!(prequeue_id = %id, "prequeue worker cancelled");
                    // `work` is dropped here, stopping the in-flight search/
                    // resolve/probe call; only an already-created HLS
                    // session outlives the dropped future and needs
                    // explicit teardown.
                    let hls_session_id = worker_handle.lock().await.hls_session_id;
                    if let Some(session_id) = hls_session_id {
                        let _ = this.deps.hls.cleanup_session(session_id).await;
                    }
                    worker_handle.lock().await.fail("cancelled".to_string());
                }
            }
        });

        handle
    }

    async fn run_worker(
        &self,
        handle: Arc<tokio::sync::Mutex<PrequeueEntry>>,
        start_offset_secs: f64,
    ) -> Result<()> {
        let (title_name, target_episode, media_type) = {
            let mut entry = handle.lock().await;
            entry.transition(PrequeueStatus::Searching);
            (entry.title_name.clone(), entry.target_episode, entry.media_type)
        };

        // Step 2: series episode-count map / absolute numbering.
        let mut target_episode = target_episode;
        if media_type == MediaType::Series {
            let entry_title_id = handle.lock().await.title_id.clone();
            if let Ok(details) = self.deps.metadata.series_details(&entry_title_id).await {
                if details.uses_absolute_numbering {
                    if let Some(te) = target_episode.as_mut() {
                        te.absolute_episode = resolve_absolute_episode(&details, te);
                    }
                }
            }
        }

        let query = build_search_query(&title_name, target_episode.as_ref());

        // Step 3: search, take top 50.
        let mut candidates = self
            .deps
            .indexer
            .search(&query)
            .await
            .map_err(GatewayError::BadGateway)?;
        candidates.truncate(CANDIDATE_LIMIT);

        // Step 5: early-reject episode mismatches before the expensive resolve.
        if let Some(te) = &target_episode {
            candidates.retain(|c| !episode_clearly_mismatches(c, te));
        }

        {
            let mut entry = handle.lock().await;
            entry.transition(PrequeueStatus::Resolving);
        }

        // Step 4: split top-N into debrid vs usenet, health-check the usenet subset.
        let top_n: Vec<SearchCandidate> = candidates.iter().take(TOP_N).cloned().collect();
        let healthy_top_n = self.health_check_pass(&top_n).await;

        let hdr_policy = self.deps.settings.hdr_policy().await;

        // Step 6: iterate top-N in ranked order, resolve + reject DV5 under HDR-only-equivalent policy.
        let mut resolved = None;
        for candidate in &healthy_top_n {
            match self.try_resolve_candidate(candidate, hdr_policy).await {
                Ok(Some(outcome)) => {
                    resolved = Some(outcome);
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(candidate = %candidate.id, error = %e, "resolve attempt failed, trying next candidate");
                    continue;
                }
            }
        }

        // Step 7: fall back to sequential resolution over the remaining candidates.
        if resolved.is_none() {
            let remaining: Vec<&SearchCandidate> = candidates.iter().skip(TOP_N).collect();
            for candidate in remaining {
                match self.try_resolve_candidate(candidate, hdr_policy).await {
                    Ok(Some(outcome)) => {
                        resolved = Some(outcome);
                        break;
                    }
                    Ok(None) => continue,
                    Err(_) => continue,
                }
            }
        }

        let Some(outcome) = resolved else {
            return Err(GatewayError::BadGateway(
                "no resolvable candidate found".to_string(),
            ));
        };

        {
            let mut entry = handle.lock().await;
            entry.transition(PrequeueStatus::Probing);
            entry.stream_path = Some(outcome.stream_path.clone());
            entry.file_size = outcome.file_size;
            entry.has_dolby_vision = outcome.probe.has_dolby_vision;
            entry.has_hdr10 = outcome.probe.has_hdr10;
            entry.dolby_vision_profile = outcome.probe.dolby_vision_profile.clone();
            entry.duration_secs = Some(outcome.probe.duration_secs);
            entry.audio_streams = outcome.probe.audio_streams.clone();
            entry.subtitle_streams = outcome.probe.subtitle_streams.clone();
        }

        // Step 8: track selection over the cached probe result.
        let prefs = SelectionPreferences::default();
        let audio_idx = select_audio_track(&outcome.probe.audio_streams, &prefs);
        let subtitle_idx = select_subtitle_track(&outcome.probe.subtitle_streams, &prefs);
        let needs_hls = outcome.probe.needs_hls();
        let needs_audio_transcode = audio_idx >= 0
            && outcome
                .probe
                .audio_streams
                .iter()
                .find(|a| a.absolute_index as i64 == audio_idx)
                .map(|a| !is_compatible_codec(&a.codec))
                .unwrap_or(false);

        {
            let mut entry = handle.lock().await;
            entry.selected_audio_track = audio_idx;
            entry.selected_subtitle_track = subtitle_idx;
            entry.needs_audio_transcode = needs_audio_transcode;
        }

        // Step 9: if needsHLS, create the HLS session.
        if needs_hls {
            let params = CreateSessionParams {
                source_path: outcome.stream_path.clone(),
                original_path: outcome.stream_path.clone(),
                has_dolby_vision: outcome.probe.has_dolby_vision,
                dolby_vision_profile: outcome.probe.dolby_vision_profile.clone(),
                has_hdr10: outcome.probe.has_hdr10,
                force_aac: needs_audio_transcode,
                start_offset_secs,
                duration_secs: Some(outcome.probe.duration_secs),
                selected_audio_track: audio_idx,
                selected_subtitle_track: subtitle_idx,
                audio_needs_transcode: needs_audio_transcode,
                profile_id: None,
                profile_name: None,
                client_ip: None,
                user_agent: None,
            };
            let session = self.deps.hls.create_session(params).await?;
            let mut entry = handle.lock().await;
            entry.hls_session_id = Some(session.id);
            entry.hls_playlist_url = Some(format!("/video/hls/{}/stream.m3u8", session.id));
        }

        // Step 10: subtitle pre-extraction is left to an explicit
        // follow-up `StartSubtitles` call.

        // Step 11: transition to ready.
        {
            let mut entry = handle.lock().await;
            entry.transition(PrequeueStatus::Ready);
        }

        info!(prequeue_id = %handle.lock().await.id, "prequeue resolved");
        Ok(())
    }

    async fn health_check_pass(&self, top_n: &[SearchCandidate]) -> Vec<SearchCandidate> {
        let semaphore = Arc::new(Semaphore::new(HEALTH_CHECK_CONCURRENCY));
        let mut handles = Vec::new();

        for candidate in top_n {
            if candidate.is_debrid {
                handles.push(tokio::spawn(async move { None::<SearchCandidate> }));
                continue;
            }
            let sem = semaphore.clone();
            let health = self.deps.health.clone();
            let candidate = candidate.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.ok()?;
                match health.check(&candidate.id).await {
                    HealthStatus::Healthy | HealthStatus::Unknown => Some(candidate),
                    HealthStatus::Unhealthy => None,
                }
            }));
        }

        let mut healthy = Vec::new();
        for (i, h) in handles.into_iter().enumerate() {
            match h.await {
                Ok(Some(c)) => healthy.push(c),
                Ok(None) => {
                    if top_n[i].is_debrid {
                        healthy.push(top_n[i].clone());
                    }
                }
                Err(_) => {}
            }
        }
        healthy
    }

    async fn try_resolve_candidate(
        &self,
        candidate: &SearchCandidate,
        hdr_policy: HdrPolicy,
    ) -> Result<Option<ResolveOutcome>> {
        let resolved = self
            .deps
            .resolver
            .resolve(&candidate.id)
            .await
            .map_err(GatewayError::BadGateway)?;

        let probe = self
            .deps
            .characteriser
            .probe(self.deps.provider.as_ref(), &resolved.stream_path)
            .await?;

        if hdr_policy == HdrPolicy::IncludeHdr && is_dv_profile_5(&probe) {
            return Ok(None);
        }

        Ok(Some(ResolveOutcome {
            stream_path: resolved.stream_path,
            file_size: resolved.file_size,
            probe,
        }))
    }
}

struct ResolveOutcome {
    stream_path: String,
    file_size: Option<u64>,
    probe: crate::types::UnifiedProbeResult,
}

fn is_dv_profile_5(probe: &crate::types::UnifiedProbeResult) -> bool {
    probe
        .dolby_vision_profile
        .as_deref()
        .map(|p| p.starts_with("dvhe.05"))
        .unwrap_or(false)
}

fn build_search_query(title_name: &str, target: Option<&TargetEpisode>) -> String {
    match target {
        Some(te) => format!(
            "{title_name} S{:02}E{:02}",
            te.season_number, te.episode_number
        ),
        None => title_name.to_string(),
    }
}

fn episode_clearly_mismatches(candidate: &SearchCandidate, target: &TargetEpisode) -> bool {
    // Skip season 0 (specials) entries in history-derived targets; a
    // candidate reporting season 0 never "clearly" mismatches since it
    // commonly indicates unparsed metadata rather than a wrong episode.
    if candidate.season_number == Some(0) {
        return false;
    }
    let season_mismatch = candidate
        .season_number
        .map(|s| s != target.season_number)
        .unwrap_or(false);
    let episode_mismatch = candidate
        .episode_number
        .map(|e| e != target.episode_number)
        .unwrap_or(false);
    let absolute_mismatch = match (candidate.absolute_episode, target.absolute_episode) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    };
    (season_mismatch && episode_mismatch) || absolute_mismatch
}

fn resolve_absolute_episode(
    details: &crate::prequeue::collaborators::SeriesDetails,
    target: &TargetEpisode,
) -> Option<u32> {
    let mut absolute = 0u32;
    for season in 1..target.season_number {
        absolute += details.episodes_per_season.get(&season).copied().unwrap_or(0);
    }
    Some(absolute + target.episode_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(season: Option<u32>, episode: Option<u32>) -> SearchCandidate {
        SearchCandidate {
            id: "c1".into(),
            title: "Show".into(),
            is_debrid: false,
            season_number: season,
            episode_number: episode,
            absolute_episode: None,
            size_bytes: None,
        }
    }

    #[test]
    fn mismatched_season_and_episode_is_rejected() {
        let target = TargetEpisode {
            season_number: 2,
            episode_number: 5,
            absolute_episode: None,
        };
        assert!(episode_clearly_mismatches(&candidate(Some(1), Some(5)), &target));
    }

    #[test]
    fn matching_season_but_unknown_episode_is_not_rejected() {
        let target = TargetEpisode {
            season_number: 2,
            episode_number: 5,
            absolute_episode: None,
        };
        assert!(!episode_clearly_mismatches(&candidate(Some(2), None), &target));
    }

    #[test]
    fn season_zero_specials_are_never_rejected() {
        let target = TargetEpisode {
            season_number: 2,
            episode_number: 5,
            absolute_episode: None,
        };
        assert!(!episode_clearly_mismatches(&candidate(Some(0), Some(1)), &target));
    }

    #[test]
    fn search_query_includes_season_and_episode() {
        let te = TargetEpisode {
            season_number: 2,
            episode_number: 5,
            absolute_episode: None,
        };
        assert_eq!(
            build_search_query("Foundation", Some(&te)),
            "Foundation S02E05"
        );
    }
}

//! Thin async trait contracts for the orchestrator's out-of-scope
//! collaborators (search indexer, metadata/episode service, playback
//! resolution service, health checker, settings store). No HTTP client
//! implementation is provided — these exist so C9 compiles, unit-tests
//! with fakes, and can be wired to a real implementation later without
//! touching the orchestrator.

use async_trait::async_trait;

use crate::types::HdrPolicy;

#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    pub is_debrid: bool,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub absolute_episode: Option<u32>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub stream_path: String,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SeriesDetails {
    /// season_number -> episode_count
    pub episodes_per_season: std::collections::HashMap<u32, u32>,
    /// Set for anime-style absolute numbering.
    pub uses_absolute_numbering: bool,
}

#[async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, String>;
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn series_details(&self, title_id: &str) -> Result<SeriesDetails, String>;
}

#[async_trait]
pub trait PlaybackResolver: Send + Sync {
    async fn resolve(&self, candidate_id: &str) -> Result<ResolvedSource, String>;
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, candidate_id: &str) -> HealthStatus;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn hdr_policy(&self) -> HdrPolicy;
    async fn scratch_root(&self) -> std::path::PathBuf;
}

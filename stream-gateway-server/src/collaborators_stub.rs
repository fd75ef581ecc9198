//! Fallback collaborator implementations: the search indexer, metadata
//! service, playback resolver, and health checker are external services
//! in production (a title indexer, a TMDB-style metadata API, a
//! debrid/usenet resolution service, an NZB-health checker). These
//! stand in until a real client is wired into `AppState`, failing
//! closed rather than silently fabricating results.

use async_trait::async_trait;
use stream_gateway_core::prequeue::{
    HealthChecker, HealthStatus, MetadataService, PlaybackResolver, ResolvedSource,
    SearchCandidate, SearchIndexer, SeriesDetails,
};

pub struct UnconfiguredIndexer;

#[async_trait]
impl SearchIndexer for UnconfiguredIndexer {
    async fn search(&self, _query: &str) -> Result<Vec<SearchCandidate>, String> {
        Err("no search indexer configured".to_string())
    }
}

pub struct UnconfiguredMetadataService;

#[async_trait]
impl MetadataService for UnconfiguredMetadataService {
    async fn series_details(&self, _title_id: &str) -> Result<SeriesDetails, String> {
        Ok(SeriesDetails::default())
    }
}

pub struct UnconfiguredResolver;

#[async_trait]
impl PlaybackResolver for UnconfiguredResolver {
    async fn resolve(&self, _candidate_id: &str) -> Result<ResolvedSource, String> {
        Err("no playback resolver configured".to_string())
    }
}

pub struct AlwaysHealthy;

#[async_trait]
impl HealthChecker for AlwaysHealthy {
    async fn check(&self, _candidate_id: &str) -> HealthStatus {
        HealthStatus::Unknown
    }
}

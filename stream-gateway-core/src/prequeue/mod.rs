pub mod collaborators;
pub mod orchestrator;
pub mod store;

pub use collaborators::{
    HealthChecker, HealthStatus, MetadataService, PlaybackResolver, ResolvedSource,
    SearchCandidate, SearchIndexer, SeriesDetails, SettingsStore,
};
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use store::PrequeueStore;

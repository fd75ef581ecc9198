//! Application state: holds every shared component (C1-C11) the HTTP
//! handlers dispatch into. One `AppState` per process, wrapped in `Arc`.

use std::sync::Arc;

use stream_gateway_core::prequeue::{Orchestrator, OrchestratorDeps, PrequeueStore};
use stream_gateway_core::probe::{VideoCharacteriser, WebdavConfig};
use stream_gateway_core::{HlsSessionManager, ProbeCache, StreamProvider, StreamTracker, SubtitleManager};

use crate::collaborators_stub::{AlwaysHealthy, UnconfiguredIndexer, UnconfiguredMetadataService, UnconfiguredResolver};
use crate::config::ServerConfig;
use crate::settings::ConfigSettingsStore;

pub struct AppState {
    pub config: ServerConfig,
    pub provider: Arc<dyn StreamProvider>,
    pub probe_cache: Arc<ProbeCache>,
    pub characteriser: Arc<VideoCharacteriser>,
    pub hls: Arc<HlsSessionManager>,
    pub subtitles: Arc<SubtitleManager>,
    pub prequeue_store: Arc<PrequeueStore>,
    pub stream_tracker: Arc<StreamTracker>,
    pub settings: Arc<ConfigSettingsStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub external_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: ServerConfig, provider: Arc<dyn StreamProvider>) -> Self {
        let scratch_root = std::path::PathBuf::from(&config.scratch_root);

        let probe_cache = Arc::new(ProbeCache::new(config.probe_cache_ttl_secs));
        let webdav = config.webdav.as_ref().map(|w| WebdavConfig {
            base_url: w.base_url.clone(),
            path_prefix: w.path_prefix.clone(),
            username: w.username.clone(),
            password: w.password.clone(),
        });
        let characteriser = Arc::new(VideoCharacteriser::new(
            config.ffprobe_bin.clone(),
            webdav,
            probe_cache.clone(),
        ));
        let hls = Arc::new(HlsSessionManager::new(
            config.ffmpeg_bin.clone(),
            scratch_root.join("hls"),
        ));
        let subtitles = Arc::new(SubtitleManager::new(
            config.ffmpeg_bin.clone(),
            scratch_root.join("subtitles"),
        ));
        let prequeue_store = Arc::new(PrequeueStore::new());
        let stream_tracker = Arc::new(StreamTracker::new());
        let settings = Arc::new(ConfigSettingsStore::new(
            stream_gateway_core::types::HdrPolicy::default(),
            scratch_root.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            store: prequeue_store.clone(),
            indexer: Arc::new(UnconfiguredIndexer),
            metadata: Arc::new(UnconfiguredMetadataService),
            resolver: Arc::new(UnconfiguredResolver),
            health: Arc::new(AlwaysHealthy),
            settings: settings.clone(),
            characteriser: characteriser.clone(),
            hls: hls.clone(),
            provider: provider.clone(),
        }));

        let external_client = stream_gateway_core::external_proxy::build_client()
            .expect("external proxy http client builds with a fixed, valid configuration");

        Self {
            config,
            provider,
            probe_cache,
            characteriser,
            hls,
            subtitles,
            prequeue_store,
            stream_tracker,
            settings,
            orchestrator,
            external_client,
        }
    }
}

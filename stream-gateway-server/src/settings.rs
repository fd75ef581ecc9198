//! Minimal `SettingsStore` backed by the loaded `ServerConfig`. The real
//! settings store (global playback prefs database) is an external
//! collaborator per spec; this is the concrete adapter the gateway talks
//! to until one is wired in.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use stream_gateway_core::prequeue::SettingsStore;
use stream_gateway_core::types::HdrPolicy;

pub struct ConfigSettingsStore {
    hdr_policy: RwLock<HdrPolicy>,
    scratch_root: PathBuf,
}

impl ConfigSettingsStore {
    pub fn new(hdr_policy: HdrPolicy, scratch_root: PathBuf) -> Self {
        Self {
            hdr_policy: RwLock::new(hdr_policy),
            scratch_root,
        }
    }

    pub fn set_hdr_policy(&self, policy: HdrPolicy) {
        *self.hdr_policy.write() = policy;
    }
}

#[async_trait]
impl SettingsStore for ConfigSettingsStore {
    async fn hdr_policy(&self) -> HdrPolicy {
        *self.hdr_policy.read()
    }

    async fn scratch_root(&self) -> PathBuf {
        self.scratch_root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reflects_updates_to_hdr_policy() {
        let store = ConfigSettingsStore::new(HdrPolicy::IncludeHdrDv, PathBuf::from("/tmp/x"));
        assert_eq!(store.hdr_policy().await, HdrPolicy::IncludeHdrDv);
        store.set_hdr_policy(HdrPolicy::SdrOnly);
        assert_eq!(store.hdr_policy().await, HdrPolicy::SdrOnly);
    }
}

//! Server configuration: bind address, ffmpeg/ffprobe binary names, the
//! WebDAV fallback used by the video characteriser, and the scratch
//! directory root. HDR/DV policy and global playback prefs are NOT
//! configured here — they come from the settings-store collaborator
//! (`SettingsStore`), which is external, per the JSON-store contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,

    pub webdav: Option<WebdavSettings>,

    /// Scratch directory root for HLS output dirs and subtitle extraction
    /// scratch dirs. Defaults to `<tmp>/<app-name>-hls`.
    pub scratch_root: String,

    pub probe_cache_ttl_secs: u64,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebdavSettings {
    pub base_url: String,
    pub path_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            webdav: None,
            scratch_root: default_scratch_root(),
            probe_cache_ttl_secs: 300,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

fn default_scratch_root() -> String {
    std::env::temp_dir()
        .join("stream-gateway-hls")
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_all_interfaces() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn scratch_root_is_under_tmp() {
        let config = ServerConfig::default();
        assert!(config.scratch_root.contains("stream-gateway-hls"));
    }
}

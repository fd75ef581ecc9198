//! Video Characteriser (C3): runs ffprobe against the cheapest available
//! source (direct URL, WebDAV URL, or piped first-N-MiB fallback) and
//! distills the result into a `UnifiedProbeResult`, sharing it via the
//! probe cache (C2).

mod ffprobe;

use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::ProbeCache;
use crate::error::{GatewayError, ProbeError, Result};
use crate::provider::{ByteRange, HttpMethod, StreamProvider};
use crate::types::{AudioStreamInfo, SubtitleStreamInfo, UnifiedProbeResult};
use ffprobe::{is_compatible_audio, is_truehd_family, FfprobeOutput};

const LOCAL_TIMEOUT: Duration = Duration::from_secs(15);
const EXTERNAL_TIMEOUT: Duration = Duration::from_secs(60);
const PIPED_PROBE_BYTES: u64 = 16 * 1024 * 1024;

/// WebDAV base configuration used to construct the fallback URL for
/// usenet-backed content, per strategy (2).
#[derive(Debug, Clone)]
pub struct WebdavConfig {
    pub base_url: String,
    pub path_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl WebdavConfig {
    fn build_url(&self, path: &str) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        url.push('/');
        url.push_str(self.path_prefix.trim_start_matches('/'));
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(path.trim_start_matches('/'));
        url
    }
}

pub struct VideoCharacteriser {
    ffprobe_bin: String,
    webdav: Option<WebdavConfig>,
    cache: std::sync::Arc<ProbeCache>,
}

impl VideoCharacteriser {
    pub fn new(
        ffprobe_bin: impl Into<String>,
        webdav: Option<WebdavConfig>,
        cache: std::sync::Arc<ProbeCache>,
    ) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
            webdav,
            cache,
        }
    }

    /// Probes `path`, consulting (and populating) the probe cache.
    /// Single-flight: concurrent callers for the same path await the same
    /// in-progress probe rather than launching duplicate ffprobe calls.
    pub async fn probe(
        &self,
        provider: &dyn StreamProvider,
        path: &str,
    ) -> Result<UnifiedProbeResult> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached);
        }

        let cell = self.cache.in_flight_cell(path);
        let result = cell
            .get_or_init(|| async { self.probe_uncached(provider, path).await.map_err(|e| e.to_string()) })
            .await
            .clone();
        self.cache.clear_in_flight(path);

        match result {
            Ok(unified) => {
                self.cache.put(path, unified.clone());
                Ok(unified)
            }
            Err(msg) => Err(GatewayError::Probe(ProbeError::AllStrategiesFailed {
                path: path.to_string(),
                last_error: msg,
            })),
        }
    }

    async fn probe_uncached(
        &self,
        provider: &dyn StreamProvider,
        path: &str,
    ) -> std::result::Result<UnifiedProbeResult, GatewayError> {
        let mut last_err = String::new();

        // Strategy 1: direct URL from the provider (seekable, cheapest).
        if let Some(cap) = provider.direct_url_capability() {
            match cap.get_direct_url(path).await {
                Ok(url) => match self.run_ffprobe_url(&url, EXTERNAL_TIMEOUT).await {
                    Ok(out) => return Ok(distill(&out)),
                    Err(e) => {
                        warn!(path, error = %e, "direct-url probe failed, falling back");
                        last_err = e.to_string();
                    }
                },
                Err(e) => {
                    debug!(path, error = %e, "no direct url available");
                    last_err = e.to_string();
                }
            }
        }

        // Strategy 2: WebDAV-style URL.
        if let Some(webdav) = &self.webdav {
            let url = webdav.build_url(path);
            match self.run_ffprobe_url(&url, EXTERNAL_TIMEOUT).await {
                Ok(out) => return Ok(distill(&out)),
                Err(e) => {
                    warn!(path, error = %e, "webdav probe failed, falling back");
                    last_err = e.to_string();
                }
            }
        }

        // Strategy 3: piped probe over the first 16 MiB.
        match self.run_piped_probe(provider, path).await {
            Ok(out) => Ok(distill(&out)),
            Err(e) => {
                last_err = e.to_string();
                Err(GatewayError::Probe(ProbeError::AllStrategiesFailed {
                    path: path.to_string(),
                    last_error: last_err,
                }))
            }
        }
    }

    async fn run_ffprobe_url(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<FfprobeOutput, GatewayError> {
        let args = ffprobe_args(url);
        let stdout =
            crate::ffmpeg_proc::run_capturing_stdout(&self.ffprobe_bin, &args, timeout).await?;
        FfprobeOutput::parse(&stdout)
            .map_err(|e| GatewayError::Probe(ProbeError::UnparseableOutput(e.to_string())))
    }

    async fn run_piped_probe(
        &self,
        provider: &dyn StreamProvider,
        path: &str,
    ) -> std::result::Result<FfprobeOutput, GatewayError> {
        let range = ByteRange {
            start: 0,
            end: Some(PIPED_PROBE_BYTES - 1),
        };
        let mut response = provider
            .stream(path, HttpMethod::Get, Some(range))
            .await
            .map_err(GatewayError::from)?;

        use futures_util::StreamExt;
        let mut buf = Vec::new();
        while let Some(chunk) = response.body.next().await {
            let chunk = chunk.map_err(GatewayError::Io)?;
            buf.extend_from_slice(&chunk);
            if buf.len() as u64 >= PIPED_PROBE_BYTES {
                break;
            }
        }

        let args = ffprobe_args("pipe:0");
        let stdout = crate::ffmpeg_proc::run_with_stdin_capturing_stdout(
            &self.ffprobe_bin,
            &args,
            &buf,
            LOCAL_TIMEOUT,
        )
        .await?;
        FfprobeOutput::parse(&stdout)
            .map_err(|e| GatewayError::Probe(ProbeError::UnparseableOutput(e.to_string())))
    }
}

fn ffprobe_args(input: &str) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        input.to_string(),
    ]
}

/// Dolby Vision profile 7 has no device-reliable tag and is always
/// downgraded to "HDR10-only, no DV tag"; profile 5 has no HDR10 base
/// layer and is rejected by the caller when the active policy is
/// HDR-only (not here — rejection is a policy decision made by C9/C5,
/// this module only reports the parsed profile).
fn parse_dv_profile(stream: &ffprobe::FfprobeStream) -> Option<String> {
    for sd in &stream.side_data_list {
        let is_dovi = sd
            .side_data_type
            .as_deref()
            .map(|t| t.to_lowercase().contains("dovi"))
            .unwrap_or(false);
        if !is_dovi {
            continue;
        }
        if let (Some(profile), Some(level)) = (sd.dv_profile, sd.dv_level) {
            if profile == 7 {
                return None;
            }
            return Some(format!("dvhe.{profile:02}.{level:02}"));
        }
    }
    None
}

fn is_hdr10(stream: &ffprobe::FfprobeStream) -> bool {
    stream.color_transfer.as_deref() == Some("smpte2084")
        && stream.color_primaries.as_deref() == Some("bt2020")
}

fn distill(out: &FfprobeOutput) -> UnifiedProbeResult {
    let video = out
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let (has_dolby_vision, dolby_vision_profile, has_hdr10) = match video {
        Some(v) => {
            let profile = parse_dv_profile(v);
            // Profile 7 is reported as DV-absent with HDR10 implied, per
            // the downgrade rule: it is "HDR10-only with no DV tag".
            let saw_dovi = v.side_data_list.iter().any(|sd| {
                sd.side_data_type
                    .as_deref()
                    .map(|t| t.to_lowercase().contains("dovi"))
                    .unwrap_or(false)
            });
            let profile7 = saw_dovi && profile.is_none();
            (
                profile.is_some(),
                profile,
                is_hdr10(v) || profile7,
            )
        }
        None => (false, None, false),
    };

    let mut audio_streams = Vec::new();
    let mut has_truehd = false;
    let mut has_compatible_audio = false;
    for s in out.streams.iter().filter(|s| s.codec_type.as_deref() == Some("audio")) {
        let codec = s.codec_name.clone().unwrap_or_default();
        if is_truehd_family(&codec) {
            has_truehd = true;
        }
        if is_compatible_audio(&codec) {
            has_compatible_audio = true;
        }
        audio_streams.push(AudioStreamInfo {
            absolute_index: s.index,
            codec,
            language: s.tags.language.clone(),
            title: s.tags.title.clone(),
            channels: s.channels.unwrap_or(2),
            is_default: s.disposition.default != 0,
        });
    }

    let subtitle_streams = out
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .map(|s| SubtitleStreamInfo {
            absolute_index: s.index,
            codec: s.codec_name.clone().unwrap_or_default(),
            language: s.tags.language.clone(),
            title: s.tags.title.clone(),
            forced: s.disposition.forced != 0,
            is_default: s.disposition.default != 0,
        })
        .collect();

    UnifiedProbeResult {
        duration_secs: out.duration_secs(),
        has_dolby_vision,
        has_hdr10,
        dolby_vision_profile,
        has_truehd,
        has_compatible_audio,
        audio_streams,
        subtitle_streams,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffprobe::{FfprobeDisposition, FfprobeFormat, FfprobeSideData, FfprobeStream, FfprobeTags};

    fn stream(codec_type: &str, codec_name: &str, index: usize) -> FfprobeStream {
        FfprobeStream {
            index,
            codec_type: Some(codec_type.to_string()),
            codec_name: Some(codec_name.to_string()),
            tags: FfprobeTags::default(),
            disposition: FfprobeDisposition::default(),
            color_transfer: None,
            color_primaries: None,
            side_data_list: vec![],
            channels: None,
        }
    }

    #[test]
    fn dv_profile_7_downgrades_to_hdr10_only() {
        let mut video = stream("video", "hevc", 0);
        video.side_data_list.push(FfprobeSideData {
            side_data_type: Some("DOVI configuration record".into()),
            dv_profile: Some(7),
            dv_level: Some(6),
        });
        let out = FfprobeOutput {
            streams: vec![video],
            format: Some(FfprobeFormat { duration: Some("10.0".into()) }),
        };
        let unified = distill(&out);
        assert!(!unified.has_dolby_vision);
        assert!(unified.dolby_vision_profile.is_none());
        assert!(unified.has_hdr10);
    }

    #[test]
    fn dv_profile_8_is_preserved_as_dv() {
        let mut video = stream("video", "hevc", 0);
        video.side_data_list.push(FfprobeSideData {
            side_data_type: Some("DOVI configuration record".into()),
            dv_profile: Some(8),
            dv_level: Some(6),
        });
        let out = FfprobeOutput {
            streams: vec![video],
            format: None,
        };
        let unified = distill(&out);
        assert!(unified.has_dolby_vision);
        assert_eq!(unified.dolby_vision_profile.as_deref(), Some("dvhe.08.06"));
    }

    #[test]
    fn hdr10_detected_via_transfer_and_primaries() {
        let mut video = stream("video", "hevc", 0);
        video.color_transfer = Some("smpte2084".into());
        video.color_primaries = Some("bt2020".into());
        let out = FfprobeOutput {
            streams: vec![video],
            format: None,
        };
        assert!(distill(&out).has_hdr10);
    }

    #[test]
    fn truehd_and_compatible_audio_flags_set_independently() {
        let out = FfprobeOutput {
            streams: vec![
                stream("audio", "truehd", 1),
                stream("audio", "ac3", 2),
            ],
            format: None,
        };
        let unified = distill(&out);
        assert!(unified.has_truehd);
        assert!(unified.has_compatible_audio);
    }

    #[test]
    fn webdav_url_is_built_from_base_prefix_and_path() {
        let cfg = WebdavConfig {
            base_url: "https://dav.example.com".into(),
            path_prefix: "/usenet".into(),
            username: None,
            password: None,
        };
        assert_eq!(
            cfg.build_url("/shows/a.mkv"),
            "https://dav.example.com/usenet/shows/a.mkv"
        );
    }
}

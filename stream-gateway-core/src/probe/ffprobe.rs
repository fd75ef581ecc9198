//! Raw ffprobe JSON parsing. Private: only the distilled
//! `UnifiedProbeResult` ever leaves this module (and is the only thing
//! permitted into the probe cache).

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(super) struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FfprobeFormat {
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FfprobeStream {
    pub index: usize,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    #[serde(default)]
    pub tags: FfprobeTags,
    #[serde(default)]
    pub disposition: FfprobeDisposition,
    #[serde(default)]
    pub color_transfer: Option<String>,
    #[serde(default)]
    pub color_primaries: Option<String>,
    #[serde(default)]
    pub side_data_list: Vec<FfprobeSideData>,
    #[serde(default)]
    pub channels: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FfprobeTags {
    pub language: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FfprobeDisposition {
    #[serde(default)]
    pub default: i32,
    #[serde(default)]
    pub forced: i32,
}

#[derive(Debug, Deserialize)]
pub(super) struct FfprobeSideData {
    pub side_data_type: Option<String>,
    pub dv_profile: Option<u32>,
    pub dv_level: Option<u32>,
}

impl FfprobeOutput {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn duration_secs(&self) -> f64 {
        self.format
            .as_ref()
            .and_then(|f| f.duration.as_ref())
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

pub(super) const TRUEHD_CODECS: &[&str] = &["truehd", "dts", "dts_hd", "dtshd", "mlp"];
pub(super) const COMPATIBLE_AUDIO_CODECS: &[&str] = &["aac", "ac3", "eac3", "mp3"];

pub(super) fn is_truehd_family(codec: &str) -> bool {
    let c = codec.to_lowercase();
    TRUEHD_CODECS.iter().any(|k| c.starts_with(k)) || c.starts_with("dts-")
}

pub(super) fn is_compatible_audio(codec: &str) -> bool {
    COMPATIBLE_AUDIO_CODECS.contains(&codec.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "hevc",
             "color_transfer": "smpte2084", "color_primaries": "bt2020",
             "side_data_list": [{"side_data_type": "DOVI configuration record", "dv_profile": 8, "dv_level": 6}]},
            {"index": 1, "codec_type": "audio", "codec_name": "truehd",
             "tags": {"language": "eng"}, "disposition": {"default": 1, "forced": 0}},
            {"index": 2, "codec_type": "audio", "codec_name": "ac3",
             "tags": {"language": "eng"}}
        ],
        "format": {"duration": "5402.123"}
    }"#;

    #[test]
    fn parses_streams_and_duration() {
        let parsed = FfprobeOutput::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(parsed.streams.len(), 3);
        assert!((parsed.duration_secs() - 5402.123).abs() < 0.001);
    }

    #[test]
    fn truehd_family_matches_dts_variants() {
        assert!(is_truehd_family("dts_hd"));
        assert!(is_truehd_family("DTS-HD"));
        assert!(!is_truehd_family("aac"));
    }

    #[test]
    fn compatible_audio_is_case_insensitive() {
        assert!(is_compatible_audio("AAC"));
        assert!(!is_compatible_audio("truehd"));
    }
}

//! Track Selector (C4): a pure function over stream inventory and
//! preferences. No I/O, no shared state — deterministic and idempotent by
//! construction.

use crate::types::{AudioStreamInfo, SubtitleStreamInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleMode {
    Off,
    On,
    ForcedOnly,
}

/// Layered preference set; precedence is content > client > user > global
/// > default, resolved by the caller before invoking the selector (each
/// field here is already the single resolved value for its tier).
#[derive(Debug, Clone, Default)]
pub struct SelectionPreferences {
    pub preferred_audio_language: Option<String>,
    pub preferred_subtitle_language: Option<String>,
    pub subtitle_mode: Option<SubtitleMode>,
}

const COMMENTARY_MARKERS: &[&str] = &[
    "commentary",
    "audio commentary",
    "isolated score",
    "music only",
];

fn is_commentary(title: Option<&str>) -> bool {
    match title {
        Some(t) => {
            let lower = t.to_lowercase();
            COMMENTARY_MARKERS.iter().any(|m| lower.contains(m))
        }
        None => false,
    }
}

fn matches_language(stream_lang: Option<&str>, preferred: &str) -> bool {
    stream_lang
        .map(|l| l.eq_ignore_ascii_case(preferred))
        .unwrap_or(false)
}

pub fn is_compatible_codec(codec: &str) -> bool {
    matches!(
        codec.to_lowercase().as_str(),
        "aac" | "ac3" | "eac3" | "mp3"
    )
}

pub(crate) fn is_truehd_or_mlp(codec: &str) -> bool {
    matches!(codec.to_lowercase().as_str(), "truehd" | "mlp")
}

/// Six-pass audio precedence cascade: short-circuits on first match.
/// Passes 1-3 exclude commentary tracks, 4-6 repeat them allowing it.
/// Returns the absolute stream index, or -1 if nothing matches.
pub fn select_audio_track(streams: &[AudioStreamInfo], prefs: &SelectionPreferences) -> i64 {
    let Some(lang) = prefs.preferred_audio_language.as_deref() else {
        return streams.first().map(|s| s.absolute_index as i64).unwrap_or(-1);
    };

    let passes: [fn(&AudioStreamInfo) -> bool; 6] = [
        |s| is_compatible_codec(&s.codec),
        |s| !is_truehd_or_mlp(&s.codec),
        |_| true,
        |s| is_compatible_codec(&s.codec),
        |s| !is_truehd_or_mlp(&s.codec),
        |_| true,
    ];

    for (i, codec_pred) in passes.iter().enumerate() {
        let allow_commentary = i >= 3;
        if let Some(found) = streams.iter().find(|s| {
            matches_language(s.language.as_deref(), lang)
                && codec_pred(s)
                && (allow_commentary || !is_commentary(s.title.as_deref()))
        }) {
            return found.absolute_index as i64;
        }
    }

    -1
}

/// Subtitle selection: off→-1; forced-only→restrict to forced entries or
/// -1; otherwise exact-language, then substring-language, then (mode=on)
/// the default-dispositioned entry or the first.
pub fn select_subtitle_track(
    streams: &[SubtitleStreamInfo],
    prefs: &SelectionPreferences,
) -> i64 {
    let mode = prefs.subtitle_mode.unwrap_or(SubtitleMode::Off);

    match mode {
        SubtitleMode::Off => -1,
        SubtitleMode::ForcedOnly => streams
            .iter()
            .find(|s| s.forced)
            .map(|s| s.absolute_index as i64)
            .unwrap_or(-1),
        SubtitleMode::On => {
            if let Some(lang) = prefs.preferred_subtitle_language.as_deref() {
                if let Some(found) = streams
                    .iter()
                    .find(|s| matches_language(s.language.as_deref(), lang))
                {
                    return found.absolute_index as i64;
                }
                if let Some(found) = streams.iter().find(|s| {
                    s.language
                        .as_deref()
                        .map(|l| l.to_lowercase().contains(&lang.to_lowercase()))
                        .unwrap_or(false)
                }) {
                    return found.absolute_index as i64;
                }
            }
            streams
                .iter()
                .find(|s| s.is_default)
                .or_else(|| streams.first())
                .map(|s| s.absolute_index as i64)
                .unwrap_or(-1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(index: usize, codec: &str, lang: &str, title: Option<&str>) -> AudioStreamInfo {
        AudioStreamInfo {
            absolute_index: index,
            codec: codec.to_string(),
            language: Some(lang.to_string()),
            title: title.map(str::to_string),
            channels: 2,
            is_default: false,
        }
    }

    #[test]
    fn scenario_6_truehd_is_skipped_for_compatible_non_commentary() {
        let streams = vec![
            audio(1, "truehd", "eng", None),
            audio(2, "ac3", "eng", None),
            audio(3, "aac", "eng", Some("Director's Commentary")),
        ];
        let prefs = SelectionPreferences {
            preferred_audio_language: Some("eng".into()),
            ..Default::default()
        };
        assert_eq!(select_audio_track(&streams, &prefs), 2);
    }

    #[test]
    fn falls_back_to_commentary_only_when_nothing_else_matches() {
        let streams = vec![audio(5, "aac", "eng", Some("Audio Commentary"))];
        let prefs = SelectionPreferences {
            preferred_audio_language: Some("eng".into()),
            ..Default::default()
        };
        assert_eq!(select_audio_track(&streams, &prefs), 5);
    }

    #[test]
    fn no_language_match_returns_negative_one() {
        let streams = vec![audio(1, "aac", "fre", None)];
        let prefs = SelectionPreferences {
            preferred_audio_language: Some("eng".into()),
            ..Default::default()
        };
        assert_eq!(select_audio_track(&streams, &prefs), -1);
    }

    #[test]
    fn is_deterministic_and_idempotent() {
        let streams = vec![audio(1, "truehd", "eng", None), audio(2, "ac3", "eng", None)];
        let prefs = SelectionPreferences {
            preferred_audio_language: Some("eng".into()),
            ..Default::default()
        };
        let a = select_audio_track(&streams, &prefs);
        let b = select_audio_track(&streams, &prefs);
        assert_eq!(a, b);
    }

    fn sub(index: usize, lang: &str, forced: bool, is_default: bool) -> SubtitleStreamInfo {
        SubtitleStreamInfo {
            absolute_index: index,
            codec: "subrip".into(),
            language: Some(lang.to_string()),
            title: None,
            forced,
            is_default,
        }
    }

    #[test]
    fn subtitle_off_always_returns_negative_one() {
        let streams = vec![sub(1, "eng", false, true)];
        let prefs = SelectionPreferences {
            subtitle_mode: Some(SubtitleMode::Off),
            ..Default::default()
        };
        assert_eq!(select_subtitle_track(&streams, &prefs), -1);
    }

    #[test]
    fn subtitle_forced_only_restricts_to_forced_entries() {
        let streams = vec![sub(1, "eng", false, true), sub(2, "eng", true, false)];
        let prefs = SelectionPreferences {
            subtitle_mode: Some(SubtitleMode::ForcedOnly),
            ..Default::default()
        };
        assert_eq!(select_subtitle_track(&streams, &prefs), 2);
    }

    #[test]
    fn subtitle_on_falls_back_to_default_disposition() {
        let streams = vec![sub(1, "fre", false, false), sub(2, "ger", false, true)];
        let prefs = SelectionPreferences {
            subtitle_mode: Some(SubtitleMode::On),
            preferred_subtitle_language: Some("eng".into()),
            ..Default::default()
        };
        assert_eq!(select_subtitle_track(&streams, &prefs), 2);
    }
}

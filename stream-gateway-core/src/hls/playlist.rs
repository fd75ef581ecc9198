//! HLS playlist generation: `#EXTM3U` referencing `segmentN.m4s` for N in
//! `[0, highest-on-disk]`.

const TARGET_DURATION_SECS: u64 = 6;

pub fn generate_main_playlist(highest_segment: Option<u64>, vod_complete: bool) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:7\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{TARGET_DURATION_SECS}\n"));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-MAP:URI=\"init.mp4\"\n");

    if let Some(highest) = highest_segment {
        for n in 0..=highest {
            out.push_str(&format!("#EXTINF:{TARGET_DURATION_SECS}.0,\n"));
            out.push_str(&format!("segment{n}.m4s\n"));
        }
    }

    if vod_complete {
        out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
        out.push_str("#EXT-X-ENDLIST\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_references_all_segments_up_to_highest() {
        let playlist = generate_main_playlist(Some(2), false);
        assert!(playlist.contains("segment0.m4s"));
        assert!(playlist.contains("segment1.m4s"));
        assert!(playlist.contains("segment2.m4s"));
        assert!(!playlist.contains("segment3.m4s"));
    }

    #[test]
    fn vod_type_and_endlist_only_appear_after_completion() {
        let running = generate_main_playlist(Some(1), false);
        assert!(!running.contains("EXT-X-PLAYLIST-TYPE:VOD"));
        let done = generate_main_playlist(Some(1), true);
        assert!(done.contains("EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(done.contains("EXT-X-ENDLIST"));
    }

    #[test]
    fn no_segments_yet_still_produces_valid_header() {
        let playlist = generate_main_playlist(None, false);
        assert!(playlist.starts_with("#EXTM3U"));
        assert!(!playlist.contains("segment0"));
    }
}

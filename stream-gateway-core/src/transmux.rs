//! Transmux Mode (C7): on-the-fly MP4 remux. Pipes provider bytes into
//! ffmpeg's stdin and streams ffmpeg's stdout back to the client,
//! single-shot, no seeking.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::copy_loop::COPY_BUFFER_BYTES;
use crate::error::{is_client_gone, GatewayError, Result};
use crate::ffmpeg_proc;
use crate::provider::{HttpMethod, StreamProvider};
use crate::stream_tracker::StreamTracker;
use crate::types::ActiveStreamRecord;

const NON_MP4_COMPATIBLE_EXTENSIONS: &[&str] = &[
    "mkv", "ts", "m2ts", "mts", "avi", "mpg", "mpeg", "webm",
];

pub fn requires_transmux(path: &str, target: Option<&str>, transmux_forced: bool) -> bool {
    if transmux_forced || target == Some("web") {
        return true;
    }
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    NON_MP4_COMPATIBLE_EXTENSIONS.contains(&ext.as_str())
}

pub struct TransmuxPlan {
    pub audio_copy: bool,
    pub text_subtitle_absolute_indices: Vec<usize>,
    pub has_ac3_or_eac3_copy: bool,
}

/// Builds the ffmpeg argument list for a transmux invocation. `audio_copy`
/// indicates the first audio track's codec is already in the
/// aac/ac3/eac3/mp3 set; otherwise it's transcoded to AAC 192k and the
/// rest are copied.
pub fn build_ffmpeg_args(plan: &TransmuxPlan) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), "pipe:0".into(), "-map".into(), "0:v:0".into(), "-c:v".into(), "copy".into()];

    if plan.audio_copy {
        args.extend(["-map".into(), "0:a".into(), "-c:a".into(), "copy".into()]);
    } else {
        args.extend([
            "-map".into(),
            "0:a:0".into(),
            "-c:a:0".into(),
            "aac".into(),
            "-b:a:0".into(),
            "192k".into(),
        ]);
    }

    for idx in &plan.text_subtitle_absolute_indices {
        args.extend([
            "-map".into(),
            format!("0:{idx}"),
            "-c:s".into(),
            "mov_text".into(),
        ]);
    }

    let mut movflags = "frag_keyframe+separate_moof+omit_tfhd_offset+default_base_moof".to_string();
    if !plan.has_ac3_or_eac3_copy {
        movflags.push_str("+empty_moov");
    }
    args.extend([
        "-movflags".into(),
        movflags,
        "-f".into(),
        "mp4".into(),
        "pipe:1".into(),
    ]);

    args
}

/// Runs the full transmux pipeline: provider → ffmpeg stdin, ffmpeg
/// stdout → `writer`. Range is never honoured here — callers must strip
/// any incoming `Range` header and respond `Accept-Ranges: none`.
pub async fn serve<W>(
    ffmpeg_bin: &str,
    provider: &dyn StreamProvider,
    path: &str,
    plan: &TransmuxPlan,
    mut writer: W,
    tracker: &Arc<StreamTracker>,
    client_ip: Option<String>,
    user_agent: Option<String>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let response = provider.stream(path, HttpMethod::Get, None).await?;

    let args = build_ffmpeg_args(plan);
    let mut child = ffmpeg_proc::spawn_long_lived(
        ffmpeg_bin,
        &args,
        Stdio::piped(),
        Stdio::piped(),
        Stdio::piped(),
    )?;

    let mut stdin = child.stdin.take().expect("piped stdin");
    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take();

    let filename = path.rsplit('/').next().unwrap_or(path).to_string();
    let record = ActiveStreamRecord::new(path, filename, client_ip, None, None, None, user_agent);
    let handle = tracker.register(record);

    let feed_task = tokio::spawn(async move {
        use futures_util::StreamExt;
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        if !is_client_gone(&e) {
                            warn!(error = %e, "error writing provider bytes to ffmpeg stdin");
                        }
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "error reading provider body during transmux");
                    break;
                }
            }
        }
        let _ = stdin.shutdown().await;
    });

    let mut read_buf = vec![0u8; COPY_BUFFER_BYTES];
    let mut written: u64 = 0;
    loop {
        use tokio::io::AsyncReadExt;
        let n = match stdout.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                if is_client_gone(&e) {
                    break;
                }
                return Err(GatewayError::Io(e));
            }
        };

        match writer.write_all(&read_buf[..n]).await {
            Ok(()) => {}
            Err(e) => {
                if is_client_gone(&e) {
                    break;
                }
                return Err(GatewayError::Io(e));
            }
        }
        let _ = writer.flush().await;

        written += n as u64;
        handle.add_bytes(n as u64);
    }

    feed_task.abort();

    let stderr_tail = if let Some(stderr) = stderr.as_mut() {
        ffmpeg_proc::read_stderr_tail(stderr).await
    } else {
        String::new()
    };

    let lower = stderr_tail.to_lowercase();
    if lower.contains("signal") || lower.contains("broken pipe") {
        info!("ffmpeg exited due to client teardown during transmux");
    }

    ffmpeg_proc::terminate(child, std::time::Duration::from_secs(3)).await;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkv_requires_transmux() {
        assert!(requires_transmux("/m/x.mkv", None, false));
    }

    #[test]
    fn mp4_does_not_require_transmux_unless_forced() {
        assert!(!requires_transmux("/m/x.mp4", None, false));
        assert!(requires_transmux("/m/x.mp4", Some("web"), false));
        assert!(requires_transmux("/m/x.mp4", None, true));
    }

    #[test]
    fn empty_moov_omitted_when_copying_ac3() {
        let plan = TransmuxPlan {
            audio_copy: true,
            text_subtitle_absolute_indices: vec![],
            has_ac3_or_eac3_copy: true,
        };
        let args = build_ffmpeg_args(&plan);
        let movflags = args.iter().find(|a| a.contains("frag_keyframe")).unwrap();
        assert!(!movflags.contains("empty_moov"));
    }

    #[test]
    fn empty_moov_present_when_not_copying_ac3() {
        let plan = TransmuxPlan {
            audio_copy: false,
            text_subtitle_absolute_indices: vec![3],
            has_ac3_or_eac3_copy: false,
        };
        let args = build_ffmpeg_args(&plan);
        let movflags = args.iter().find(|a| a.contains("frag_keyframe")).unwrap();
        assert!(movflags.contains("empty_moov"));
        assert!(args.iter().any(|a| a == "mov_text"));
    }
}

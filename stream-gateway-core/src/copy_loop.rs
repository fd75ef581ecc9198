//! Client-disconnect-aware byte copy loop shared by the Direct Proxy (C6)
//! and External URL Proxy (C11) paths. Transmux (C7) uses the same
//! discipline but copies from a `ChildStdout` rather than an arbitrary
//! `AsyncRead`, so it has its own thin wrapper in `transmux.rs`.

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tracing::{error, info, warn};

use crate::error::{is_client_gone, GatewayError, Result};
use crate::stream_tracker::ActiveStreamHandle;

pub const COPY_BUFFER_BYTES: usize = 512 * 1024;
const PROGRESS_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Copies `body` into `writer`, stopping early once `expected_len` bytes
/// have been written (when known), flushing every write, and classifying
/// write errors as client-gone vs real failures. Registers byte counts
/// with the stream tracker handle as it goes.
pub async fn copy_with_disconnect_detection<S, W>(
    mut body: S,
    mut writer: W,
    expected_len: Option<u64>,
    tracker: Option<&ActiveStreamHandle>,
) -> Result<u64>
where
    S: futures_util::Stream<Item = std::io::Result<Bytes>> + Unpin,
    W: AsyncWrite + Unpin,
{
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    let mut written: u64 = 0;
    let mut next_progress_log = PROGRESS_LOG_BYTES;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                if is_client_gone(&e) {
                    return Ok(written);
                }
                error!(error = %e, "error reading from upstream body");
                return Err(GatewayError::Io(e));
            }
        };

        let mut chunk = chunk;
        if let Some(limit) = expected_len {
            let remaining = limit.saturating_sub(written);
            if remaining == 0 {
                break;
            }
            if chunk.len() as u64 > remaining {
                chunk = chunk.slice(0..remaining as usize);
            }
        }

        if chunk.is_empty() {
            continue;
        }

        match writer.write_all(&chunk).await {
            Ok(()) => {}
            Err(e) => {
                if is_client_gone(&e) {
                    return Ok(written);
                }
                error!(error = %e, "error writing to client");
                return Err(GatewayError::Io(e));
            }
        }

        if let Err(e) = writer.flush().await {
            if is_client_gone(&e) {
                return Ok(written);
            }
            error!(error = %e, "error flushing to client");
            return Err(GatewayError::Io(e));
        }

        written += chunk.len() as u64;
        if let Some(t) = tracker {
            t.add_bytes(chunk.len() as u64);
        }

        if written >= next_progress_log {
            info!(bytes_written = written, "streaming progress");
            next_progress_log += PROGRESS_LOG_BYTES;
        }

        if let Some(limit) = expected_len {
            if written >= limit {
                break;
            }
        }
    }

    Ok(written)
}

pub fn warn_unexpected_eof(expected: Option<u64>, got: u64) {
    if let Some(expected) = expected {
        if got < expected {
            warn!(expected, got, "body ended before expected length reached");
        }
    }
}

//! Direct Proxy Mode (C6): byte-range pass-through for already-compatible
//! containers, with client-disconnect detection and stream-tracker
//! registration.

use std::sync::Arc;

use crate::copy_loop::copy_with_disconnect_detection;
use crate::error::Result;
use crate::provider::{ByteRange, HttpMethod, StreamProvider};
use crate::stream_tracker::StreamTracker;
use crate::types::ActiveStreamRecord;

pub struct DirectProxyHeaders {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: &'static str,
    pub filename: Option<String>,
}

/// Executes a direct-proxy request and writes the response body to
/// `writer`. HEAD requests are expected to be short-circuited by the
/// caller after `resolve_headers` without invoking this function.
pub async fn serve<W>(
    provider: &dyn StreamProvider,
    path: &str,
    range: Option<ByteRange>,
    writer: W,
    tracker: &Arc<StreamTracker>,
    client_ip: Option<String>,
    user_agent: Option<String>,
) -> Result<(DirectProxyHeaders, u64)>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let response = provider.stream(path, HttpMethod::Get, range).await?;

    let headers = DirectProxyHeaders {
        status: response.status,
        content_type: response.content_type.clone(),
        content_length: response.content_length,
        content_range: response.content_range.clone(),
        accept_ranges: "bytes",
        filename: response.filename.clone(),
    };

    let expected_len = expected_length(&headers);

    let filename = headers
        .filename
        .clone()
        .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string());
    let record = ActiveStreamRecord::new(
        path,
        filename,
        client_ip,
        None,
        None,
        headers.content_length,
        user_agent,
    );
    let handle = tracker.register(record);

    let written =
        copy_with_disconnect_detection(response.body, writer, expected_len, Some(&handle)).await?;

    Ok((headers, written))
}

/// Derives the expected byte count from `Content-Range` (preferred, since
/// it reflects the actual served range) or `Content-Length`.
fn expected_length(headers: &DirectProxyHeaders) -> Option<u64> {
    if let Some(range) = &headers.content_range {
        if let Some(total_part) = range.split('/').next() {
            if let Some(dash) = total_part.rfind('-') {
                if let Some(space) = total_part.rfind(' ') {
                    let start: u64 = total_part[space + 1..dash].parse().ok()?;
                    let end: u64 = total_part[dash + 1..].parse().ok()?;
                    return Some(end - start + 1);
                }
            }
        }
    }
    headers.content_length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_length_prefers_content_range_over_content_length() {
        let headers = DirectProxyHeaders {
            status: 206,
            content_type: None,
            content_length: Some(9999),
            content_range: Some("bytes 100-199/5000".to_string()),
            accept_ranges: "bytes",
            filename: None,
        };
        assert_eq!(expected_length(&headers), Some(100));
    }

    #[test]
    fn expected_length_falls_back_to_content_length() {
        let headers = DirectProxyHeaders {
            status: 200,
            content_type: None,
            content_length: Some(5000),
            content_range: None,
            accept_ranges: "bytes",
            filename: None,
        };
        assert_eq!(expected_length(&headers), Some(5000));
    }
}

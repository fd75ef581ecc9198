//! External URL Proxy (C11): generic outbound HTTP streaming proxy,
//! range-aware, for pre-resolved third-party CDN URLs.

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use tokio::io::AsyncWrite;

use crate::copy_loop::copy_with_disconnect_detection;
use crate::error::{GatewayError, Result};
use crate::stream_tracker::StreamTracker;
use crate::types::ActiveStreamRecord;

const USER_AGENT: &str = "VLC/3.0.18 LibVLC/3.0.18";
const MAX_REDIRECTS: usize = 10;

pub fn build_client() -> Result<Client> {
    Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

/// Re-encodes a URL's query string to recover from unencoded spaces and
/// special characters that some upstream sources emit verbatim.
pub fn reencode_url(url: &str) -> String {
    let Some(idx) = url.find('?') else {
        return url.to_string();
    };
    let (base, query) = url.split_at(idx);
    let query = &query[1..];

    let reencoded: Vec<String> = query
        .split('&')
        .map(|pair| {
            if let Some((k, v)) = pair.split_once('=') {
                format!(
                    "{}={}",
                    utf8_percent_encode(k, NON_ALPHANUMERIC),
                    utf8_percent_encode(v, NON_ALPHANUMERIC)
                )
            } else {
                utf8_percent_encode(pair, NON_ALPHANUMERIC).to_string()
            }
        })
        .collect();

    format!("{base}?{}", reencoded.join("&"))
}

pub fn infer_content_type(url: &str) -> &'static str {
    let ext = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "mkv" => "video/x-matroska",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

pub struct ExternalProxyResponse {
    pub status: u16,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: &'static str,
}

pub async fn serve<W>(
    client: &Client,
    url: &str,
    range_header: Option<&str>,
    writer: W,
    tracker: &Arc<StreamTracker>,
    client_ip: Option<String>,
) -> Result<(ExternalProxyResponse, u64)>
where
    W: AsyncWrite + Unpin,
{
    let target = reencode_url(url);
    let mut req = client
        .get(&target)
        .header("User-Agent", USER_AGENT)
        .header("Accept-Encoding", "identity");

    if let Some(range) = range_header {
        req = req.header("Range", range);
    }

    let upstream = req
        .send()
        .await
        .map_err(|e| GatewayError::BadGateway(e.to_string()))?;

    let status = upstream.status().as_u16();
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| infer_content_type(&target).to_string());
    let content_length = upstream.content_length();
    let content_range = upstream
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = ExternalProxyResponse {
        status,
        content_type,
        content_length,
        content_range,
        accept_ranges: "bytes",
    };

    let filename = target.rsplit('/').next().unwrap_or(&target).to_string();
    let record = ActiveStreamRecord::new(
        target.clone(),
        filename,
        client_ip,
        None,
        None,
        content_length,
        Some(USER_AGENT.to_string()),
    );
    let handle = tracker.register(record);

    use futures_util::TryStreamExt;
    let body = upstream
        .bytes_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));

    let written =
        copy_with_disconnect_detection(body, writer, content_length, Some(&handle)).await?;

    Ok((response, written))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reencode_handles_spaces_in_query() {
        let url = "http://cdn.example.com/x?token=a b&name=foo bar";
        let re = reencode_url(url);
        assert!(!re.contains(' '));
        assert!(re.contains("a%20b") || re.contains("a+b"));
    }

    #[test]
    fn reencode_is_noop_without_query() {
        let url = "http://cdn.example.com/x.mkv";
        assert_eq!(reencode_url(url), url);
    }

    #[test]
    fn content_type_inferred_from_extension() {
        assert_eq!(infer_content_type("http://x.com/a.mkv"), "video/x-matroska");
        assert_eq!(infer_content_type("http://x.com/a.mp4?x=1"), "video/mp4");
        assert_eq!(infer_content_type("http://x.com/a.unknown"), "application/octet-stream");
    }
}

//! Stream Provider contract (C1): the remote source abstraction the rest
//! of the engine is built against. Implementations (usenet-backed,
//! debrid-backed, raw HTTP) live outside this crate; only the contract
//! and capability-probing shape are specified here.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// A byte range requested via an HTTP `Range` header, already parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end, if bounded.
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn len(&self, total: u64) -> u64 {
        let end = self.end.unwrap_or(total.saturating_sub(1));
        end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

pub struct StreamResponse {
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub filename: Option<String>,
}

/// Errors a provider can raise; anything else the gateway observes from a
/// provider call is folded into `Upstream`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<ProviderError> for crate::error::GatewayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotFound(p) => crate::error::GatewayError::NotFound(p),
            ProviderError::Upstream(msg) => crate::error::GatewayError::BadGateway(msg),
        }
    }
}

/// Core provider capability: stream bytes for a logical path, honouring
/// an optional range. The provider must allow multiple concurrent calls
/// against distinct paths; the gateway itself supports concurrent ranges
/// over the same path even if a given provider implementation serialises
/// internally.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn stream(
        &self,
        path: &str,
        method: HttpMethod,
        range: Option<ByteRange>,
    ) -> std::result::Result<StreamResponse, ProviderError>;

    /// Optional capability: a provider that can hand back a directly
    /// fetchable (seekable) URL for ffprobe use. Queried at runtime as a
    /// capability probe rather than via downcasting/RTTI, per the
    /// provider/DirectURL split.
    fn direct_url_capability(&self) -> Option<&dyn DirectUrlCapability> {
        None
    }
}

/// Extended capability: obtain a directly-fetchable URL for a path, used
/// by the video characteriser's cheapest probe strategy.
#[async_trait]
pub trait DirectUrlCapability: Send + Sync {
    async fn get_direct_url(&self, path: &str) -> std::result::Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_len_is_inclusive() {
        let r = ByteRange {
            start: 100,
            end: Some(199),
        };
        assert_eq!(r.len(1000), 100);
    }

    #[test]
    fn byte_range_unbounded_end_uses_total() {
        let r = ByteRange {
            start: 0,
            end: None,
        };
        assert_eq!(r.len(1000), 1000);
    }

    #[test]
    fn provider_not_found_maps_to_gateway_not_found() {
        let err: crate::error::GatewayError = ProviderError::NotFound("/x".into()).into();
        assert!(matches!(err, crate::error::GatewayError::NotFound(_)));
    }
}

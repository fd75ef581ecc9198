//! Reference `StreamProvider` implementation: serves paths relative to a
//! local filesystem root. Stands in for the usenet/debrid-backed
//! providers the gateway is designed against (C1 is implemented outside
//! `stream-gateway-core` by design); useful for local testing and as the
//! default when no remote provider is configured.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncSeekExt;

use stream_gateway_core::provider::{
    ByteRange, DirectUrlCapability, HttpMethod, ProviderError, StreamProvider, StreamResponse,
};

pub struct LocalFsProvider {
    root: PathBuf,
}

impl LocalFsProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ProviderError> {
        let relative = path.trim_start_matches('/');
        let joined = self.root.join(relative);
        if !joined.starts_with(&self.root) {
            return Err(ProviderError::NotFound(path.to_string()));
        }
        Ok(joined)
    }
}

#[async_trait]
impl StreamProvider for LocalFsProvider {
    async fn stream(
        &self,
        path: &str,
        _method: HttpMethod,
        range: Option<ByteRange>,
    ) -> Result<StreamResponse, ProviderError> {
        let full_path = self.resolve(path)?;

        let mut file = tokio::fs::File::open(&full_path)
            .await
            .map_err(|e| ProviderError::NotFound(format!("{path}: {e}")))?;
        let total_len = file
            .metadata()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?
            .len();

        let (start, content_length, content_range) = match range {
            Some(r) => {
                file.seek(SeekFrom::Start(r.start))
                    .await
                    .map_err(|e| ProviderError::Upstream(e.to_string()))?;
                let len = r.len(total_len);
                let end = r.end.unwrap_or(total_len.saturating_sub(1));
                (
                    r.start,
                    Some(len),
                    Some(format!("bytes {}-{}/{}", r.start, end, total_len)),
                )
            }
            None => (0, Some(total_len), None),
        };
        let _ = start;

        let filename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        let reader_stream = tokio_util::io::ReaderStream::new(file)
            .map(|r| r.map_err(std::io::Error::from));

        Ok(StreamResponse {
            body: Box::pin(reader_stream),
            status: if content_range.is_some() { 206 } else { 200 },
            content_type: Some("application/octet-stream".to_string()),
            content_length,
            content_range,
            filename,
        })
    }

    fn direct_url_capability(&self) -> Option<&dyn DirectUrlCapability> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streams_a_local_file_in_full() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.mkv"), b"hello world")
            .await
            .unwrap();
        let provider = LocalFsProvider::new(dir.path());
        let resp = provider.stream("/a.mkv", HttpMethod::Get, None).await.unwrap();
        assert_eq!(resp.content_length, Some(11));
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn honours_a_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.mkv"), b"0123456789")
            .await
            .unwrap();
        let provider = LocalFsProvider::new(dir.path());
        let range = ByteRange { start: 2, end: Some(5) };
        let resp = provider
            .stream("/a.mkv", HttpMethod::Get, Some(range))
            .await
            .unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(resp.content_length, Some(4));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFsProvider::new(dir.path());
        let err = provider.stream("/missing.mkv", HttpMethod::Get, None).await;
        assert!(matches!(err, Err(ProviderError::NotFound(_))));
    }
}

//! Bridges the core crate's `AsyncWrite`-sink streaming functions
//! (direct proxy, transmux, HLS feed) to an axum response body: spawns
//! the write side against one end of an in-memory duplex pipe and hands
//! the read side back as a `Body`.

use axum::body::Body;

const DUPLEX_BUFFER_BYTES: usize = 256 * 1024;

/// Runs `produce` against the write half of a duplex pipe in a spawned
/// task, returning the read half wrapped as a streaming `Body`
/// immediately. Errors from `produce` are logged; the client simply sees
/// the body end early.
pub fn streamed_body<F, Fut>(produce: F) -> Body
where
    F: FnOnce(tokio::io::DuplexStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (writer, reader) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
    tokio::spawn(produce(writer));
    Body::from_stream(tokio_util::io::ReaderStream::new(reader))
}

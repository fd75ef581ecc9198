//! Stream Tracker (C10): process-wide registry of active streams for
//! admin visibility. Registered when a proxy or HLS session begins
//! writing bytes to a client, unregistered when it ends.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::types::{ActiveStreamRecord, ActiveStreamSnapshot};

#[derive(Default)]
pub struct StreamTracker {
    streams: DashMap<Uuid, Arc<ActiveStreamRecord>>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// Registers a new stream and returns a handle the copy loop uses to
    /// report byte counts; dropping the handle unregisters the stream.
    pub fn register(self: &Arc<Self>, record: ActiveStreamRecord) -> ActiveStreamHandle {
        let record = Arc::new(record);
        let id = record.id;
        self.streams.insert(id, record.clone());
        ActiveStreamHandle {
            tracker: self.clone(),
            id,
            record,
        }
    }

    pub fn unregister(&self, id: Uuid) {
        self.streams.remove(&id);
    }

    pub fn list(&self) -> Vec<ActiveStreamSnapshot> {
        self.streams.iter().map(|e| e.value().as_ref().into()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// RAII handle returned by `register`; unregisters itself on drop so a
/// panicking or early-returning copy loop can't leak a phantom entry.
pub struct ActiveStreamHandle {
    tracker: Arc<StreamTracker>,
    id: Uuid,
    record: Arc<ActiveStreamRecord>,
}

impl ActiveStreamHandle {
    pub fn add_bytes(&self, n: u64) {
        self.record.add_bytes(n);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ActiveStreamHandle {
    fn drop(&mut self) {
        self.tracker.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_list_shows_the_stream() {
        let tracker = Arc::new(StreamTracker::new());
        let handle = tracker.register(ActiveStreamRecord::new(
            "/movies/a.mkv",
            "a.mkv",
            Some("127.0.0.1".into()),
            None,
            None,
            Some(1000),
            None,
        ));
        assert_eq!(tracker.len(), 1);
        handle.add_bytes(512);
        let listed = tracker.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].bytes_streamed, 512);
    }

    #[test]
    fn dropping_handle_unregisters_the_stream() {
        let tracker = Arc::new(StreamTracker::new());
        {
            let _handle = tracker.register(ActiveStreamRecord::new(
                "/movies/a.mkv",
                "a.mkv",
                None,
                None,
                None,
                None,
                None,
            ));
            assert_eq!(tracker.len(), 1);
        }
        assert!(tracker.is_empty());
    }
}

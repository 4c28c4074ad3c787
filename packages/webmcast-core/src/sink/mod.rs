//! Chunk delivery: the data sink seam and its fanout.
//!
//! The encoder thread produces one `(id, bytes)` chunk at a time; every
//! registered sink receives it. Sink writes must not block on network I/O:
//! the uploader enqueues for its worker thread, the file writer performs a
//! local write.

pub mod file;
pub mod http;

use bytes::Bytes;

/// One deliverable chunk: the metadata preamble or a complete cluster.
#[derive(Debug, Clone)]
pub struct SinkChunk {
    /// Content id, carried as `X-Content-Id` on uploads and used as the file
    /// name in DASH mode.
    pub id: String,
    pub data: Bytes,
}

/// A chunk consumer.
pub trait DataSink: Send {
    /// Sink name for log messages.
    fn name(&self) -> &'static str;

    /// True when the sink is ready to accept another chunk. The encoder uses
    /// this to pace how fast it drains the muxer.
    fn ready(&self) -> bool;

    /// Accepts a chunk. Returns false on failure; mid-stream failures are
    /// logged by the fanout and do not stop the pipeline.
    fn write_chunk(&mut self, chunk: &SinkChunk) -> bool;
}

/// Fanout over every registered sink.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn DataSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn DataSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// True when at least one sink can accept a chunk.
    pub fn any_ready(&self) -> bool {
        self.sinks.iter().any(|sink| sink.ready())
    }

    /// True when every sink can accept a chunk (used for the final chunk).
    pub fn all_ready(&self) -> bool {
        self.sinks.iter().all(|sink| sink.ready())
    }

    /// Delivers one chunk to every sink. Per-sink failures are logged and
    /// ignored.
    pub fn write_chunk(&mut self, id: String, data: Bytes) {
        let chunk = SinkChunk { id, data };
        for sink in &mut self.sinks {
            if !sink.write_chunk(&chunk) {
                log::error!("[Sink] write failed on sink {}", sink.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        ready: bool,
        accept: bool,
        written: Arc<AtomicUsize>,
    }

    impl DataSink for CountingSink {
        fn name(&self) -> &'static str {
            "CountingSink"
        }

        fn ready(&self) -> bool {
            self.ready
        }

        fn write_chunk(&mut self, _chunk: &SinkChunk) -> bool {
            self.written.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    #[test]
    fn fanout_reaches_every_sink_even_after_failure() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut set = SinkSet::new();
        set.add_sink(Box::new(CountingSink { ready: true, accept: false, written: first.clone() }));
        set.add_sink(Box::new(CountingSink { ready: true, accept: true, written: second.clone() }));

        set.write_chunk("chunk_0".into(), Bytes::from_static(&[1, 2, 3]));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readiness_aggregation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = SinkSet::new();
        set.add_sink(Box::new(CountingSink { ready: true, accept: true, written: counter.clone() }));
        set.add_sink(Box::new(CountingSink { ready: false, accept: true, written: counter }));
        assert!(set.any_ready());
        assert!(!set.all_ready());
    }
}

//! Typed publisher.
//!
//! Serializes the key and message, wraps them in a checksummed envelope and
//! appends one frame. Nothing is retried: overflow and serializer failures go
//! straight back to the caller.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;

use crate::envelope::Envelope;
use crate::error::PipeResult;
use crate::serializer::{ConfiguredSerializer, Serializer};
use crate::shm::CircularBuffer;

/// Publishes `(K, M)` pairs to one queue.
pub struct Publisher<K, M, S = ConfiguredSerializer> {
    buffer: Arc<CircularBuffer>,
    serializer: Arc<S>,
    _types: PhantomData<fn(&K, &M)>,
}

impl<K, M, S> Publisher<K, M, S>
where
    K: Serialize,
    M: Serialize,
    S: Serializer,
{
    pub fn new(buffer: Arc<CircularBuffer>, serializer: Arc<S>) -> Self {
        Self {
            buffer,
            serializer,
            _types: PhantomData,
        }
    }

    /// Write one message and return the tick of its frame.
    pub fn publish(&self, key: &K, message: &M) -> PipeResult<i64> {
        let key_bytes = self.serializer.serialize(key)?;
        let message_bytes = self.serializer.serialize(message)?;
        let body = Envelope::new(&key_bytes, &message_bytes).encode()?;

        let tick = self.buffer.insert(&body)?;

        tracing::trace!(
            queue = %self.buffer.name(),
            tick = tick,
            key_len = key_bytes.len(),
            message_len = message_bytes.len(),
            "Published message"
        );

        Ok(tick)
    }

    /// Largest envelope (key and message bytes plus framing) one frame can carry.
    pub fn max_envelope_len(&self) -> usize {
        self.buffer.max_body_len()
    }
}

impl<K, M, S> Clone for Publisher<K, M, S> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            serializer: Arc::clone(&self.serializer),
            _types: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BufferError, PipeError};
    use crate::serializer::JsonSerializer;
    use crate::shm::{BufferOptions, HeapRegion};

    fn make_publisher(size: usize) -> (Arc<CircularBuffer>, Publisher<String, String, JsonSerializer>) {
        let region = Arc::new(HeapRegion::new("publisher-test", size));
        let buffer = Arc::new(CircularBuffer::new(region, BufferOptions::default()).unwrap());
        let publisher = Publisher::new(Arc::clone(&buffer), Arc::new(JsonSerializer));
        (buffer, publisher)
    }

    #[test]
    fn test_publish_writes_envelope() {
        let (buffer, publisher) = make_publisher(4096);
        let tick = publisher
            .publish(&"Foo".to_string(), &"Bar".to_string())
            .unwrap();

        let frame = buffer.latest_frame().unwrap().unwrap();
        assert_eq!(frame.tick, tick);

        let envelope = Envelope::decode(&frame.body).unwrap();
        assert_eq!(envelope.key, br#""Foo""#);
        assert_eq!(envelope.message, br#""Bar""#);
    }

    #[test]
    fn test_publish_overflow_reaches_caller() {
        let (_buffer, publisher) = make_publisher(4096);
        let huge = "x".repeat(8192);

        let result = publisher.publish(&"k".to_string(), &huge);
        assert!(matches!(
            result,
            Err(PipeError::Buffer(BufferError::Overflow { .. }))
        ));
    }

    #[test]
    fn test_ticks_increase() {
        let (_buffer, publisher) = make_publisher(4096);
        let first = publisher.publish(&"a".to_string(), &"1".to_string()).unwrap();
        let second = publisher.publish(&"a".to_string(), &"2".to_string()).unwrap();
        assert!(second > first);
    }
}

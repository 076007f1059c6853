//! Pipe wiring: one region, one buffer, one serializer per queue, shared by
//! every publisher and subscriber handed out.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{Backing, PipeConfig};
use crate::error::PipeResult;
use crate::publisher::Publisher;
use crate::serializer::ConfiguredSerializer;
use crate::shm::{CircularBuffer, MappedFileRegion, SharedMemoryRegion, SharedRegion};
use crate::subscriber::{Subscriber, SubscriberOptions};

/// An open queue.
pub struct SharedMemoryPipe {
    buffer: Arc<CircularBuffer>,
    serializer: Arc<ConfiguredSerializer>,
    subscriber_options: SubscriberOptions,
}

impl SharedMemoryPipe {
    /// Open (or create) the region named by `config` and attach to it.
    pub fn open(config: &PipeConfig) -> PipeResult<Self> {
        let name = config.queue_name.as_str();
        let size = config.queue_size.bytes();

        let region: Arc<dyn SharedRegion> = match config.backing {
            Backing::Shm => Arc::new(SharedMemoryRegion::open_or_create(name, size)?),
            Backing::File => Arc::new(MappedFileRegion::open_or_create(
                &config.backing_dir,
                name,
                size,
            )?),
        };

        tracing::info!(
            queue = %config.queue_name,
            size = %config.queue_size,
            backing = ?config.backing,
            serializer = ?config.serializer,
            "Opened pipe"
        );

        Self::with_region(region, config)
    }

    /// Attach to an already opened region. Only the buffer, serializer and
    /// subscriber settings of `config` are used.
    pub fn with_region(region: Arc<dyn SharedRegion>, config: &PipeConfig) -> PipeResult<Self> {
        let buffer = CircularBuffer::new(region, config.buffer_options())?;

        Ok(Self {
            buffer: Arc::new(buffer),
            serializer: Arc::new(ConfiguredSerializer::from(config.serializer)),
            subscriber_options: SubscriberOptions::from(config),
        })
    }

    pub fn publisher<K, M>(&self) -> Publisher<K, M>
    where
        K: Serialize,
        M: Serialize,
    {
        Publisher::new(Arc::clone(&self.buffer), Arc::clone(&self.serializer))
    }

    pub fn subscriber<K, M>(&self) -> Subscriber<K, M>
    where
        K: PartialEq + DeserializeOwned + Send + Sync + 'static,
        M: DeserializeOwned + Send + 'static,
    {
        Subscriber::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.serializer),
            self.subscriber_options.clone(),
        )
    }

    /// The underlying buffer, for inspection.
    pub fn buffer(&self) -> &Arc<CircularBuffer> {
        &self.buffer
    }

    pub fn serializer(&self) -> &ConfiguredSerializer {
        &self.serializer
    }
}

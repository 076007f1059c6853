//! shmpipe Core Library
//!
//! Cross-process publish/subscribe over a memory-mapped circular buffer.
//! Provides the shared region providers, frame and envelope codecs, typed
//! publishers, polling subscribers and configuration parsing.

pub mod config;
pub mod envelope;
pub mod error;
pub mod pipe;
pub mod publisher;
pub mod serializer;
pub mod shm;
pub mod stats;
pub mod subscriber;
pub mod types;

// Re-export commonly used types
pub use config::{Backing, ConfigLoader, PipeConfig, StartPosition};
pub use envelope::Envelope;
pub use error::{
    BufferError, HardValidationError, IntegrityError, PipeError, PipeResult, SerializationError,
    SharedMemoryError,
};
pub use pipe::SharedMemoryPipe;
pub use publisher::Publisher;
pub use serializer::{
    CborSerializer, ConfiguredSerializer, JsonSerializer, MessagePackSerializer, Serializer,
    SerializerKind,
};
pub use shm::{CircularBuffer, SharedRegion, WriterLock};
pub use stats::StatsSnapshot;
pub use subscriber::{Handler, Subscriber, SubscriberOptions, Subscription, SubscriptionState};
pub use types::{QueueName, QueueSize};

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Polling subscriber.
//!
//! Each subscription is one tokio task that repeatedly asks the buffer for
//! frames newer than its cursor, keeps the ones whose key equals the
//! subscribed key and hands their messages to the handler. The cursor moves
//! past every frame it has looked at, delivered or not, so nothing is seen
//! twice.
//!
//! Lifecycle: Active → Cancelling → Stopped. Cancellation is checked once per
//! poll; a handler that is already running finishes first.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{PipeConfig, StartPosition};
use crate::envelope::Envelope;
use crate::error::{PipeError, PipeResult};
use crate::serializer::{ConfiguredSerializer, Serializer};
use crate::shm::{CircularBuffer, StoredFrame};
use crate::stats::{StatsSnapshot, SubscriptionStats};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Message callback, fixed when the subscription is created.
pub enum Handler<M> {
    /// Runs inline on the polling task.
    Sync(Box<dyn FnMut(M) + Send>),
    /// Awaited before the next message is dispatched.
    Async(Box<dyn FnMut(M) -> BoxFuture + Send>),
}

impl<M: 'static> Handler<M> {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnMut(M) + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn from_async<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(M) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Async(Box::new(move |message| Box::pin(f(message))))
    }

    /// Run the handler on one message. A panic is reported as an error
    /// string and leaves the handler usable for the next message.
    async fn dispatch(&mut self, message: M) -> Result<(), String> {
        match self {
            Self::Sync(f) => catch_unwind(AssertUnwindSafe(|| f(message))).map_err(panic_message),
            Self::Async(f) => {
                let future = catch_unwind(AssertUnwindSafe(|| f(message))).map_err(panic_message)?;
                match tokio::spawn(future).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_panic() => Err(panic_message(e.into_panic())),
                    Err(e) => Err(e.to_string()),
                }
            }
        }
    }
}

impl<M> fmt::Debug for Handler<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "Handler::Sync"),
            Self::Async(_) => write!(f, "Handler::Async"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Subscription lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    /// Polling.
    Active = 0,
    /// Cancellation requested; the task stops at its next check.
    Cancelling = 1,
    /// The polling task has exited.
    Stopped = 2,
}

impl SubscriptionState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Cancelling => "Cancelling",
            Self::Stopped => "Stopped",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Cancelling,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Subscriber tuning.
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    /// Pause between polls.
    pub polling_interval: Duration,
    /// How long `unsubscribe` waits for the task to stop.
    pub stop_timeout: Duration,
    pub start_position: StartPosition,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(1),
            stop_timeout: Duration::from_millis(100),
            start_position: StartPosition::Latest,
        }
    }
}

impl From<&PipeConfig> for SubscriberOptions {
    fn from(config: &PipeConfig) -> Self {
        Self {
            polling_interval: config.polling_interval,
            stop_timeout: config.subscribe_timeout,
            start_position: config.start_position,
        }
    }
}

/// Creates subscriptions for `(K, M)` pairs on one queue.
pub struct Subscriber<K, M, S = ConfiguredSerializer> {
    buffer: Arc<CircularBuffer>,
    serializer: Arc<S>,
    options: SubscriberOptions,
    _types: PhantomData<fn() -> (K, M)>,
}

impl<K, M, S> Subscriber<K, M, S>
where
    K: PartialEq + DeserializeOwned + Send + Sync + 'static,
    M: DeserializeOwned + Send + 'static,
    S: Serializer,
{
    pub fn new(buffer: Arc<CircularBuffer>, serializer: Arc<S>, options: SubscriberOptions) -> Self {
        Self {
            buffer,
            serializer,
            options,
            _types: PhantomData,
        }
    }

    /// Start delivering messages published under `key` to `handler`.
    ///
    /// Returns as soon as the polling task is spawned. Must be called from
    /// inside a tokio runtime.
    pub fn subscribe(&self, key: K, handler: Handler<M>) -> PipeResult<Subscription> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            PipeError::RuntimeUnavailable {
                reason: e.to_string(),
            }
        })?;

        let cursor = self.start_cursor();
        let state = Arc::new(AtomicU8::new(SubscriptionState::Active as u8));
        let stats = Arc::new(SubscriptionStats::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = PollTask {
            buffer: Arc::clone(&self.buffer),
            serializer: Arc::clone(&self.serializer),
            key,
            cursor,
            polling_interval: self.options.polling_interval,
            stats: Arc::clone(&stats),
            _message: PhantomData,
        };

        tracing::debug!(
            queue = %self.buffer.name(),
            cursor = cursor,
            start = ?self.options.start_position,
            "Subscription started"
        );

        let task_state = Arc::clone(&state);
        let join = runtime.spawn(async move {
            task.run(handler, cancel_rx).await;
            task_state.store(SubscriptionState::Stopped as u8, Ordering::Release);
        });

        Ok(Subscription {
            queue: self.buffer.name().to_string(),
            state,
            stats,
            cancel: cancel_tx,
            task: Some(join),
            stop_timeout: self.options.stop_timeout,
        })
    }

    fn start_cursor(&self) -> i64 {
        match self.options.start_position {
            StartPosition::Beginning => i64::MIN,
            StartPosition::Latest => match self.buffer.latest_tick() {
                Ok(tick) => tick.unwrap_or(i64::MIN),
                Err(e) => {
                    tracing::warn!(queue = %self.buffer.name(), error = %e, "Cannot read latest tick, starting from the beginning");
                    i64::MIN
                }
            },
        }
    }
}

impl<K, M, S> Clone for Subscriber<K, M, S> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            serializer: Arc::clone(&self.serializer),
            options: self.options.clone(),
            _types: PhantomData,
        }
    }
}

/// State owned by one polling task.
struct PollTask<K, M, S> {
    buffer: Arc<CircularBuffer>,
    serializer: Arc<S>,
    key: K,
    /// Tick of the newest frame already examined.
    cursor: i64,
    polling_interval: Duration,
    stats: Arc<SubscriptionStats>,
    _message: PhantomData<fn() -> M>,
}

impl<K, M, S> PollTask<K, M, S>
where
    K: PartialEq + DeserializeOwned + Send + Sync + 'static,
    M: DeserializeOwned + Send + 'static,
    S: Serializer,
{
    async fn run(mut self, mut handler: Handler<M>, mut cancel: watch::Receiver<bool>) {
        loop {
            if *cancel.borrow() {
                break;
            }

            match self.buffer.frames_after(self.cursor) {
                Ok(frames) => {
                    for frame in frames {
                        self.stats.record_frame();
                        self.cursor = frame.tick;

                        if let Some(message) = self.accept(&frame) {
                            match handler.dispatch(message).await {
                                Ok(()) => self.stats.record_delivered(),
                                Err(reason) => {
                                    self.stats.record_handler_failure();
                                    tracing::warn!(
                                        queue = %self.buffer.name(),
                                        tick = frame.tick,
                                        reason = %reason,
                                        "Handler failed"
                                    );
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    self.stats.record_poll_error();
                    tracing::warn!(queue = %self.buffer.name(), error = %e, "Poll failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.polling_interval) => {}
                changed = cancel.changed() => {
                    // Sender gone means the handle was dropped
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(queue = %self.buffer.name(), cursor = self.cursor, "Subscription stopped");
    }

    /// Decode a frame and return its message if it belongs to this subscription.
    fn accept(&self, frame: &StoredFrame) -> Option<M> {
        let envelope = match Envelope::decode(&frame.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.record_integrity_skip();
                tracing::trace!(tick = frame.tick, offset = frame.offset, error = %e, "Skipping frame");
                return None;
            }
        };

        // Undecodable keys belong to some other key type
        match self.serializer.deserialize::<K>(envelope.key) {
            Ok(key) if key == self.key => {}
            _ => {
                self.stats.record_filtered();
                return None;
            }
        }

        match self.serializer.deserialize::<M>(envelope.message) {
            Ok(message) => Some(message),
            Err(e) => {
                self.stats.record_decode_failure();
                tracing::warn!(queue = %self.buffer.name(), tick = frame.tick, error = %e, "Cannot decode message");
                None
            }
        }
    }
}

/// Handle to a running subscription. Dropping it cancels the subscription.
pub struct Subscription {
    queue: String,
    state: Arc<AtomicU8>,
    stats: Arc<SubscriptionStats>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the polling task to stop without waiting for it.
    pub fn cancel(&self) {
        let requested = self.state.compare_exchange(
            SubscriptionState::Active as u8,
            SubscriptionState::Cancelling as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if requested.is_ok() {
            self.cancel.send_replace(true);
            tracing::debug!(queue = %self.queue, "Subscription cancelling");
        }
    }

    /// Cancel and wait for the polling task to stop.
    pub async fn unsubscribe(&mut self) -> PipeResult<()> {
        self.cancel();

        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };

        match tokio::time::timeout(self.stop_timeout, task).await {
            Ok(result) => {
                self.task = None;
                if let Err(e) = result {
                    tracing::warn!(queue = %self.queue, error = %e, "Subscription task failed");
                }
                self.state
                    .store(SubscriptionState::Stopped as u8, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(PipeError::UnsubscribeTimeout {
                waited: self.stop_timeout,
            }),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! Ledger event publishing/subscription (mechanics only).
//!
//! The bus distributes committed ledger movements to downstream readers
//! (dashboards, valuation, notification workers). It is not a store: the entry
//! store is the source of truth, and events are published only after the
//! transaction that produced them has committed.
//!
//! Delivery is at-least-once and best-effort; consumers must be idempotent.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// A subscription to the published event stream.
///
/// Each subscription receives a copy of every message published after it was
/// created (broadcast semantics). Intended for a single consuming thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => process(event)?,
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub abstraction.
///
/// `publish()` may fail (closed channel, broker outage). The ledger service logs
/// such failures and keeps the committed write: publication is never allowed to
/// undo a ledger transaction.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}

/// Bus that drops everything. Used when no downstream reader is wired.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullEventBus;

impl<M> EventBus<M> for NullEventBus
where
    M: Send + 'static,
{
    type Error = core::convert::Infallible;

    fn publish(&self, _message: M) -> Result<(), Self::Error> {
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (_tx, rx) = std::sync::mpsc::channel();
        Subscription::new(rx)
    }
}

use chrono::{DateTime, Utc};

/// A ledger fact published after commit.
///
/// Events are immutable, versioned (schema evolution) and append-only.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "ledger.lot.received").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the movement happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{PartitionKey, StoreId};

use crate::event::Event;

/// Envelope for a published ledger event.
///
/// Carries the partition the movement belongs to so subscribers can route by
/// store or subject without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    partition: PartitionKey,
    event_type: String,
    event_version: u32,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        partition: PartitionKey,
        event_type: impl Into<String>,
        event_version: u32,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            partition,
            event_type: event_type.into(),
            event_version,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn partition(&self) -> PartitionKey {
        self.partition
    }

    pub fn store_id(&self) -> StoreId {
        self.partition.store
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event; ids are UUIDv7 so envelopes sort by publication time.
    pub fn wrap(partition: PartitionKey, event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            partition,
            event.event_type(),
            event.version(),
            event,
        )
    }
}

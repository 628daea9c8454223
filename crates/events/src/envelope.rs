use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kontor_core::{AggregateId, TenantId, UserId};

/// A committed event as it travels over the bus: payload plus tenant, stream
/// position and origin.
///
/// `sequence_number` is 1-based and gap-free per aggregate stream; consumers use it to
/// drop redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,
    event_type: String,

    actor_id: Option<UserId>,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    /// A system-originated envelope stamped with the current time; see [`Self::with_origin`].
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            actor_id: None,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Who caused the event and when it happened in business time.
    pub fn with_origin(mut self, actor_id: Option<UserId>, occurred_at: DateTime<Utc>) -> Self {
        self.actor_id = actor_id;
        self.occurred_at = occurred_at;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Module prefix of the event type: `invoicing` for `invoicing.invoice.issued`.
    pub fn topic(&self) -> &str {
        self.event_type.split('.').next().unwrap_or_default()
    }

    pub fn actor_id(&self) -> Option<UserId> {
        self.actor_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_the_module_prefix() {
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            AggregateId::new(),
            "invoicing.invoice",
            1,
            "invoicing.invoice.issued",
            (),
        );
        assert_eq!(env.topic(), "invoicing");
        assert_eq!(env.actor_id(), None);

        let actor = UserId::new();
        let at = Utc::now();
        let env = env.with_origin(Some(actor), at);
        assert_eq!(env.actor_id(), Some(actor));
        assert_eq!(env.occurred_at(), at);
    }
}

use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, ALLOCATIONS_TOTAL, RESCHEDULES_TOTAL};

use super::conflict::{first_conflict, validate_span};
use super::{apply_reschedule, AllocationSource, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_event(
        &self,
        id: Ulid,
        title: String,
        description: String,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        if title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("event title too long"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("event description too long"));
        }
        if self.events.len() >= MAX_EVENTS {
            return Err(EngineError::LimitExceeded("too many events"));
        }

        let _gate = self.commit_gate.read().await;
        if self.events.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let record = Record::EventCreated {
            id,
            title: title.clone(),
            description: description.clone(),
            span,
        };
        self.wal_append(&record).await?;
        let event = EventInfo {
            id,
            title,
            description,
            span,
        };
        self.events.insert(id, Arc::new(RwLock::new(event)));
        Ok(())
    }

    pub async fn create_resource(&self, id: Ulid, name: String, kind: String) -> Result<(), EngineError> {
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if kind.len() > MAX_KIND_LEN {
            return Err(EngineError::LimitExceeded("resource kind too long"));
        }

        let _gate = self.commit_gate.read().await;
        if self.resources.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let record = Record::ResourceCreated {
            id,
            name: name.clone(),
            kind: kind.clone(),
        };
        self.wal_append(&record).await?;
        let rs = ResourceState::new(id, name, kind);
        self.resource_seq.insert(id, self.next_seq());
        self.resources.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    /// Commit `resource_id` to `event_id` for the event's whole span.
    ///
    /// The conflict check, the WAL append and the in-memory apply all happen
    /// under the resource's write lock, so concurrent allocations of one
    /// resource are serialized and at most one of two overlapping requests
    /// can succeed.
    pub async fn allocate(&self, id: Ulid, event_id: Ulid, resource_id: Ulid) -> Result<(), EngineError> {
        let result = self.allocate_inner(id, event_id, resource_id).await;
        metrics::counter!(ALLOCATIONS_TOTAL, "status" => observability::outcome_label(&result))
            .increment(1);
        result
    }

    async fn allocate_inner(&self, id: Ulid, event_id: Ulid, resource_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let event = self
            .get_event(&event_id)
            .ok_or(EngineError::NotFound(event_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        if self.get_resource_for_allocation(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = event.read().await;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_ALLOCATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many allocations on resource"));
        }
        if guard.holds_event(event_id) {
            return Err(EngineError::DuplicateAllocation {
                event_id,
                resource_id,
            });
        }
        if let Some(hit) = first_conflict(&guard.bookings, &event.span, None) {
            debug!(
                resource = %resource_id,
                event = %event_id,
                blocking_event = %hit.event_id,
                "allocation refused: resource already booked"
            );
            return Err(EngineError::Conflict(hit.allocation_id));
        }
        // Two resources' locks do not serialize one id: claim it before the append.
        if !self.claim_allocation_id(id, resource_id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let record = Record::AllocationCreated {
            id,
            event_id,
            resource_id,
        };
        if let Err(e) = self.wal_append(&record).await {
            self.allocation_to_resource.remove(&id);
            return Err(e);
        }
        self.apply_allocation(&mut guard, id, &event);
        info!(allocation = %id, resource = %resource_id, event = %event_id, "resource allocated");
        Ok(())
    }

    /// Move an event to a new span. Every resource the event holds is
    /// re-checked against the other events booked on it; if any would
    /// conflict, nothing changes.
    pub async fn reschedule_event(&self, event_id: Ulid, span: Span) -> Result<(), EngineError> {
        let result = self.reschedule_inner(event_id, span).await;
        metrics::counter!(RESCHEDULES_TOTAL, "status" => observability::outcome_label(&result))
            .increment(1);
        result
    }

    async fn reschedule_inner(&self, event_id: Ulid, span: Span) -> Result<(), EngineError> {
        validate_span(&span)?;
        let _gate = self.commit_gate.read().await;
        let event = self
            .get_event(&event_id)
            .ok_or(EngineError::NotFound(event_id))?;
        // Holding the event write lock keeps new allocations of this event out.
        let mut event = event.write().await;

        let mut guards = Vec::new();
        for rid in self.resource_ids_for_event(&event_id) {
            let rs = self.get_resource(&rid).ok_or(EngineError::NotFound(rid))?;
            guards.push(rs.write_owned().await);
        }
        for guard in &guards {
            if let Some(hit) = first_conflict(&guard.bookings, &span, Some(event_id)) {
                debug!(
                    resource = %guard.id,
                    event = %event_id,
                    blocking_event = %hit.event_id,
                    "reschedule refused: resource already booked"
                );
                return Err(EngineError::Conflict(hit.allocation_id));
            }
        }

        let record = Record::EventRescheduled { id: event_id, span };
        self.wal_append(&record).await?;
        apply_reschedule(&mut event, span, &mut guards);
        info!(event = %event_id, start = span.start, end = span.end, resources = guards.len(), "event rescheduled");
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the records needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut records = Vec::new();
        for event in self.list_events().await {
            records.push(Record::EventCreated {
                id: event.id,
                title: event.title,
                description: event.description,
                span: event.span,
            });
        }
        let snapshot = self.snapshot().await;
        for resource in snapshot.resources() {
            records.push(Record::ResourceCreated {
                id: resource.id,
                name: resource.name.clone(),
                kind: resource.kind.clone(),
            });
        }
        for booking in snapshot.bookings() {
            records.push(Record::AllocationCreated {
                id: booking.allocation_id,
                event_id: booking.event_id,
                resource_id: booking.resource_id,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

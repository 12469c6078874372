use std::time::Instant;

use ulid::Ulid;

use crate::model::*;
use crate::observability::{CONFLICT_CHECKS_TOTAL, REPORT_DURATION_SECONDS};

use super::conflict::{checked_span, first_conflict, list_conflicts};
use super::utilization::compute_utilization;
use super::{AllocationSource, Engine, EngineError, LedgerSnapshot};

impl Engine {
    /// Would `[start, end)` overlap an existing allocation of `resource_id`?
    ///
    /// Allocations of `ignore_event` are disregarded. An unknown resource has
    /// nothing booked and yields `Ok(false)`.
    pub async fn has_conflict(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        ignore_event: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let candidate = checked_span(start, end)?;
        metrics::counter!(CONFLICT_CHECKS_TOTAL).increment(1);
        let rs = match self.get_resource(&resource_id) {
            Some(rs) => rs,
            None => return Ok(false),
        };
        let guard = rs.read().await;
        Ok(first_conflict(&guard.bookings, &candidate, ignore_event).is_some())
    }

    /// Allocations that overlap an allocation of another event on the same resource.
    pub async fn list_conflicts(&self) -> Vec<Booking> {
        list_conflicts(&self.snapshot().await)
    }

    /// Booked hours per resource inside `[window_start, window_end)`.
    /// An empty or inverted window reports zero everywhere.
    pub async fn compute_utilization(&self, window_start: Ms, window_end: Ms) -> Vec<UtilizationRow> {
        let started = Instant::now();
        let window = Span {
            start: window_start,
            end: window_end,
        };
        let rows = compute_utilization(&self.snapshot().await, &window);
        metrics::histogram!(REPORT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        rows
    }

    /// Copy of every resource with its bookings, both in creation order. Each
    /// resource is read under its own lock.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::new();
        for id in self.resource_ids_in_creation_order() {
            let Some(rs) = self.get_resource(&id) else {
                continue;
            };
            let guard = rs.read().await;
            snapshot.push_resource(guard.info(), guard.bookings.clone());
        }
        snapshot.sort_allocations_by_key(|b| {
            self.allocation_seq
                .get(&b.allocation_id)
                .map_or(u64::MAX, |seq| *seq)
        });
        snapshot
    }

    pub async fn event_info(&self, id: Ulid) -> Option<EventInfo> {
        let event = self.get_event(&id)?;
        let guard = event.read().await;
        Some(guard.clone())
    }

    /// All events, ascending id.
    pub async fn list_events(&self) -> Vec<EventInfo> {
        let mut shared: Vec<_> = self
            .events
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        shared.sort_by_key(|(id, _)| *id);

        let mut events = Vec::with_capacity(shared.len());
        for (_, event) in shared {
            events.push(event.read().await.clone());
        }
        events
    }

    /// All resources, in creation order.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut resources = Vec::new();
        for id in self.resource_ids_in_creation_order() {
            if let Some(rs) = self.get_resource(&id) {
                resources.push(rs.read().await.info());
            }
        }
        resources
    }

    /// All allocations across resources, in creation order.
    pub async fn list_allocations(&self) -> Vec<AllocationInfo> {
        self.snapshot()
            .await
            .bookings()
            .map(Booking::allocation)
            .collect()
    }

    pub async fn bookings_for_resource(&self, resource_id: Ulid) -> Vec<Booking> {
        let rs = match self.get_resource(&resource_id) {
            Some(rs) => rs,
            None => return vec![],
        };
        let guard = rs.read().await;
        guard.bookings.clone()
    }
}

use std::collections::HashMap;

use tracing::warn;
use ulid::Ulid;

use crate::model::*;

/// Read access to the booked state of a ledger. Conflict detection and
/// utilization reporting run against this and nothing else.
pub trait AllocationSource {
    /// Every resource, in the source's natural order.
    fn resources(&self) -> &[ResourceInfo];

    /// Allocations of one resource, resolved against their events, in creation
    /// order. Unknown resources have none.
    fn bookings_for_resource(&self, resource_id: &Ulid) -> &[Booking];

    /// Every allocation. By default resource by resource, creation order
    /// within each; sources that know the global creation order follow it.
    fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.resources()
            .iter()
            .flat_map(move |r| self.bookings_for_resource(&r.id))
    }
}

/// Owned, point-in-time copy of resources and their bookings.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    resources: Vec<ResourceInfo>,
    bookings: HashMap<Ulid, Vec<Booking>>,
    /// Position of every booking as (resource, index), in listing order.
    order: Vec<(Ulid, usize)>,
}

impl LedgerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource with its bookings. Resources keep insertion order;
    /// the bookings are listed after every booking already present.
    pub fn push_resource(&mut self, resource: ResourceInfo, bookings: Vec<Booking>) {
        self.order.extend((0..bookings.len()).map(|i| (resource.id, i)));
        self.bookings.insert(resource.id, bookings);
        self.resources.push(resource);
    }

    /// Build a snapshot from raw entity collections, resolving every allocation
    /// against its event. Allocations naming an unknown event or resource are
    /// dropped. Bookings are listed in the order of `allocations`.
    pub fn assemble(
        resources: Vec<ResourceInfo>,
        events: &[EventInfo],
        allocations: &[AllocationInfo],
    ) -> Self {
        let events: HashMap<Ulid, &EventInfo> = events.iter().map(|e| (e.id, e)).collect();
        let mut bookings: HashMap<Ulid, Vec<Booking>> =
            resources.iter().map(|r| (r.id, Vec::new())).collect();
        let mut order = Vec::with_capacity(allocations.len());

        for alloc in allocations {
            let Some(event) = events.get(&alloc.event_id) else {
                warn!(allocation = %alloc.id, event = %alloc.event_id, "allocation names unknown event, skipped");
                continue;
            };
            let Some(list) = bookings.get_mut(&alloc.resource_id) else {
                warn!(allocation = %alloc.id, resource = %alloc.resource_id, "allocation names unknown resource, skipped");
                continue;
            };
            order.push((alloc.resource_id, list.len()));
            list.push(Booking {
                allocation_id: alloc.id,
                event_id: event.id,
                resource_id: alloc.resource_id,
                title: event.title.clone(),
                span: event.span,
            });
        }

        Self {
            resources,
            bookings,
            order,
        }
    }

    /// Reorder the cross-resource listing by `key`. Equal keys keep their
    /// current order. Per-resource slices are untouched.
    pub fn sort_allocations_by_key<K: Ord>(&mut self, mut key: impl FnMut(&Booking) -> K) {
        let bookings = &self.bookings;
        self.order
            .sort_by_cached_key(|(rid, i)| bookings.get(rid).and_then(|list| list.get(*i)).map(&mut key));
    }

    pub fn allocation_count(&self) -> usize {
        self.bookings.values().map(Vec::len).sum()
    }
}

impl AllocationSource for LedgerSnapshot {
    fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    fn bookings_for_resource(&self, resource_id: &Ulid) -> &[Booking] {
        self.bookings
            .get(resource_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.order
            .iter()
            .filter_map(|(rid, i)| self.bookings.get(rid)?.get(*i))
    }
}

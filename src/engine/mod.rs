mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod utilization;

pub use conflict::{first_conflict, has_conflict, list_conflicts};
pub use error::EngineError;
pub use store::{AllocationSource, LedgerSnapshot};
pub use utilization::{centi_hours, compute_utilization};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedEventState = Arc<RwLock<EventInfo>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} records: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Record, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory ledger of events, resources and allocations, durable through the WAL.
///
/// Lock order: `commit_gate`, then event locks, then resource locks in
/// ascending id order.
pub struct Engine {
    pub(super) resources: DashMap<Ulid, SharedResourceState>,
    pub(super) events: DashMap<Ulid, SharedEventState>,
    /// Reverse lookup: allocation id → resource id
    pub(super) allocation_to_resource: DashMap<Ulid, Ulid>,
    /// Event → resources it is allocated to.
    pub(super) event_resources: DashMap<Ulid, Vec<Ulid>>,
    /// Creation sequence shared by resources and allocations; listings follow it.
    pub(super) next_seq: AtomicU64,
    pub(super) resource_seq: DashMap<Ulid, u64>,
    pub(super) allocation_seq: DashMap<Ulid, u64>,
    /// Mutations hold it shared from validation to apply; compaction holds it
    /// exclusively so no record lands in a WAL that is about to be replaced.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let mut wal = Wal::open(&wal_path)?;
        wal.carry_appends(records.len() as u64);
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            events: DashMap::new(),
            allocation_to_resource: DashMap::new(),
            event_resources: DashMap::new(),
            next_seq: AtomicU64::new(0),
            resource_seq: DashMap::new(),
            allocation_seq: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        // Sole owner of every Arc here: try_read/try_write cannot fail.
        // blocking_read/blocking_write would panic inside a runtime.
        for record in records {
            engine.replay_record(record);
        }

        Ok(engine)
    }

    fn replay_record(&self, record: Record) {
        match record {
            Record::EventCreated {
                id,
                title,
                description,
                span,
            } => {
                let event = EventInfo {
                    id,
                    title,
                    description,
                    span,
                };
                self.events.insert(id, Arc::new(RwLock::new(event)));
            }
            Record::ResourceCreated { id, name, kind } => {
                let rs = ResourceState::new(id, name, kind);
                self.resources.insert(id, Arc::new(RwLock::new(rs)));
                self.resource_seq.insert(id, self.next_seq());
            }
            Record::AllocationCreated {
                id,
                event_id,
                resource_id,
            } => {
                let (Some(event), Some(rs)) = (self.get_event(&event_id), self.get_resource(&resource_id))
                else {
                    warn!(allocation = %id, "replay: allocation references a missing event or resource");
                    return;
                };
                let event = event.try_read().expect("replay: uncontended read");
                let mut guard = rs.try_write().expect("replay: uncontended write");
                self.apply_allocation(&mut guard, id, &event);
            }
            Record::EventRescheduled { id, span } => {
                let Some(event) = self.get_event(&id) else {
                    warn!(event = %id, "replay: reschedule of a missing event");
                    return;
                };
                let mut event = event.try_write().expect("replay: uncontended write");
                let mut guards: Vec<_> = self
                    .resource_ids_for_event(&id)
                    .iter()
                    .filter_map(|rid| self.get_resource(rid))
                    .map(|rs| rs.try_write_owned().expect("replay: uncontended write"))
                    .collect();
                apply_reschedule(&mut event, span, &mut guards);
            }
        }
    }

    /// Write a record to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, record: &Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_event(&self, id: &Ulid) -> Option<SharedEventState> {
        self.events.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_allocation(&self, allocation_id: &Ulid) -> Option<Ulid> {
        self.allocation_to_resource.get(allocation_id).map(|e| *e.value())
    }

    /// Reserve `allocation_id` for `resource_id`. False if another allocation
    /// already holds the id. The map shard stays locked only for this call.
    pub(super) fn claim_allocation_id(&self, allocation_id: Ulid, resource_id: Ulid) -> bool {
        match self.allocation_to_resource.entry(allocation_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
                true
            }
        }
    }

    pub(super) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Resource ids in the order they were created.
    pub(super) fn resource_ids_in_creation_order(&self) -> Vec<Ulid> {
        let mut ids: Vec<(u64, Ulid)> = self
            .resource_seq
            .iter()
            .map(|e| (*e.value(), *e.key()))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Resources `event_id` is allocated to, ascending.
    pub(super) fn resource_ids_for_event(&self, event_id: &Ulid) -> Vec<Ulid> {
        let mut ids = self
            .event_resources
            .get(event_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Record an allocation on a resource. Caller holds the resource write
    /// lock and at least the event read lock.
    pub(super) fn apply_allocation(&self, rs: &mut ResourceState, id: Ulid, event: &EventInfo) {
        rs.push_booking(Booking {
            allocation_id: id,
            event_id: event.id,
            resource_id: rs.id,
            title: event.title.clone(),
            span: event.span,
        });
        self.allocation_to_resource.insert(id, rs.id);
        self.allocation_seq.insert(id, self.next_seq());
        let mut held = self.event_resources.entry(event.id).or_default();
        if !held.contains(&rs.id) {
            held.push(rs.id);
        }
    }
}

/// Move an event and all of its bookings to `span` (caller holds every lock).
pub(super) fn apply_reschedule(
    event: &mut EventInfo,
    span: Span,
    resources: &mut [OwnedRwLockWriteGuard<ResourceState>],
) {
    event.span = span;
    for rs in resources.iter_mut() {
        rs.reschedule(event.id, span);
    }
}

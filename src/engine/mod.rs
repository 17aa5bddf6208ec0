mod conflict;
mod dates;
mod directory;
mod error;
mod force;
mod gender;
mod mutations;
mod occupant;
mod queries;

pub use conflict::{detect_conflicts, SlotReport, SlotState};
pub use dates::expand_dates;
pub use error::EngineError;
pub use gender::check_gender;
pub use occupant::ResolvedOccupant;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::collab::{AdminList, Authorizer, Capability, NoTravelDesk, TravelDesk};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
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
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

pub struct Engine {
    pub(super) houses: DashMap<Ulid, StaffHouse>,
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) occupants: DashMap<Ulid, Occupant>,
    /// House → rooms index.
    pub(super) house_rooms: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: allocation id → room id.
    pub(super) allocation_to_room: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) travel: Arc<dyn TravelDesk>,
    pub(super) authz: Arc<dyn Authorizer>,
    /// Mutations hold this shared for their whole duration; compaction holds it exclusively.
    pub(super) gate: RwLock<()>,
    /// Serializes directory registrations so the existence check and the insert are one step.
    pub(super) registry: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            houses: DashMap::new(),
            rooms: DashMap::new(),
            occupants: DashMap::new(),
            house_rooms: DashMap::new(),
            allocation_to_room: DashMap::new(),
            wal_tx,
            notify,
            travel: Arc::new(NoTravelDesk),
            authz: Arc::new(AdminList::default()),
            gate: RwLock::new(()),
            registry: Mutex::new(()),
        };

        // We're the sole owner of every room lock here, so try_write always succeeds.
        // Never block: replay may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    pub fn with_travel_desk(mut self, travel: Arc<dyn TravelDesk>) -> Self {
        self.travel = travel;
        self
    }

    pub fn with_authorizer(mut self, authz: Arc<dyn Authorizer>) -> Self {
        self.authz = authz;
        self
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::HouseRegistered(house) => {
                self.houses.insert(house.id, house.clone());
            }
            Event::RoomRegistered(room) => self.install_room(room.clone()),
            Event::OccupantRegistered(occupant) => {
                self.occupants.insert(occupant.id, occupant.clone());
            }
            Event::RoomStatusChanged { id, status } => {
                if let Some(rs) = self.get_room(id)
                    && let Ok(mut guard) = rs.try_write()
                {
                    guard.room.status = *status;
                }
            }
            Event::Committed { ops, .. } => {
                for op in ops {
                    let room_id = op.room_id();
                    let Some(rs) = self.get_room(&room_id) else {
                        warn!("replay: allocation op for unknown room {room_id}");
                        continue;
                    };
                    let Ok(mut guard) = rs.try_write() else {
                        warn!("replay: room {room_id} unexpectedly locked");
                        continue;
                    };
                    self.apply_op(&mut guard, op);
                }
            }
        }
    }

    pub(super) fn install_room(&self, room: Room) {
        let mut listed = self.house_rooms.entry(room.house_id).or_default();
        if !listed.contains(&room.id) {
            listed.push(room.id);
        }
        drop(listed);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
    }

    fn apply_op(&self, rs: &mut RoomState, op: &AllocationOp) {
        rs.apply(op);
        match op {
            AllocationOp::Insert(a) | AllocationOp::Replace(a) => {
                self.allocation_to_room.insert(a.id, a.room_id);
            }
            AllocationOp::Delete { id, room_id } => {
                // A move re-inserts the same id into another room within the batch.
                self.allocation_to_room.remove_if(id, |_, r| r == room_id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::TransactionFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransactionFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransactionFailure(e.to_string()))
    }

    /// Commit one unit of work across the locked rooms.
    ///
    /// Every room's share of `ops` is staged against its active-slot index first;
    /// a clash fails the whole batch with `Conflict`. Only then is the batch
    /// written to the WAL as a single record and applied.
    pub(super) async fn commit(
        &self,
        guards: &mut [RoomGuard],
        actor: &str,
        ops: Vec<AllocationOp>,
    ) -> Result<(), EngineError> {
        if ops.is_empty() {
            return Ok(());
        }
        for guard in guards.iter() {
            let mine: Vec<AllocationOp> = ops
                .iter()
                .filter(|op| op.room_id() == guard.id())
                .cloned()
                .collect();
            if let Err(dates) = guard.stage(&mine) {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "kind" => "constraint")
                    .increment(1);
                return Err(EngineError::Conflict {
                    room_id: guard.id(),
                    dates,
                });
            }
        }

        let event = Event::Committed {
            actor: Some(actor.to_string()),
            ops,
        };
        self.wal_append(&event).await?;

        if let Event::Committed { ops, .. } = &event {
            for op in ops {
                if let Some(guard) = guards.iter_mut().find(|g| g.id() == op.room_id()) {
                    self.apply_op(guard, op);
                }
            }
        }
        for guard in guards.iter() {
            self.notify.send(guard.id(), &event);
        }
        Ok(())
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_allocation(&self, allocation_id: &Ulid) -> Option<Ulid> {
        self.allocation_to_room.get(allocation_id).map(|e| *e.value())
    }

    /// Lookup allocation → room, acquire the room's write lock.
    pub(super) async fn resolve_allocation_write(
        &self,
        allocation_id: &Ulid,
    ) -> Result<RoomGuard, EngineError> {
        loop {
            let room_id = self
                .get_room_for_allocation(allocation_id)
                .ok_or(EngineError::NotFound(*allocation_id))?;
            let rs = self
                .get_room(&room_id)
                .ok_or(EngineError::NotFound(room_id))?;
            let guard = rs.write_owned().await;
            // The row may have moved rooms while we waited.
            if self.get_room_for_allocation(allocation_id) == Some(room_id) {
                return Ok(guard);
            }
        }
    }

    pub(super) fn require(&self, actor: &str, capability: Capability) -> Result<(), EngineError> {
        if self.authz.can(actor, capability) {
            Ok(())
        } else {
            warn!("{actor} denied {}", capability.as_str());
            Err(EngineError::Forbidden(capability.as_str()))
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _quiesced = self.gate.write().await;
        let mut events: Vec<Event> = self
            .houses
            .iter()
            .map(|e| Event::HouseRegistered(e.value().clone()))
            .collect();
        events.extend(
            self.occupants
                .iter()
                .map(|e| Event::OccupantRegistered(e.value().clone())),
        );

        let rooms: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let guard = rs.read().await;
            events.push(Event::RoomRegistered(guard.room.clone()));
            if !guard.allocations.is_empty() {
                events.push(Event::Committed {
                    actor: None,
                    ops: guard
                        .allocations
                        .iter()
                        .cloned()
                        .map(AllocationOp::Insert)
                        .collect(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::TransactionFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::TransactionFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::TransactionFailure(e.to_string()))
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

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

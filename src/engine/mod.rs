mod error;
mod guard;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;
mod window;

pub use error::{EngineError, EntityKind, NotFoundReason};
pub use queries::BookingView;
pub use store::{IdSequence, SharedItemState, Store};
pub use window::{last_booking, next_booking, BookingState};

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;

use crate::model::*;
use crate::wal::Wal;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Waits for one append, drains whatever else is already
/// queued, then writes the batch with a single fsync and answers every
/// sender. A non-append command ends the batch early and runs after it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes are not
    // attributed to the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(error = %e, batch = batch.len(), "WAL batch commit failed");
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
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
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// In-memory marketplace state made durable by the WAL.
///
/// Every mutation validates against current state, appends its event to the
/// log and only then applies it. Item-scoped mutations hold the item's write
/// lock across all three steps.
pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared, compaction exclusively, so a snapshot never
    /// misses an event that is logged but not yet applied.
    pub(super) write_gate: RwLock<()>,
    /// Serializes registrations and email changes for the uniqueness check.
    pub(super) user_writes: Mutex<()>,
}

impl Engine {
    /// Replay the log at `wal_path` and start the writer task. Must run
    /// inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            write_gate: RwLock::new(()),
            user_writes: Mutex::new(()),
        };
        for event in &events {
            engine.replay_event(event);
        }
        Ok(engine)
    }

    /// Nothing else holds these locks during replay, so `try_write` is
    /// uncontended and never waits inside the runtime.
    fn replay_event(&self, event: &Event) {
        let Some(item_id) = event.item_scope() else {
            self.store.apply_global(event);
            return;
        };
        let Some(shared) = self.store.item(item_id) else {
            warn!(item_id, "replay: event for unknown item skipped");
            return;
        };
        if let Ok(mut guard) = shared.try_write() {
            self.store.apply_to_item(&mut guard, event);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Log, then apply to the item the caller has write-locked.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut ItemState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_item(state, event);
        Ok(())
    }

    /// Log, then apply an event that needs no item lock.
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_global(event);
        Ok(())
    }

    pub(super) fn require_user(&self, id: Id) -> Result<User, EngineError> {
        self.store
            .user(id)
            .ok_or_else(|| EngineError::missing(EntityKind::User, id))
    }

    pub(super) fn require_item(&self, id: Id) -> Result<SharedItemState, EngineError> {
        self.store
            .item(id)
            .ok_or_else(|| EngineError::missing(EntityKind::Item, id))
    }

    pub(super) fn require_request(&self, id: Id) -> Result<ItemRequest, EngineError> {
        self.store
            .request(id)
            .ok_or_else(|| EngineError::missing(EntityKind::Request, id))
    }

    /// Booking id → owning item's lock. Missing bookings are NotFound.
    pub(super) fn resolve_booking(&self, booking_id: Id) -> Result<SharedItemState, EngineError> {
        self.store
            .item_for_booking(booking_id)
            .and_then(|item_id| self.store.item(item_id))
            .ok_or_else(|| EngineError::missing(EntityKind::Booking, booking_id))
    }
}

mod accounts;
mod coordinator;
mod error;
mod ledger;
mod orchestrator;
mod schedules;
#[cfg(test)]
mod tests;

pub use accounts::{AccountProvider, AccountStore};
pub use coordinator::CapacityCoordinator;
pub use error::{EngineError, ErrorBody};
pub use ledger::{LedgerTxn, SlotLedger};
pub use orchestrator::{ScheduleOrchestrator, ScheduleQuery};
pub use schedules::ScheduleStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::model::*;
use crate::wal::Wal;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
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
    // Flush even after an append error so buffered bytes don't leak into the next batch.
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

/// Handle to the journal writer. Cheap to clone.
///
/// Every state change goes through [`Journal::commit`]: the event is made
/// durable first and only then applied in memory, all under the shared side
/// of the commit gate. Compaction takes the exclusive side, so a snapshot
/// never races a half-applied commit.
#[derive(Clone)]
pub struct Journal {
    tx: mpsc::Sender<WalCommand>,
    gate: Arc<RwLock<()>>,
}

impl Journal {
    fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Self {
            tx,
            gate: Arc::new(RwLock::new(())),
        }
    }

    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))??;
        Ok(())
    }

    /// Durably append `event`, then run `apply`. If the append fails `apply`
    /// never runs and whatever it captured is dropped.
    pub async fn commit<R>(&self, event: &Event, apply: impl FnOnce() -> R) -> Result<R, EngineError> {
        let _gate = self.gate.read().await;
        self.append(event).await?;
        Ok(apply())
    }

    /// Rewrite the log from `snapshot`, taken while no commit is in flight.
    pub async fn compact(&self, snapshot: impl FnOnce() -> Vec<Event>) -> Result<usize, EngineError> {
        let _gate = self.gate.write().await;
        let events = snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))??;
        Ok(count)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// All stores plus the use-case layer, sharing one journal.
pub struct Engine {
    journal: Journal,
    pub accounts: Arc<AccountStore>,
    pub schedules: Arc<ScheduleStore>,
    pub ledger: Arc<SlotLedger>,
    pub orchestrator: ScheduleOrchestrator,
}

impl Engine {
    /// Replay the journal at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let journal = Journal::spawn(wal);

        let accounts = Arc::new(AccountStore::new(journal.clone()));
        let schedules = Arc::new(ScheduleStore::new());
        let ledger = Arc::new(SlotLedger::new(journal.clone()));

        for event in &events {
            match event {
                Event::AccountCreated { id, nickname, role } => accounts.restore(Account {
                    id: *id,
                    nickname: nickname.clone(),
                    role: *role,
                }),
                Event::SlotsCreated { starts } => ledger.restore_buckets(starts),
                Event::SlotRestored { slot } => ledger.restore_slot(*slot),
                Event::SlotsAdjusted { deltas } => ledger.restore_deltas(deltas),
                Event::ScheduleCommitted { schedule, deltas } => {
                    schedules.upsert(schedule.clone());
                    ledger.restore_deltas(deltas);
                }
            }
        }
        info!(
            events = events.len(),
            accounts = accounts.len(),
            schedules = schedules.len(),
            slots = ledger.len(),
            "journal replayed"
        );

        let orchestrator = ScheduleOrchestrator::new(
            accounts.clone(),
            schedules.clone(),
            CapacityCoordinator::new(ledger.clone()),
            journal.clone(),
        );

        Ok(Self {
            journal,
            accounts,
            schedules,
            ledger,
            orchestrator,
        })
    }

    /// Compact the WAL down to the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        self.journal.compact(|| self.snapshot_events()).await
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .accounts
            .snapshot()
            .into_iter()
            .map(|a| Event::AccountCreated {
                id: a.id,
                nickname: a.nickname,
                role: a.role,
            })
            .collect();
        events.extend(
            self.ledger
                .snapshot()
                .into_iter()
                .map(|slot| Event::SlotRestored { slot }),
        );
        events.extend(
            self.schedules
                .snapshot()
                .into_iter()
                .map(|schedule| Event::ScheduleCommitted {
                    schedule,
                    deltas: Vec::new(),
                }),
        );
        events
    }
}

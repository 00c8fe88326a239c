//! Hour-slot capacity ledger.
//!
//! One row per hour, keyed by the slot start instant. Committed seat counts
//! live in atomics so unlocked reads never block behind a transaction; every
//! write goes through a [`LedgerTxn`] that holds the row locks of the buckets
//! it touches until it commits or is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::limits::MAX_APPLICANTS;
use crate::model::*;

use super::{EngineError, Journal};

struct SlotCell {
    slot_start: Ms,
    max_applicants: i64,
    confirmed: AtomicI64,
    row_lock: Arc<Mutex<()>>,
}

impl SlotCell {
    fn new(slot: HourSlot) -> Self {
        Self {
            slot_start: slot.slot_start,
            max_applicants: slot.max_applicants,
            confirmed: AtomicI64::new(slot.confirmed_applicants),
            row_lock: Arc::new(Mutex::new(())),
        }
    }

    fn snapshot(&self) -> HourSlot {
        HourSlot {
            slot_start: self.slot_start,
            max_applicants: self.max_applicants,
            confirmed_applicants: self.confirmed.load(Ordering::Acquire),
        }
    }
}

pub struct SlotLedger {
    cells: DashMap<Ms, Arc<SlotCell>>,
    journal: Journal,
}

impl SlotLedger {
    pub(super) fn new(journal: Journal) -> Self {
        Self {
            cells: DashMap::new(),
            journal,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Materialize every missing hour bucket of `range` with zero confirmed
    /// applicants. Existing buckets are left untouched.
    pub async fn ensure_buckets(&self, range: &TimeRange) -> Result<(), EngineError> {
        let mut created = Vec::new();
        for start in range.hours() {
            if let Entry::Vacant(slot) = self.cells.entry(start) {
                slot.insert(Arc::new(SlotCell::new(HourSlot::new(start))));
                created.push(start);
            }
        }
        if created.is_empty() {
            return Ok(());
        }
        debug!(range = %range, created = created.len(), "materialized hour buckets");
        metrics::counter!(crate::observability::SLOTS_CREATED_TOTAL).increment(created.len() as u64);
        self.journal
            .commit(&Event::SlotsCreated { starts: created }, || ())
            .await
    }

    /// Committed bucket for the hour containing-or-following `at`.
    pub async fn get(&self, at: Ms) -> Result<HourSlot, EngineError> {
        let out_of_range = || EngineError::InvalidArgument(format!("time {at} is out of range"));
        let start = align_hour_up(at).ok_or_else(out_of_range)?;
        let end = start.checked_add(crate::limits::HOUR_MS).ok_or_else(out_of_range)?;
        let range = TimeRange::new(start, end)?;
        self.ensure_buckets(&range).await?;
        Ok(self.read(start))
    }

    /// All buckets of `range` in slot order, materializing missing ones.
    pub async fn page(&self, range: &TimeRange) -> Result<SlotPage, EngineError> {
        self.ensure_buckets(range).await?;
        Ok(SlotPage {
            items: range.hours().map(|start| self.read(start)).collect(),
        })
    }

    /// Bottleneck seats across `range`: the smallest `max - confirmed` of any
    /// bucket. Unlocked, committed state only. Buckets that were never
    /// materialized count as empty.
    pub fn min_remaining_in_range(&self, range: &TimeRange) -> i64 {
        range
            .hours()
            .map(|start| self.read(start).remaining())
            .min()
            .unwrap_or(i64::from(MAX_APPLICANTS))
    }

    /// Open a transaction holding the row locks of every bucket in `ranges`.
    ///
    /// Buckets are ensured first, then locked once each in ascending slot
    /// order, so two transactions over overlapping hours can never deadlock.
    pub async fn lock_and_fetch_range(&self, ranges: &[TimeRange]) -> Result<LedgerTxn, EngineError> {
        for range in ranges {
            self.ensure_buckets(range).await?;
        }
        let hours = TimeRange::union_hours(ranges);

        let wait_start = std::time::Instant::now();
        let mut rows = BTreeMap::new();
        for start in hours {
            let cell = self.cell(start);
            let guard = cell.row_lock.clone().lock_owned().await;
            rows.insert(start, LockedRow { cell, _guard: guard });
        }
        metrics::histogram!(crate::observability::LEDGER_LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());

        Ok(LedgerTxn {
            rows,
            staged: BTreeMap::new(),
        })
    }

    /// Lock `range`, add `delta` to every bucket and commit on its own.
    pub async fn add_applicants_delta(&self, range: &TimeRange, delta: i64) -> Result<(), EngineError> {
        let mut txn = self.lock_and_fetch_range(&[*range]).await?;
        txn.add_applicants_delta(range, delta)?;
        txn.commit(&self.journal).await
    }

    pub fn snapshot(&self) -> Vec<HourSlot> {
        let mut slots: Vec<HourSlot> = self.cells.iter().map(|e| e.value().snapshot()).collect();
        slots.sort_by_key(|s| s.slot_start);
        slots
    }

    fn read(&self, start: Ms) -> HourSlot {
        self.cells
            .get(&start)
            .map(|e| e.value().snapshot())
            .unwrap_or_else(|| HourSlot::new(start))
    }

    fn cell(&self, start: Ms) -> Arc<SlotCell> {
        self.cells
            .entry(start)
            .or_insert_with(|| Arc::new(SlotCell::new(HourSlot::new(start))))
            .value()
            .clone()
    }

    // ── Replay (single owner, no locking) ────────────────────

    pub(super) fn restore_buckets(&self, starts: &[Ms]) {
        for start in starts {
            self.cell(*start);
        }
    }

    pub(super) fn restore_slot(&self, slot: HourSlot) {
        self.cells.insert(slot.slot_start, Arc::new(SlotCell::new(slot)));
    }

    pub(super) fn restore_deltas(&self, deltas: &[SlotDelta]) {
        for d in deltas {
            self.cell(d.slot_start).confirmed.fetch_add(d.delta, Ordering::AcqRel);
        }
    }
}

struct LockedRow {
    cell: Arc<SlotCell>,
    _guard: OwnedMutexGuard<()>,
}

/// Row-locked view of a set of hour buckets.
///
/// Deltas are staged, not applied: reads through the transaction see them,
/// everyone else sees committed counts. Dropping the transaction without
/// committing is a rollback.
pub struct LedgerTxn {
    rows: BTreeMap<Ms, LockedRow>,
    staged: BTreeMap<Ms, i64>,
}

impl LedgerTxn {
    /// A transaction holding no locks; commits nothing to the ledger.
    pub fn empty() -> Self {
        Self {
            rows: BTreeMap::new(),
            staged: BTreeMap::new(),
        }
    }

    pub fn locked_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_locked(&self, range: &TimeRange) -> bool {
        range.hours().all(|start| self.rows.contains_key(&start))
    }

    /// Locked buckets overlapping `range`, ordered by slot start, with staged
    /// deltas applied.
    pub fn slots(&self, range: &TimeRange) -> Vec<HourSlot> {
        self.rows
            .range(range.start()..range.end())
            .map(|(start, row)| {
                let mut slot = row.cell.snapshot();
                slot.confirmed_applicants += self.staged.get(start).copied().unwrap_or(0);
                slot
            })
            .collect()
    }

    /// Bottleneck seats over the locked buckets of `range`, or `None` when
    /// none are locked.
    pub fn min_remaining(&self, range: &TimeRange) -> Option<i64> {
        self.slots(range).iter().map(HourSlot::remaining).min()
    }

    /// Stage `delta` on every bucket of `range`. All of them must be locked
    /// by this transaction.
    pub fn add_applicants_delta(&mut self, range: &TimeRange, delta: i64) -> Result<(), EngineError> {
        if !self.is_locked(range) {
            return Err(EngineError::Internal(format!(
                "ledger rows for range({range}) are not locked by this transaction"
            )));
        }
        for start in range.hours() {
            *self.staged.entry(start).or_insert(0) += delta;
        }
        Ok(())
    }

    /// Net non-zero adjustments, ordered by slot start.
    pub fn deltas(&self) -> Vec<SlotDelta> {
        self.staged
            .iter()
            .filter(|&(_, &delta)| delta != 0)
            .map(|(&slot_start, &delta)| SlotDelta { slot_start, delta })
            .collect()
    }

    /// Write staged deltas to the committed counters and release the locks.
    /// Only call once the matching journal record is durable.
    pub(crate) fn apply(self) {
        for (start, delta) in &self.staged {
            if *delta == 0 {
                continue;
            }
            if let Some(row) = self.rows.get(start) {
                row.cell.confirmed.fetch_add(*delta, Ordering::AcqRel);
            }
        }
        metrics::counter!(crate::observability::LEDGER_COMMITS_TOTAL).increment(1);
    }

    /// Journal the staged deltas on their own and apply them.
    pub async fn commit(self, journal: &Journal) -> Result<(), EngineError> {
        let deltas = self.deltas();
        if deltas.is_empty() {
            return Ok(());
        }
        journal
            .commit(&Event::SlotsAdjusted { deltas }, move || self.apply())
            .await
    }
}

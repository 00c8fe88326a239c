use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::schedule::Schedule;

/// Committed schedules plus one row lock per schedule id.
///
/// Readers clone committed rows without locking. A use case holds the row
/// lock from load to commit so two writers on one schedule serialize.
pub struct ScheduleStore {
    rows: DashMap<u64, Schedule>,
    row_locks: DashMap<u64, Arc<Mutex<()>>>,
    next_id: AtomicU64,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            row_locks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }

    pub fn find_by_id(&self, id: u64) -> Option<Schedule> {
        self.rows.get(&id).map(|e| e.value().clone())
    }

    /// Take the row lock, then read the committed row.
    pub async fn lock(&self, id: u64) -> Option<(OwnedMutexGuard<()>, Schedule)> {
        let lock = self.row_locks.get(&id).map(|e| e.value().clone())?;
        let guard = lock.lock_owned().await;
        let schedule = self.find_by_id(id)?;
        Some((guard, schedule))
    }

    /// Insert or replace the committed row. Callers journal first.
    pub fn upsert(&self, schedule: Schedule) {
        let id = schedule.id;
        self.next_id.fetch_max(id + 1, Ordering::AcqRel);
        self.row_locks.entry(id).or_default();
        self.rows.insert(id, schedule);
    }

    /// One page ordered by id, optionally restricted to one owner, plus the
    /// total number of matching rows.
    pub fn find_page(&self, owner: Option<Ulid>, offset: usize, limit: usize) -> (Vec<Schedule>, usize) {
        let mut matching: Vec<Schedule> = self
            .rows
            .iter()
            .filter(|e| owner.is_none_or(|o| e.value().owner_account_id == o))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by_key(|s| s.id);
        let total = matching.len();
        let items = matching.into_iter().skip(offset).take(limit).collect();
        (items, total)
    }

    pub fn snapshot(&self) -> Vec<Schedule> {
        self.find_page(None, 0, usize::MAX).0
    }
}

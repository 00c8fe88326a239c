use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;
use crate::schedule::{Schedule, ScheduleForm, ScheduleStatus};

use super::{AccountProvider, CapacityCoordinator, EngineError, Journal, LedgerTxn, ScheduleStore};

/// Page request over schedules, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleQuery {
    pub page_number: usize,
    pub page_size: usize,
    pub account_id: Option<Ulid>,
}

impl ScheduleQuery {
    pub fn new(page_number: usize, page_size: usize, account_id: Option<Ulid>) -> Result<Self, EngineError> {
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(EngineError::InvalidArgument(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self {
            page_number,
            page_size,
            account_id,
        })
    }

    pub fn offset(&self) -> usize {
        self.page_number.saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> usize {
        self.page_size
    }
}

/// Schedule use cases.
///
/// Each one takes the schedule row lock, then any ledger locks, and commits
/// the new row and its seat deltas as a single journal record. A failure at
/// any step drops the ledger transaction and nothing becomes visible.
pub struct ScheduleOrchestrator {
    accounts: Arc<dyn AccountProvider>,
    schedules: Arc<ScheduleStore>,
    coordinator: CapacityCoordinator,
    journal: Journal,
}

impl ScheduleOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountProvider>,
        schedules: Arc<ScheduleStore>,
        coordinator: CapacityCoordinator,
        journal: Journal,
    ) -> Self {
        Self {
            accounts,
            schedules,
            coordinator,
            journal,
        }
    }

    pub fn list(&self, query: &ScheduleQuery) -> SchedulePage {
        let (items, total) = self
            .schedules
            .find_page(query.account_id, query.offset(), query.limit());
        SchedulePage {
            total,
            page_size: query.page_size,
            page_number: query.page_number,
            items,
        }
    }

    pub fn get(&self, schedule_id: u64) -> Result<Schedule, EngineError> {
        self.schedules
            .find_by_id(schedule_id)
            .ok_or_else(|| not_found(schedule_id))
    }

    pub async fn create(&self, account_id: Ulid, form: ScheduleForm) -> Result<Schedule, EngineError> {
        let account = self.accounts.get_or_raise(account_id).await?;
        self.coordinator
            .validate_limit(&form.time_range(), form.applicants)
            .await?;
        let schedule = Schedule::pending(self.schedules.next_id(), &form, account.id, super::now_ms());
        let schedule = self.save(schedule, LedgerTxn::empty()).await?;
        info!(schedule_id = schedule.id, account_id = %account.id, range = %form.range, applicants = form.applicants, "schedule created");
        Ok(schedule)
    }

    pub async fn customer_update(
        &self,
        schedule_id: u64,
        form: ScheduleForm,
        account_id: Ulid,
    ) -> Result<Schedule, EngineError> {
        let (_row, mut schedule) = self.load_locked(schedule_id).await?;
        schedule.validate_owner(account_id)?;
        let txn = self.coordinator.reallocate(&schedule, &form).await?;
        schedule.update(&form)?;
        let schedule = self.save(schedule, txn).await?;
        info!(schedule_id, account_id = %account_id, "schedule updated by owner");
        Ok(schedule)
    }

    pub async fn admin_update(&self, schedule_id: u64, form: ScheduleForm) -> Result<Schedule, EngineError> {
        let (_row, mut schedule) = self.load_locked(schedule_id).await?;
        let txn = self.coordinator.reallocate(&schedule, &form).await?;
        schedule.update(&form)?;
        let schedule = self.save(schedule, txn).await?;
        info!(schedule_id, "schedule updated by admin");
        Ok(schedule)
    }

    pub async fn customer_cancel(&self, account_id: Ulid, schedule_id: u64) -> Result<Schedule, EngineError> {
        let (_row, mut schedule) = self.load_locked(schedule_id).await?;
        schedule.validate_customer_cancel(account_id)?;
        let transition = schedule.transition_to(ScheduleStatus::Canceled)?;
        let txn = self
            .coordinator
            .apply_status_change(&transition, &schedule.time_range(), schedule.applicants)
            .await?;
        schedule.apply(transition);
        let schedule = self.save(schedule, txn).await?;
        info!(schedule_id, account_id = %account_id, "schedule canceled by owner");
        Ok(schedule)
    }

    pub async fn admin_change_status(
        &self,
        schedule_id: u64,
        to_be: ScheduleStatus,
    ) -> Result<Schedule, EngineError> {
        let (_row, mut schedule) = self.load_locked(schedule_id).await?;
        let transition = schedule.transition_to(to_be)?;
        let txn = self
            .coordinator
            .apply_status_change(&transition, &schedule.time_range(), schedule.applicants)
            .await?;
        schedule.apply(transition);
        let schedule = self.save(schedule, txn).await?;
        metrics::counter!(crate::observability::STATUS_CHANGES_TOTAL, "to" => to_be.as_str()).increment(1);
        info!(schedule_id, from = %transition.as_is(), to = %to_be, "schedule status changed");
        Ok(schedule)
    }

    async fn load_locked(&self, schedule_id: u64) -> Result<(OwnedMutexGuard<()>, Schedule), EngineError> {
        self.schedules
            .lock(schedule_id)
            .await
            .ok_or_else(|| not_found(schedule_id))
    }

    /// Journal the row together with the transaction's seat deltas, then
    /// publish both.
    async fn save(&self, schedule: Schedule, txn: LedgerTxn) -> Result<Schedule, EngineError> {
        let event = Event::ScheduleCommitted {
            schedule: schedule.clone(),
            deltas: txn.deltas(),
        };
        let schedules = &self.schedules;
        self.journal
            .commit(&event, move || {
                txn.apply();
                schedules.upsert(schedule.clone());
                schedule
            })
            .await
    }
}

fn not_found(schedule_id: u64) -> EngineError {
    EngineError::NotFound(format!("schedule is not exists. schedule_id: '{schedule_id}'"))
}

use std::sync::Arc;

use tracing::debug;

use crate::limits::MAX_APPLICANTS;
use crate::model::*;
use crate::schedule::{Schedule, ScheduleForm, StatusTransition};

use super::{EngineError, LedgerTxn, SlotLedger};

/// Seat bookkeeping for schedule changes.
///
/// Methods that change seats return the open [`LedgerTxn`]; the caller
/// commits it together with the schedule row, or drops it to roll back.
#[derive(Clone)]
pub struct CapacityCoordinator {
    ledger: Arc<SlotLedger>,
}

impl CapacityCoordinator {
    pub fn new(ledger: Arc<SlotLedger>) -> Self {
        Self { ledger }
    }

    /// Advisory check against committed occupancy. Takes no lock and
    /// reserves nothing; only gates PENDING creation.
    pub async fn validate_limit(&self, range: &TimeRange, applicants: u32) -> Result<(), EngineError> {
        self.ledger.ensure_buckets(range).await?;
        let remaining = self.ledger.min_remaining_in_range(range);
        check_limit(remaining, range, applicants)
    }

    /// Move a schedule's seats to the form's range and applicant count.
    ///
    /// The target is checked under lock against committed occupancy before
    /// anything is staged, even for schedules that hold no seats. Only then
    /// does a confirmed schedule release its old seats and take the new ones.
    /// Unconfirmed schedules leave the ledger untouched.
    pub async fn reallocate(&self, as_is: &Schedule, to_be: &ScheduleForm) -> Result<LedgerTxn, EngineError> {
        let old = as_is.time_range();
        let new = to_be.time_range();
        let allocated = as_is.is_slot_allocated();

        let mut txn = if allocated {
            self.ledger.lock_and_fetch_range(&[old, new]).await?
        } else {
            self.ledger.lock_and_fetch_range(&[new]).await?
        };

        validate_locked(&txn, &new, to_be.applicants)?;
        if allocated {
            txn.add_applicants_delta(&old, -i64::from(as_is.applicants))?;
            txn.add_applicants_delta(&new, i64::from(to_be.applicants))?;
            debug!(
                schedule_id = as_is.id,
                from = %old,
                to = %new,
                released = as_is.applicants,
                occupied = to_be.applicants,
                "seats reallocated"
            );
        }
        Ok(txn)
    }

    /// Seat adjustment for a status change over `range`.
    /// Upgrades to CONFIRMED are checked under lock; downgrades can't overflow.
    pub async fn apply_status_change(
        &self,
        transition: &StatusTransition,
        range: &TimeRange,
        applicants: u32,
    ) -> Result<LedgerTxn, EngineError> {
        if transition.increases_applicants() {
            let mut txn = self.ledger.lock_and_fetch_range(&[*range]).await?;
            validate_locked(&txn, range, applicants)?;
            txn.add_applicants_delta(range, i64::from(applicants))?;
            Ok(txn)
        } else if transition.decreases_applicants() {
            let mut txn = self.ledger.lock_and_fetch_range(&[*range]).await?;
            txn.add_applicants_delta(range, -i64::from(applicants))?;
            Ok(txn)
        } else {
            Ok(LedgerTxn::empty())
        }
    }
}

fn validate_locked(txn: &LedgerTxn, range: &TimeRange, applicants: u32) -> Result<(), EngineError> {
    let remaining = txn.min_remaining(range).unwrap_or(i64::from(MAX_APPLICANTS));
    check_limit(remaining, range, applicants)
}

fn check_limit(remaining: i64, range: &TimeRange, applicants: u32) -> Result<(), EngineError> {
    if remaining < i64::from(applicants) {
        metrics::counter!(crate::observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
        return Err(EngineError::InvalidArgument(format!(
            "applicants must be less than or equal to the limit. limit({remaining}) < applicants({applicants}). range({range})"
        )));
    }
    Ok(())
}

//! Inbound request contracts.
//!
//! Each request checks only what a caller can get wrong without looking at
//! stored state. Checks that depend on the wall clock take `now` explicitly.

use serde::Deserialize;

use crate::engine::EngineError;
use crate::limits::{DAY_MS, HOUR_MS, MAX_SLOT_QUERY_DAYS, MIN_START_LEAD_DAYS};
use crate::model::{Ms, TimeRange, align_hour_up};
use crate::schedule::{ScheduleForm, ScheduleStatus};

/// UTC calendar day number of `t`.
fn day_of(t: Ms) -> Ms {
    t.div_euclid(DAY_MS)
}

fn check_start_lead(start_at: Ms, now: Ms) -> Result<(), EngineError> {
    if day_of(start_at) < day_of(now) + MIN_START_LEAD_DAYS {
        return Err(EngineError::InvalidArgument(format!(
            "schedule start_at must be at least {MIN_START_LEAD_DAYS} days from today"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub start_at: Ms,
    pub end_at: Ms,
    pub applicants: u32,
}

impl ScheduleRequest {
    pub fn into_form(self, now: Ms) -> Result<ScheduleForm, EngineError> {
        check_start_lead(self.start_at, now)?;
        ScheduleForm::new(self.name, self.start_at, self.end_at, self.applicants)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CustomerCancelRequest {
    pub status: ScheduleStatus,
}

impl CustomerCancelRequest {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.status != ScheduleStatus::Canceled {
            return Err(EngineError::InvalidArgument("change status must be CANCELED".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AdminStatusChangeRequest {
    pub status: ScheduleStatus,
}

impl AdminStatusChangeRequest {
    pub fn into_status(self) -> Result<ScheduleStatus, EngineError> {
        if self.status == ScheduleStatus::Pending {
            return Err(EngineError::InvalidArgument("change status must not be PENDING".into()));
        }
        Ok(self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SlotQueryRequest {
    pub start_at: Ms,
    pub end_at: Ms,
}

impl SlotQueryRequest {
    /// The hour buckets touching `[start_at, end_at)`.
    pub fn into_range(self, now: Ms) -> Result<TimeRange, EngineError> {
        check_start_lead(self.start_at, now)?;
        if self.end_at <= self.start_at {
            return Err(EngineError::InvalidArgument("start time must be before end time".into()));
        }
        if self.end_at - self.start_at > MAX_SLOT_QUERY_DAYS * DAY_MS {
            return Err(EngineError::InvalidArgument(format!(
                "the search period cannot exceed {MAX_SLOT_QUERY_DAYS} days"
            )));
        }
        let start = self.start_at - self.start_at.rem_euclid(HOUR_MS);
        let end = align_hour_up(self.end_at).ok_or_else(|| {
            EngineError::InvalidArgument(format!("end time {} is out of range", self.end_at))
        })?;
        Ok(TimeRange::trusted(start, end))
    }
}

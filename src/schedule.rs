//! Schedule entity and its status state machine.
//!
//! Everything here is pure: no store, no locks. The engine loads a schedule,
//! runs these checks and transitions on a copy, and commits the result.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::{MAX_APPLICANTS, MAX_NAME_LEN, MAX_SCHEDULE_SPAN_MS};
use crate::model::{Ms, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,
    Confirmed,
    Canceled,
}

impl ScheduleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Confirmed => "CONFIRMED",
            ScheduleStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated create/update input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleForm {
    pub name: String,
    pub range: TimeRange,
    pub applicants: u32,
}

impl ScheduleForm {
    pub fn new(name: String, start_at: Ms, end_at: Ms, applicants: u32) -> Result<Self, EngineError> {
        let range = TimeRange::new(start_at, end_at)?;
        if name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("schedule name must not be empty".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "schedule name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        if applicants > MAX_APPLICANTS {
            return Err(EngineError::InvalidArgument(format!(
                "applicants must be less than or equal to the limit. limit({MAX_APPLICANTS}) < applicants({applicants})"
            )));
        }
        if range.duration_ms() > MAX_SCHEDULE_SPAN_MS {
            return Err(EngineError::InvalidArgument("schedule range too wide".into()));
        }
        Ok(Self { name, range, applicants })
    }

    pub fn time_range(&self) -> TimeRange {
        self.range
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: u64,
    pub name: String,
    pub start_at: Ms,
    pub end_at: Ms,
    pub applicants: u32,
    pub status: ScheduleStatus,
    pub owner_account_id: Ulid,
    pub created_at: Ms,
}

impl Schedule {
    pub fn pending(id: u64, form: &ScheduleForm, owner_account_id: Ulid, created_at: Ms) -> Self {
        Self {
            id,
            name: form.name.clone(),
            start_at: form.range.start(),
            end_at: form.range.end(),
            applicants: form.applicants,
            status: ScheduleStatus::Pending,
            owner_account_id,
            created_at,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::trusted(self.start_at, self.end_at)
    }

    /// A schedule holds ledger seats only while confirmed.
    pub fn is_slot_allocated(&self) -> bool {
        self.status == ScheduleStatus::Confirmed
    }

    pub fn is_owner(&self, account_id: Ulid) -> bool {
        self.owner_account_id == account_id
    }

    pub fn validate_owner(&self, account_id: Ulid) -> Result<(), EngineError> {
        if !self.is_owner(account_id) {
            return Err(EngineError::AccessDenied(format!(
                "schedule changes only owner. you are not this schedule owner. schedule_id: '{}'",
                self.id
            )));
        }
        Ok(())
    }

    /// Customers may only withdraw a request that has not been confirmed yet.
    pub fn validate_customer_cancel(&self, requester_id: Ulid) -> Result<(), EngineError> {
        self.validate_owner(requester_id)?;
        if self.status != ScheduleStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "schedule can't change status '{}' to '{}'",
                self.status,
                ScheduleStatus::Canceled
            )));
        }
        Ok(())
    }

    pub fn update(&mut self, form: &ScheduleForm) -> Result<(), EngineError> {
        if self.status == ScheduleStatus::Canceled {
            return Err(EngineError::InvalidState(
                "can't update schedule while canceled".into(),
            ));
        }
        self.name = form.name.clone();
        self.start_at = form.range.start();
        self.end_at = form.range.end();
        self.applicants = form.applicants;
        Ok(())
    }

    pub fn transition_to(&self, to_be: ScheduleStatus) -> Result<StatusTransition, EngineError> {
        StatusTransition::new(self.status, to_be)
    }

    pub fn apply(&mut self, transition: StatusTransition) {
        debug_assert_eq!(self.status, transition.as_is());
        self.status = transition.to_be();
    }
}

/// A validated status change. Constructing one is the only legality check;
/// holding one means the change may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    as_is: ScheduleStatus,
    to_be: ScheduleStatus,
}

impl StatusTransition {
    pub fn new(as_is: ScheduleStatus, to_be: ScheduleStatus) -> Result<Self, EngineError> {
        if as_is == to_be {
            return Err(EngineError::InvalidArgument(format!(
                "as_is and to_be are the same. can't change to same status. status({as_is})"
            )));
        }
        if as_is == ScheduleStatus::Canceled {
            return Err(EngineError::InvalidState(format!(
                "schedule can't change status '{as_is}' to '{to_be}'"
            )));
        }
        if to_be == ScheduleStatus::Pending {
            return Err(EngineError::InvalidArgument(format!(
                "schedule can't change status '{as_is}' to '{to_be}'"
            )));
        }
        Ok(Self { as_is, to_be })
    }

    pub fn as_is(&self) -> ScheduleStatus {
        self.as_is
    }

    pub fn to_be(&self) -> ScheduleStatus {
        self.to_be
    }

    pub fn increases_applicants(&self) -> bool {
        self.as_is != ScheduleStatus::Confirmed && self.to_be == ScheduleStatus::Confirmed
    }

    pub fn decreases_applicants(&self) -> bool {
        self.as_is == ScheduleStatus::Confirmed && self.to_be != ScheduleStatus::Confirmed
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::iter::StepBy;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::{HOUR_MS, MAX_APPLICANTS};
use crate::schedule::Schedule;

/// Unix milliseconds, UTC.
pub type Ms = i64;

pub fn is_hour_aligned(t: Ms) -> bool {
    t.rem_euclid(HOUR_MS) == 0
}

/// Round up to the next hour boundary. Aligned instants are returned as-is;
/// `None` when the boundary is past `Ms::MAX`.
pub fn align_hour_up(t: Ms) -> Option<Ms> {
    match t.rem_euclid(HOUR_MS) {
        0 => Some(t),
        rem => t.checked_add(HOUR_MS - rem),
    }
}

/// Hour-aligned half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: Ms,
    end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if !is_hour_aligned(start) {
            return Err(EngineError::InvalidArgument(
                "start time must be set at the beginning of an hour".into(),
            ));
        }
        if !is_hour_aligned(end) {
            return Err(EngineError::InvalidArgument(
                "end time must be set at the beginning of an hour".into(),
            ));
        }
        if start >= end {
            return Err(EngineError::InvalidArgument(
                "start time must be before end time".into(),
            ));
        }
        if end.checked_sub(start).is_none() {
            return Err(EngineError::InvalidArgument("time range is too wide".into()));
        }
        Ok(Self { start, end })
    }

    /// For endpoints that were validated when they were stored.
    pub(crate) fn trusted(start: Ms, end: Ms) -> Self {
        debug_assert!(is_hour_aligned(start) && is_hour_aligned(end) && start < end);
        Self { start, end }
    }

    pub fn start(&self) -> Ms {
        self.start
    }

    pub fn end(&self) -> Ms {
        self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Bucket start instants covered by this range, ascending.
    pub fn hours(&self) -> StepBy<Range<Ms>> {
        (self.start..self.end).step_by(HOUR_MS as usize)
    }

    pub fn hour_count(&self) -> usize {
        (self.duration_ms() / HOUR_MS) as usize
    }

    /// Distinct bucket starts covered by any of `ranges`, ascending.
    pub fn union_hours(ranges: &[TimeRange]) -> BTreeSet<Ms> {
        ranges.iter().flat_map(TimeRange::hours).collect()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.start, self.end)
    }
}

/// One ledger row: the seat counters for a single hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourSlot {
    pub slot_start: Ms,
    pub max_applicants: i64,
    pub confirmed_applicants: i64,
}

impl HourSlot {
    pub fn new(slot_start: Ms) -> Self {
        Self {
            slot_start,
            max_applicants: i64::from(MAX_APPLICANTS),
            confirmed_applicants: 0,
        }
    }

    pub fn end_at(&self) -> Ms {
        self.slot_start + HOUR_MS
    }

    pub fn remaining(&self) -> i64 {
        self.max_applicants - self.confirmed_applicants
    }
}

/// Seat adjustment for one bucket, as recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDelta {
    pub slot_start: Ms,
    pub delta: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Ulid,
    pub nickname: String,
    pub role: Role,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Journal record format. Each use case commits exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AccountCreated {
        id: Ulid,
        nickname: String,
        role: Role,
    },
    SlotsCreated {
        starts: Vec<Ms>,
    },
    /// Full bucket state, written by compaction.
    SlotRestored {
        slot: HourSlot,
    },
    /// Seat adjustment not tied to a schedule write.
    SlotsAdjusted {
        deltas: Vec<SlotDelta>,
    },
    ScheduleCommitted {
        schedule: Schedule,
        deltas: Vec<SlotDelta>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulePage {
    pub total: usize,
    pub page_size: usize,
    pub page_number: usize,
    pub items: Vec<Schedule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPage {
    pub items: Vec<HourSlot>,
}

impl SlotPage {
    pub fn start_at(&self) -> Option<Ms> {
        self.items.first().map(|s| s.slot_start)
    }

    pub fn end_at(&self) -> Option<Ms> {
        self.items.last().map(HourSlot::end_at)
    }
}

//! Punch classification: direction and shift-start / shift-end flags.
//!
//! Classification has two halves. The pure half lives here: deriving the
//! event direction from the device role, resolving the shift day, and the
//! promotion rule deciding whether a punch takes the flag from the current
//! holder. The stateful half (looking up the currently flagged row and
//! demoting it) belongs to the ledger, which runs it inside the batch
//! transaction so check-promote-demote is serialized per key.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::device::DeviceRole;
use crate::shift::Shift;

/// Direction of a punch: arrival or departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Ledger/text representation (`IN` / `OUT`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    /// A device configured as an entry reader reports arrivals, an exit
    /// reader departures.
    pub fn from_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::Entry => Direction::In,
            DeviceRole::Exit => Direction::Out,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN" => Some(Direction::In),
            "OUT" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which boundary flag a punch competes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSide {
    /// First arrival of the shift day (`is_shift_start`).
    Start,
    /// Last departure of the shift day (`is_shift_end`).
    End,
}

impl FlagSide {
    /// Arrivals compete for the start flag, departures for the end flag.
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::In => FlagSide::Start,
            Direction::Out => FlagSide::End,
        }
    }

    /// Whether a new punch takes the flag from the current holder.
    ///
    /// Start side promotes on earlier-or-equal timestamps, end side on
    /// later-or-equal -- the end side is the exact time-reversed mirror.
    /// On a tie the punch processed later wins; the tie-break is
    /// documented, not fair.
    pub fn supersedes(self, new: NaiveDateTime, existing: NaiveDateTime) -> bool {
        match self {
            FlagSide::Start => new <= existing,
            FlagSide::End => new >= existing,
        }
    }
}

/// Pure classification of a punch, computed before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub direction: Direction,
    pub shift_day: NaiveDate,
    /// Whether this punch participates in flag promotion at all.
    /// Punches from users with no assigned shift never carry flags.
    pub flag_eligible: bool,
}

/// Classify a punch given the device role and the user's assigned shift.
pub fn classify(
    role: DeviceRole,
    timestamp: NaiveDateTime,
    shift: Option<&Shift>,
) -> Classification {
    let direction = Direction::from_role(role);
    match shift {
        Some(s) => Classification {
            direction,
            shift_day: s.shift_day(timestamp),
            flag_eligible: true,
        },
        None => Classification {
            direction,
            shift_day: timestamp.date(),
            flag_eligible: false,
        },
    }
}

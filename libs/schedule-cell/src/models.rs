// libs/schedule-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One open (or explicitly closed) interval of the clinic calendar.
///
/// Weekday rules are keyed by (year, month, day_of_week); a row with a
/// non-null `specific_date` is a date override and takes precedence over
/// the weekday rules for that date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicScheduleEntry {
    pub id: Uuid,
    pub year: i32,
    pub month: u32,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub specific_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An open interval of a single calendar day, as consumed by the slot
/// generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenInterval {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// A bookable time slot. Not persisted as its own row - regenerated on
/// demand from the schedule and serialized in its canonical "HH:MM-HH:MM"
/// form wherever the ledger stores a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, ScheduleError> {
        if start >= end {
            return Err(ScheduleError::InvalidTimeRange);
        }
        Ok(Self { start, end })
    }

    /// Two slots overlap when each starts before the other ends.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl FromStr for TimeSlot {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start_str, end_str) = s
            .split_once('-')
            .ok_or_else(|| ScheduleError::InvalidTimeSlot(s.to_string()))?;

        let start = NaiveTime::parse_from_str(start_str.trim(), "%H:%M")
            .map_err(|_| ScheduleError::InvalidTimeSlot(s.to_string()))?;
        let end = NaiveTime::parse_from_str(end_str.trim(), "%H:%M")
            .map_err(|_| ScheduleError::InvalidTimeSlot(s.to_string()))?;

        TimeSlot::new(start, end).map_err(|_| ScheduleError::InvalidTimeSlot(s.to_string()))
    }
}

impl Serialize for TimeSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleEntryRequest {
    pub year: i32,
    pub month: u32,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: Option<bool>,
    pub specific_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateScheduleEntryRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_available: Option<bool>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("Schedule entry not found")]
    NotFound,

    #[error("Start time must be before end time")]
    InvalidTimeRange,

    #[error("Day of week must be between 0 (Sunday) and 6 (Saturday), got {0}")]
    InvalidDayOfWeek(i32),

    #[error("Month must be between 1 and 12, got {0}")]
    InvalidMonth(u32),

    #[error("Treatment duration must be a positive number of minutes, got {0}")]
    InvalidDuration(i64),

    #[error("Invalid time slot: {0}")]
    InvalidTimeSlot(String),

    #[error("Interval overlaps an existing schedule entry")]
    OverlappingInterval,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

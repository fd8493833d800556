// libs/schedule-cell/src/services/slots.rs
use chrono::{Duration, NaiveDate};
use tracing::debug;

use shared_config::AppConfig;

use crate::models::{OpenInterval, ScheduleError, TimeSlot};
use crate::services::schedule::ClinicScheduleService;

/// Base slot length; requested treatment durations are rounded up to this
/// grid.
pub const SLOT_INCREMENT_MINUTES: i64 = 30;

pub fn round_up_to_increment(minutes: i64) -> i64 {
    ((minutes + SLOT_INCREMENT_MINUTES - 1) / SLOT_INCREMENT_MINUTES) * SLOT_INCREMENT_MINUTES
}

/// Slice open intervals into bookable slots.
///
/// Each slot fits entirely inside one interval - slots never span the gap
/// between sessions (e.g. the lunch break). Output is chronological and
/// deduplicated. An interval shorter than the slot length contributes
/// nothing; an empty interval list yields an empty result.
pub fn slice_into_slots(
    intervals: &[OpenInterval],
    treatment_duration_minutes: Option<i64>,
) -> Result<Vec<TimeSlot>, ScheduleError> {
    let slot_minutes = match treatment_duration_minutes {
        Some(minutes) if minutes <= 0 => return Err(ScheduleError::InvalidDuration(minutes)),
        Some(minutes) => round_up_to_increment(minutes),
        None => SLOT_INCREMENT_MINUTES,
    };
    let slot_length = Duration::minutes(slot_minutes);

    let mut slots = Vec::new();

    for interval in intervals {
        let mut cursor = interval.start_time;
        loop {
            let (slot_end, wrapped) = cursor.overflowing_add_signed(slot_length);
            if wrapped != 0 || slot_end > interval.end_time {
                break;
            }
            slots.push(TimeSlot {
                start: cursor,
                end: slot_end,
            });
            cursor = slot_end;
        }
    }

    slots.sort();
    slots.dedup();

    Ok(slots)
}

/// Derives the ordered set of bookable slots for a calendar date from the
/// clinic schedule.
pub struct SlotGenerator {
    schedule_service: ClinicScheduleService,
}

impl SlotGenerator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            schedule_service: ClinicScheduleService::new(config),
        }
    }

    pub async fn slots_for_date(
        &self,
        date: NaiveDate,
        treatment_duration_minutes: Option<i64>,
        auth_token: Option<&str>,
    ) -> Result<Vec<TimeSlot>, ScheduleError> {
        let intervals = self
            .schedule_service
            .open_intervals_for_date(date, auth_token)
            .await?;

        if intervals.is_empty() {
            debug!("No open intervals for {}", date);
            return Ok(vec![]);
        }

        let slots = slice_into_slots(&intervals, treatment_duration_minutes)?;
        debug!("Generated {} slots for {}", slots.len(), date);
        Ok(slots)
    }
}

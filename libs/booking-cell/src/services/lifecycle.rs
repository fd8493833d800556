// libs/booking-cell/src/services/lifecycle.rs
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::{AppointmentStatus, BookingError};

/// Cancellations this close to the confirmed date are flagged for a
/// phone-contact follow-up instead of a routine email.
pub const PHONE_CONTACT_THRESHOLD_DAYS: i64 = 3;

/// The appointment state machine. `cancelled` is terminal; the only way
/// back from `confirmed` is the modify flow's controlled regression to
/// `pending`.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), BookingError> {
        debug!(
            "Validating status transition from {} to {}",
            current_status, new_status
        );

        if !self.valid_transitions(current_status).contains(&new_status) {
            warn!(
                "Invalid status transition attempted: {} -> {}",
                current_status, new_status
            );
            return Err(BookingError::InvalidStatusTransition(current_status));
        }

        Ok(())
    }

    pub fn valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                // Modify regresses a confirmed appointment to pending.
                AppointmentStatus::Pending,
                AppointmentStatus::Cancelled,
            ],
            // Terminal state - no transitions allowed
            AppointmentStatus::Cancelled => vec![],
        }
    }

    /// A modify re-submission is allowed from pending (new preferences) and
    /// from confirmed (regression to pending), never from cancelled.
    pub fn validate_modifiable(&self, current_status: AppointmentStatus) -> Result<(), BookingError> {
        match current_status {
            AppointmentStatus::Cancelled => {
                warn!("Modify attempted on a cancelled appointment");
                Err(BookingError::InvalidStatusTransition(current_status))
            }
            _ => Ok(()),
        }
    }

    /// Advisory only: surfaced to the administrator, never a blocking rule.
    pub fn needs_phone_contact(
        &self,
        confirmed_date: Option<NaiveDate>,
        cancelled_on: NaiveDate,
    ) -> bool {
        match confirmed_date {
            Some(date) => {
                let days_until = (date - cancelled_on).num_days();
                (0..=PHONE_CONTACT_THRESHOLD_DAYS).contains(&days_until)
            }
            None => false,
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn pending_confirms_and_cancels() {
        let service = AppointmentLifecycleService::new();
        assert!(service
            .validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Confirmed)
            .is_ok());
        assert!(service
            .validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Cancelled)
            .is_ok());
    }

    #[test]
    fn confirmed_regresses_to_pending_or_cancels() {
        let service = AppointmentLifecycleService::new();
        assert!(service
            .validate_status_transition(AppointmentStatus::Confirmed, AppointmentStatus::Pending)
            .is_ok());
        assert!(service
            .validate_status_transition(AppointmentStatus::Confirmed, AppointmentStatus::Cancelled)
            .is_ok());
        assert_matches!(
            service.validate_status_transition(
                AppointmentStatus::Confirmed,
                AppointmentStatus::Confirmed
            ),
            Err(BookingError::InvalidStatusTransition(AppointmentStatus::Confirmed))
        );
    }

    #[test]
    fn cancelled_is_terminal() {
        let service = AppointmentLifecycleService::new();
        assert!(service.valid_transitions(AppointmentStatus::Cancelled).is_empty());
        for target in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
        ] {
            assert_matches!(
                service.validate_status_transition(AppointmentStatus::Cancelled, target),
                Err(BookingError::InvalidStatusTransition(AppointmentStatus::Cancelled))
            );
        }
    }

    #[test]
    fn cancelled_appointments_cannot_be_modified() {
        let service = AppointmentLifecycleService::new();
        assert!(service.validate_modifiable(AppointmentStatus::Pending).is_ok());
        assert!(service.validate_modifiable(AppointmentStatus::Confirmed).is_ok());
        assert!(service.validate_modifiable(AppointmentStatus::Cancelled).is_err());
    }

    #[test]
    fn late_cancellation_flags_phone_contact() {
        let service = AppointmentLifecycleService::new();
        let confirmed = Some(date(2025, 3, 10));

        assert!(service.needs_phone_contact(confirmed, date(2025, 3, 10)));
        assert!(service.needs_phone_contact(confirmed, date(2025, 3, 7)));
        assert!(!service.needs_phone_contact(confirmed, date(2025, 3, 6)));
    }

    #[test]
    fn cancellation_after_the_date_is_not_flagged() {
        let service = AppointmentLifecycleService::new();
        assert!(!service.needs_phone_contact(Some(date(2025, 3, 10)), date(2025, 3, 11)));
    }

    #[test]
    fn unconfirmed_cancellation_is_never_flagged() {
        let service = AppointmentLifecycleService::new();
        assert!(!service.needs_phone_contact(None, date(2025, 3, 10)));
    }
}

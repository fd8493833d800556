// libs/booking-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use schedule_cell::models::TimeSlot;

// ==============================================================================
// CORE LEDGER MODELS
// ==============================================================================

/// One row of the booking ledger. While pending the appointment carries
/// ranked preferences; once confirmed it holds exactly one (date, slot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_name: String,
    pub phone: String,
    pub email: String,
    pub age: Option<i32>,
    pub notes: Option<String>,
    pub treatment_name: String,
    pub fee: Option<String>,
    pub status: AppointmentStatus,
    /// The first preference's date, kept as a display fallback while
    /// pending.
    pub appointment_date: NaiveDate,
    pub confirmed_date: Option<NaiveDate>,
    pub confirmed_time_slot: Option<TimeSlot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_confirmed_into(&self, date: NaiveDate, slot: &TimeSlot) -> bool {
        self.status == AppointmentStatus::Confirmed
            && self.confirmed_date == Some(date)
            && self
                .confirmed_time_slot
                .as_ref()
                .map(|held| held.overlaps(slot))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A ranked candidate (date, slot) owned by a pending appointment.
/// Replaced wholesale whenever the appointment is re-submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentPreference {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub preference_order: i32,
    pub preferred_date: NaiveDate,
    pub preferred_time_slot: TimeSlot,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceInput {
    pub preferred_date: NaiveDate,
    pub preferred_time_slot: TimeSlot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_name: String,
    pub phone: String,
    pub email: String,
    pub age: Option<i32>,
    pub notes: Option<String>,
    pub treatment_name: String,
    pub fee: Option<String>,
    pub preferences: Vec<PreferenceInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmAppointmentRequest {
    pub confirmed_date: NaiveDate,
    pub confirmed_time_slot: TimeSlot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyAppointmentRequest {
    pub preferences: Vec<PreferenceInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
    pub cancelled_by: CancelledBy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Admin,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelledBy::Patient => write!(f, "patient"),
            CancelledBy::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub status: Option<AppointmentStatus>,
    pub email: Option<String>,
    pub treatment_name: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// EVALUATOR RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityCheckResponse {
    pub can_reserve: bool,
    pub current_count: i32,
    pub max_capacity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub can_confirm: bool,
}

/// One slot of the patient-facing availability view. Advisory only - the
/// authoritative capacity check happens again at confirm time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub time_slot: TimeSlot,
    pub is_available: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Slot capacity exceeded: {current_count}/{max_capacity} bookings")]
    CapacityExceeded { current_count: i32, max_capacity: i32 },

    #[error("Patient already holds a confirmed booking in this slot")]
    PatientConflict,

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Slot is being confirmed by another request, try again")]
    SlotLockUnavailable,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

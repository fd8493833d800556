// libs/notification-cell/src/models.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle events the booking flow reports to the email/SMS dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    BookingRequested,
    BookingConfirmed,
    ModificationRequested,
    CancellationRequested,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::BookingRequested => write!(f, "booking_requested"),
            NotificationEvent::BookingConfirmed => write!(f, "booking_confirmed"),
            NotificationEvent::ModificationRequested => write!(f, "modification_requested"),
            NotificationEvent::CancellationRequested => write!(f, "cancellation_requested"),
        }
    }
}

/// A ranked (date, slot) pair from the patient's request, rendered in the
/// slot's canonical "HH:MM-HH:MM" form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferredSlot {
    pub preference_order: i32,
    pub preferred_date: NaiveDate,
    pub preferred_time_slot: String,
}

/// Everything the dispatcher needs to render the patient and admin
/// messages. Transport, templating and provider choice live on the other
/// side of the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub appointment_id: Uuid,
    pub patient_name: String,
    pub email: String,
    pub phone: String,
    pub treatment_name: String,
    pub fee: Option<String>,
    pub confirmed_date: Option<NaiveDate>,
    pub confirmed_time_slot: Option<String>,
    pub preferences: Vec<PreferredSlot>,
    pub needs_phone_contact: bool,
    pub cancelled_by: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification sink is not configured")]
    NotConfigured,

    #[error("Notification dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

// libs/booking-cell/src/services/booking.rs
use chrono::{NaiveDate, Utc};
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use notification_cell::models::{NotificationEvent, NotificationPayload, PreferredSlot};
use notification_cell::services::dispatch::NotificationService;
use schedule_cell::models::{ScheduleError, TimeSlot};
use schedule_cell::services::slots::SlotGenerator;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentPreference, AppointmentSearchQuery, AppointmentStatus, BookingError,
    CancelAppointmentRequest, ConfirmAppointmentRequest, CreateAppointmentRequest,
    ModifyAppointmentRequest, PreferenceInput, SlotAvailability,
};
use crate::services::capacity::CapacityService;
use crate::services::conflict::ConflictService;
use crate::services::consistency::SlotLockService;
use crate::services::lifecycle::AppointmentLifecycleService;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
const PHONE_PATTERN: &str = r"^\+?[0-9][0-9\-]{8,14}$";

fn is_valid_email(email: &str) -> bool {
    Regex::new(EMAIL_PATTERN)
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

fn is_valid_phone(phone: &str) -> bool {
    Regex::new(PHONE_PATTERN)
        .map(|re| re.is_match(phone))
        .unwrap_or(false)
}

/// Orchestrates the pending -> confirmed -> cancelled lifecycle, running
/// the capacity and conflict evaluators at the authoritative points and
/// reporting each transition to the notification sink.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    capacity_service: CapacityService,
    conflict_service: ConflictService,
    lifecycle_service: AppointmentLifecycleService,
    lock_service: SlotLockService,
    slot_generator: SlotGenerator,
    notification_service: NotificationService,
    max_confirm_attempts: u32,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            capacity_service: CapacityService::new(Arc::clone(&supabase)),
            conflict_service: ConflictService::new(Arc::clone(&supabase)),
            lifecycle_service: AppointmentLifecycleService::new(),
            lock_service: SlotLockService::new(Arc::clone(&supabase)),
            slot_generator: SlotGenerator::new(config),
            notification_service: NotificationService::new(config),
            supabase,
            max_confirm_attempts: 3,
        }
    }

    /// Patient-facing availability view for one date. Advisory: a slot may
    /// fill between rendering and submission, and a failed capacity lookup
    /// marks the slot unavailable rather than offering it blind.
    pub async fn slot_availability(
        &self,
        date: NaiveDate,
        treatment_name: &str,
        treatment_duration_minutes: Option<i64>,
        auth_token: Option<&str>,
    ) -> Result<Vec<SlotAvailability>, BookingError> {
        let slots = self
            .slot_generator
            .slots_for_date(date, treatment_duration_minutes, auth_token)
            .await
            .map_err(map_schedule_error)?;

        let mut availability = Vec::with_capacity(slots.len());

        for slot in slots {
            let is_available = match self
                .capacity_service
                .check_capacity(treatment_name, date, &slot, None, auth_token)
                .await
            {
                Ok(check) => check.can_reserve,
                Err(e) => {
                    warn!(
                        "Capacity lookup failed for {} on {} at {}, marking unavailable: {}",
                        treatment_name, date, slot, e
                    );
                    false
                }
            };

            availability.push(SlotAvailability {
                time_slot: slot,
                is_available,
            });
        }

        Ok(availability)
    }

    /// Create a pending appointment from the patient's ranked preferences.
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
        auth_token: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        info!(
            "Creating appointment request for {} ({} preferences)",
            request.treatment_name,
            request.preferences.len()
        );

        self.validate_create_request(&request)?;

        // Advisory pass over the requested slots. Contention is resolved by
        // the administrator at confirm time, so a full slot only gets
        // logged here - the request is still accepted as pending.
        for preference in &request.preferences {
            match self
                .capacity_service
                .check_capacity(
                    &request.treatment_name,
                    preference.preferred_date,
                    &preference.preferred_time_slot,
                    None,
                    auth_token,
                )
                .await
            {
                Ok(check) if !check.can_reserve => {
                    warn!(
                        "Preference {} {} for {} is already full ({}/{})",
                        preference.preferred_date,
                        preference.preferred_time_slot,
                        request.treatment_name,
                        check.current_count,
                        check.max_capacity
                    );
                }
                Err(e) => warn!("Advisory capacity check failed: {}", e),
                _ => {}
            }
        }

        let appointment_id = Uuid::new_v4();
        let first_preference_date = request.preferences[0].preferred_date;

        let appointment_data = json!({
            "id": appointment_id,
            "patient_name": request.patient_name,
            "phone": request.phone,
            "email": request.email,
            "age": request.age,
            "notes": request.notes,
            "treatment_name": request.treatment_name,
            "fee": request.fee,
            "status": AppointmentStatus::Pending,
            "appointment_date": first_preference_date,
            "confirmed_date": null,
            "confirmed_time_slot": null,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .write_rows(Method::POST, "/rest/v1/appointments", auth_token, appointment_data)
            .await?;

        let appointment: Appointment = parse_single_row(result)?;

        if let Err(e) = self
            .insert_preferences(appointment_id, &request.preferences, auth_token)
            .await
        {
            // Roll the half-created request back so a pending appointment
            // without preferences can never exist.
            warn!(
                "Preference insert failed for {}, removing appointment: {}",
                appointment_id, e
            );
            if let Err(cleanup) = self.delete_appointment_row(appointment_id, auth_token).await {
                warn!("Cleanup of appointment {} failed: {}", appointment_id, cleanup);
            }
            return Err(e);
        }

        self.notification_service.notify_detached(
            NotificationEvent::BookingRequested,
            self.payload_for(&appointment, preferences_to_payload(&request.preferences), false, None, None),
        );

        info!("Appointment {} created as pending", appointment.id);
        Ok(appointment)
    }

    /// Administrator confirm into one specific (date, slot).
    ///
    /// The capacity and conflict evaluators run again here, under a slot
    /// lock and immediately before a status-guarded write, so the check and
    /// the commit see the same ledger instant.
    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        request: ConfirmAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        info!(
            "Confirming appointment {} into {} {}",
            appointment_id, request.confirmed_date, request.confirmed_time_slot
        );

        let appointment = self.get_appointment(appointment_id, Some(auth_token)).await?;
        self.lifecycle_service
            .validate_status_transition(appointment.status, AppointmentStatus::Confirmed)?;

        let lock_key = SlotLockService::lock_key(
            &appointment.treatment_name,
            request.confirmed_date,
            &request.confirmed_time_slot,
        );

        for attempt in 1..=self.max_confirm_attempts {
            if !self.lock_service.acquire(&lock_key).await? {
                if attempt < self.max_confirm_attempts {
                    debug!(
                        "Slot lock contention on {}, retry {}/{}",
                        lock_key, attempt, self.max_confirm_attempts
                    );
                    sleep(Duration::from_millis(100 * attempt as u64)).await;
                    continue;
                }
                return Err(BookingError::SlotLockUnavailable);
            }

            let outcome = self
                .confirm_under_lock(&appointment, &request, auth_token)
                .await;

            if let Err(e) = self.lock_service.release(&lock_key).await {
                warn!("Failed to release slot lock {}: {}", lock_key, e);
            }

            let confirmed = outcome?;

            self.notification_service.notify_detached(
                NotificationEvent::BookingConfirmed,
                self.payload_for(&confirmed, vec![], false, None, None),
            );

            info!("Appointment {} confirmed", confirmed.id);
            return Ok(confirmed);
        }

        Err(BookingError::SlotLockUnavailable)
    }

    /// Re-submission of preferences: a controlled regression to pending,
    /// not a new entity. Capacity and conflict checks wait for the next
    /// confirm.
    pub async fn modify_appointment(
        &self,
        appointment_id: Uuid,
        request: ModifyAppointmentRequest,
        auth_token: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        info!("Modifying appointment {}", appointment_id);

        if request.preferences.is_empty() {
            return Err(BookingError::ValidationError(
                "At least one preferred slot is required".to_string(),
            ));
        }

        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle_service.validate_modifiable(appointment.status)?;

        // One write regresses the row: status and both confirmed fields
        // change together, so the ledger never shows a half-cleared state.
        let first_preference_date = request.preferences[0].preferred_date;
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=neq.cancelled",
            appointment_id
        );
        let update_data = json!({
            "status": AppointmentStatus::Pending,
            "confirmed_date": null,
            "confirmed_time_slot": null,
            "appointment_date": first_preference_date,
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .write_rows(Method::PATCH, &path, auth_token, update_data)
            .await?;

        if result.is_empty() {
            // Cancelled underneath us between the fetch and the write.
            let current = self.get_appointment(appointment_id, auth_token).await?;
            return Err(BookingError::InvalidStatusTransition(current.status));
        }

        let updated: Appointment = parse_single_row(result)?;

        self.delete_preferences(appointment_id, auth_token).await?;
        self.insert_preferences(appointment_id, &request.preferences, auth_token)
            .await?;

        self.notification_service.notify_detached(
            NotificationEvent::ModificationRequested,
            self.payload_for(&updated, preferences_to_payload(&request.preferences), false, None, None),
        );

        info!("Appointment {} reset to pending with new preferences", updated.id);
        Ok(updated)
    }

    /// Terminal cancellation. Confirmed fields and preference rows stay in
    /// place as the audit record; the returned flag asks the administrator
    /// to follow up by phone when the slot was close.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: Option<&str>,
    ) -> Result<(Appointment, bool), BookingError> {
        info!("Cancelling appointment {} by {}", appointment_id, request.cancelled_by);

        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle_service
            .validate_status_transition(appointment.status, AppointmentStatus::Cancelled)?;

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=neq.cancelled",
            appointment_id
        );
        let update_data = json!({
            "status": AppointmentStatus::Cancelled,
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .write_rows(Method::PATCH, &path, auth_token, update_data)
            .await?;

        if result.is_empty() {
            return Err(BookingError::InvalidStatusTransition(AppointmentStatus::Cancelled));
        }

        let cancelled: Appointment = parse_single_row(result)?;

        let needs_phone_contact = self
            .lifecycle_service
            .needs_phone_contact(cancelled.confirmed_date, Utc::now().date_naive());

        if needs_phone_contact {
            info!(
                "Appointment {} cancelled within {} days of its slot - flagging for phone contact",
                cancelled.id,
                crate::services::lifecycle::PHONE_CONTACT_THRESHOLD_DAYS
            );
        }

        self.notification_service.notify_detached(
            NotificationEvent::CancellationRequested,
            self.payload_for(
                &cancelled,
                vec![],
                needs_phone_contact,
                Some(request.cancelled_by.to_string()),
                request.reason.clone(),
            ),
        );

        Ok((cancelled, needs_phone_contact))
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(BookingError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn get_preferences(
        &self,
        appointment_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<AppointmentPreference>, BookingError> {
        let path = format!(
            "/rest/v1/appointment_preferences?appointment_id=eq.{}&order=preference_order.asc",
            appointment_id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentPreference>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse preferences: {}", e)))
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        debug!("Searching appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(email) = &query.email {
            query_parts.push(format!("email=eq.{}", urlencoding::encode(email)));
        }
        if let Some(treatment_name) = &query.treatment_name {
            query_parts.push(format!(
                "treatment_name=eq.{}",
                urlencoding::encode(treatment_name)
            ));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("appointment_date=gte.{}", from_date));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("appointment_date=lte.{}", to_date));
        }

        query_parts.push("order=created_at.desc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0)));

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    pub fn capacity_service(&self) -> &CapacityService {
        &self.capacity_service
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn confirm_under_lock(
        &self,
        appointment: &Appointment,
        request: &ConfirmAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let capacity = self
            .capacity_service
            .check_capacity(
                &appointment.treatment_name,
                request.confirmed_date,
                &request.confirmed_time_slot,
                Some(appointment.id),
                Some(auth_token),
            )
            .await?;

        if !capacity.can_reserve {
            return Err(BookingError::CapacityExceeded {
                current_count: capacity.current_count,
                max_capacity: capacity.max_capacity,
            });
        }

        let conflict = self
            .conflict_service
            .check_confirmed_conflict(
                &appointment.email,
                request.confirmed_date,
                &request.confirmed_time_slot,
                Some(appointment.id),
                Some(auth_token),
            )
            .await?;

        if !conflict.can_confirm {
            return Err(BookingError::PatientConflict);
        }

        // Status-guarded write: only a still-pending row takes the update,
        // so a concurrent confirm/cancel surfaces as an empty result
        // instead of a second commit.
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.pending",
            appointment.id
        );
        let update_data = json!({
            "status": AppointmentStatus::Confirmed,
            "confirmed_date": request.confirmed_date,
            "confirmed_time_slot": request.confirmed_time_slot,
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .write_rows(Method::PATCH, &path, Some(auth_token), update_data)
            .await?;

        if result.is_empty() {
            let current = self.get_appointment(appointment.id, Some(auth_token)).await?;
            warn!(
                "Appointment {} left pending concurrently (now {})",
                appointment.id, current.status
            );
            return Err(BookingError::InvalidStatusTransition(current.status));
        }

        parse_single_row(result)
    }

    fn validate_create_request(&self, request: &CreateAppointmentRequest) -> Result<(), BookingError> {
        if request.patient_name.trim().is_empty() {
            return Err(BookingError::ValidationError(
                "Patient name is required".to_string(),
            ));
        }
        if request.treatment_name.trim().is_empty() {
            return Err(BookingError::ValidationError(
                "Treatment name is required".to_string(),
            ));
        }
        if !is_valid_email(&request.email) {
            return Err(BookingError::ValidationError(format!(
                "Invalid email address: {}",
                request.email
            )));
        }
        if !is_valid_phone(&request.phone) {
            return Err(BookingError::ValidationError(format!(
                "Invalid phone number: {}",
                request.phone
            )));
        }
        if let Some(age) = request.age {
            if !(0..=130).contains(&age) {
                return Err(BookingError::ValidationError(format!("Invalid age: {}", age)));
            }
        }
        if request.preferences.is_empty() {
            return Err(BookingError::ValidationError(
                "At least one preferred slot is required".to_string(),
            ));
        }

        Ok(())
    }

    async fn insert_preferences(
        &self,
        appointment_id: Uuid,
        preferences: &[PreferenceInput],
        auth_token: Option<&str>,
    ) -> Result<(), BookingError> {
        let rows: Vec<Value> = preferences
            .iter()
            .enumerate()
            .map(|(index, preference)| {
                json!({
                    "appointment_id": appointment_id,
                    "preference_order": index as i32 + 1,
                    "preferred_date": preference.preferred_date,
                    "preferred_time_slot": preference.preferred_time_slot,
                })
            })
            .collect();

        let _: Vec<Value> = self
            .write_rows(
                Method::POST,
                "/rest/v1/appointment_preferences",
                auth_token,
                Value::Array(rows),
            )
            .await?;

        Ok(())
    }

    async fn delete_preferences(
        &self,
        appointment_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<(), BookingError> {
        let path = format!(
            "/rest/v1/appointment_preferences?appointment_id=eq.{}",
            appointment_id
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, auth_token, None, Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn delete_appointment_row(
        &self,
        appointment_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<(), BookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, auth_token, None, Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn write_rows(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Value,
    ) -> Result<Vec<Value>, BookingError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        self.supabase
            .request_with_headers(method, path, auth_token, Some(body), Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))
    }

    fn payload_for(
        &self,
        appointment: &Appointment,
        preferences: Vec<PreferredSlot>,
        needs_phone_contact: bool,
        cancelled_by: Option<String>,
        reason: Option<String>,
    ) -> NotificationPayload {
        NotificationPayload {
            appointment_id: appointment.id,
            patient_name: appointment.patient_name.clone(),
            email: appointment.email.clone(),
            phone: appointment.phone.clone(),
            treatment_name: appointment.treatment_name.clone(),
            fee: appointment.fee.clone(),
            confirmed_date: appointment.confirmed_date,
            confirmed_time_slot: appointment
                .confirmed_time_slot
                .as_ref()
                .map(TimeSlot::to_string),
            preferences,
            needs_phone_contact,
            cancelled_by,
            reason,
        }
    }
}

fn preferences_to_payload(preferences: &[PreferenceInput]) -> Vec<PreferredSlot> {
    preferences
        .iter()
        .enumerate()
        .map(|(index, preference)| PreferredSlot {
            preference_order: index as i32 + 1,
            preferred_date: preference.preferred_date,
            preferred_time_slot: preference.preferred_time_slot.to_string(),
        })
        .collect()
}

fn parse_single_row(rows: Vec<Value>) -> Result<Appointment, BookingError> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| BookingError::DatabaseError("Write returned no rows".to_string()))?;

    serde_json::from_value(row)
        .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
}

fn map_schedule_error(e: ScheduleError) -> BookingError {
    match e {
        ScheduleError::InvalidDuration(_) | ScheduleError::InvalidTimeSlot(_) => {
            BookingError::ValidationError(e.to_string())
        }
        other => BookingError::DatabaseError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_accepts_normal_addresses() {
        assert!(is_valid_email("taro@example.com"));
        assert!(is_valid_email("hanako+dental@clinic.co.jp"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("missing@tld"));
    }

    #[test]
    fn phone_validation_accepts_domestic_formats() {
        assert!(is_valid_phone("090-1234-5678"));
        assert!(is_valid_phone("0312345678"));
        assert!(is_valid_phone("+81901234567"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("phone-number"));
    }
}

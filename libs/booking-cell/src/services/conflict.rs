// libs/booking-cell/src/services/conflict.rs
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use schedule_cell::models::TimeSlot;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, BookingError, ConflictCheckResponse};

/// Guards the per-patient invariant: one email never holds two confirmed
/// bookings overlapping in time, even when the treatment's capacity would
/// allow both.
pub struct ConflictService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn check_confirmed_conflict(
        &self,
        email: &str,
        date: NaiveDate,
        time_slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: Option<&str>,
    ) -> Result<ConflictCheckResponse, BookingError> {
        debug!("Checking confirmed conflicts for {} on {}", email, date);

        let mut query_parts = vec![
            format!("email=eq.{}", urlencoding::encode(email)),
            "status=eq.confirmed".to_string(),
            format!("confirmed_date=eq.{}", date),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        // Overlap, not equality: a 60-minute confirmation can collide with
        // a 30-minute one on the same afternoon.
        let has_conflict = appointments
            .iter()
            .any(|appointment| appointment.is_confirmed_into(date, time_slot));

        if has_conflict {
            warn!(
                "Patient {} already holds a confirmed booking overlapping {} on {}",
                email, time_slot, date
            );
        }

        Ok(ConflictCheckResponse {
            can_confirm: !has_conflict,
        })
    }
}

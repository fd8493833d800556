// libs/booking-cell/src/services/capacity.rs
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use schedule_cell::models::TimeSlot;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, BookingError, CapacityCheckResponse};
use crate::services::policy::{CapacityPolicyRow, TreatmentCapacityPolicy};

/// Counts distinct appointments occupying a slot. Confirmed matches and
/// pending preference matches are merged here so a pending appointment
/// naming the same slot at two ranks is still one occupant, and the
/// appointment being edited never blocks itself.
pub fn occupancy_count(
    confirmed: &[Appointment],
    pending: &[Appointment],
    exclude_appointment_id: Option<Uuid>,
) -> usize {
    let mut occupants: HashSet<Uuid> = HashSet::new();

    for appointment in confirmed.iter().chain(pending.iter()) {
        if Some(appointment.id) == exclude_appointment_id {
            continue;
        }
        occupants.insert(appointment.id);
    }

    occupants.len()
}

pub struct CapacityService {
    supabase: Arc<SupabaseClient>,
}

impl CapacityService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Current demand for (treatment, date, slot) against the policy limit.
    ///
    /// This runs twice per booking: advisory while rendering availability
    /// (callers treat an error as "not available") and authoritative right
    /// before a confirm commits (callers abort on error). Either way a
    /// failed lookup never turns into a silent overbooking.
    pub async fn check_capacity(
        &self,
        treatment_name: &str,
        date: NaiveDate,
        time_slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: Option<&str>,
    ) -> Result<CapacityCheckResponse, BookingError> {
        debug!(
            "Checking capacity for {} on {} at {}",
            treatment_name, date, time_slot
        );

        let policy = self.load_policy(auth_token).await;
        let max_capacity = policy.capacity_for(treatment_name);

        let confirmed = self
            .confirmed_occupants(treatment_name, date, time_slot, exclude_appointment_id, auth_token)
            .await?;
        let pending = self
            .pending_occupants(treatment_name, date, time_slot, exclude_appointment_id, auth_token)
            .await?;

        let current_count = occupancy_count(&confirmed, &pending, exclude_appointment_id) as i32;
        let can_reserve = current_count < max_capacity;

        if !can_reserve {
            debug!(
                "Slot {} on {} full for {}: {}/{}",
                time_slot, date, treatment_name, current_count, max_capacity
            );
        }

        Ok(CapacityCheckResponse {
            can_reserve,
            current_count,
            max_capacity,
        })
    }

    /// The policy table is administrator-editable; an unreachable or empty
    /// table falls back to the built-in category defaults.
    pub async fn load_policy(&self, auth_token: Option<&str>) -> TreatmentCapacityPolicy {
        let result: Result<Vec<CapacityPolicyRow>, _> = self
            .supabase
            .request(
                Method::GET,
                "/rest/v1/treatment_capacity_policies?order=created_at.asc",
                auth_token,
                None,
            )
            .await;

        match result {
            Ok(rows) => TreatmentCapacityPolicy::from_rows(rows),
            Err(e) => {
                warn!("Failed to load capacity policy, using defaults: {}", e);
                TreatmentCapacityPolicy::default()
            }
        }
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn confirmed_occupants(
        &self,
        treatment_name: &str,
        date: NaiveDate,
        time_slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut query_parts = vec![
            format!("treatment_name=eq.{}", urlencoding::encode(treatment_name)),
            "status=eq.confirmed".to_string(),
            format!("confirmed_date=eq.{}", date),
            format!(
                "confirmed_time_slot=eq.{}",
                urlencoding::encode(&time_slot.to_string())
            ),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        self.fetch_appointments(&path, auth_token).await
    }

    /// Pending demand: appointments that own at least one preference naming
    /// (date, slot), regardless of rank.
    async fn pending_occupants(
        &self,
        treatment_name: &str,
        date: NaiveDate,
        time_slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, BookingError> {
        let preferences_path = format!(
            "/rest/v1/appointment_preferences?preferred_date=eq.{}&preferred_time_slot=eq.{}",
            date,
            urlencoding::encode(&time_slot.to_string())
        );

        let preference_rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &preferences_path, auth_token, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let mut owner_ids: HashSet<Uuid> = HashSet::new();
        for row in &preference_rows {
            if let Some(id) = row
                .get("appointment_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                if Some(id) != exclude_appointment_id {
                    owner_ids.insert(id);
                }
            }
        }

        if owner_ids.is_empty() {
            return Ok(vec![]);
        }

        let id_list = owner_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let appointments_path = format!(
            "/rest/v1/appointments?id=in.({})&status=eq.pending&treatment_name=eq.{}",
            id_list,
            urlencoding::encode(treatment_name)
        );

        self.fetch_appointments(&appointments_path, auth_token).await
    }

    async fn fetch_appointments(
        &self,
        path: &str,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, BookingError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, auth_token, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }
}

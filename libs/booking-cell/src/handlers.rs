// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use schedule_cell::models::TimeSlot;
use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{
    AppointmentSearchQuery, AppointmentStatus, BookingError, CancelAppointmentRequest,
    ConfirmAppointmentRequest, CreateAppointmentRequest, ModifyAppointmentRequest,
};
use crate::services::booking::BookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub treatment_name: String,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CapacityCheckQuery {
    pub treatment_name: String,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    pub status: Option<AppointmentStatus>,
    pub email: Option<String>,
    pub treatment_name: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        BookingError::ValidationError(msg) => AppError::ValidationError(msg),
        BookingError::InvalidStatusTransition(status) => {
            AppError::Conflict(format!("Appointment cannot transition from status {}", status))
        }
        BookingError::SlotLockUnavailable => AppError::Conflict(e.to_string()),
        BookingError::CapacityExceeded { .. } | BookingError::PatientConflict => {
            AppError::Conflict(e.to_string())
        }
        BookingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// PATIENT-FACING HANDLERS
// ==============================================================================

/// Slot availability for the booking form. Advisory only - the listing
/// narrows what the patient is shown, it never gates the confirm.
#[axum::debug_handler]
pub async fn get_slot_availability(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let availability = booking_service
        .slot_availability(query.date, &query.treatment_name, query.duration_minutes, None)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "date": query.date,
        "treatment_name": query.treatment_name,
        "slots": availability,
    })))
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .create_appointment(request, None)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Booking request received - the clinic will confirm a slot shortly"
    })))
}

#[axum::debug_handler]
pub async fn modify_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ModifyAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let appointment = booking_service
        .modify_appointment(appointment_id, request, None)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Preferences updated - the booking is pending confirmation again"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let (appointment, needs_phone_contact) = booking_service
        .cancel_appointment(appointment_id, request, None)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "needs_phone_contact": needs_phone_contact,
    })))
}

// ==============================================================================
// ADMIN HANDLERS
// ==============================================================================

/// Admin confirm into a chosen (date, slot). Capacity and patient-conflict
/// rejections are expected outcomes: they come back as a typed reason so
/// the dashboard can offer a different slot, with the occupancy count
/// attached.
#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<ConfirmAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    match booking_service
        .confirm_appointment(appointment_id, request, auth.token())
        .await
    {
        Ok(appointment) => Ok(Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment confirmed"
        }))),
        Err(BookingError::CapacityExceeded {
            current_count,
            max_capacity,
        }) => Ok(Json(json!({
            "success": false,
            "reason": "capacity_exceeded",
            "current_count": current_count,
            "max_capacity": max_capacity,
            "message": format!("Slot already holds {}/{} bookings for this treatment", current_count, max_capacity)
        }))),
        Err(BookingError::PatientConflict) => Ok(Json(json!({
            "success": false,
            "reason": "patient_conflict",
            "message": "This patient already holds a confirmed booking overlapping that slot"
        }))),
        Err(e) => Err(map_booking_error(e)),
    }
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);
    let token = auth.token();

    let appointment = booking_service
        .get_appointment(appointment_id, Some(token))
        .await
        .map_err(map_booking_error)?;
    let preferences = booking_service
        .get_preferences(appointment_id, Some(token))
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "appointment": appointment,
        "preferences": preferences,
    })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let query = AppointmentSearchQuery {
        status: params.status,
        email: params.email,
        treatment_name: params.treatment_name,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    let appointments = booking_service
        .search_appointments(query, auth.token())
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "count": appointments.len(),
    })))
}

/// Direct capacity probe for the dashboard's slot picker.
#[axum::debug_handler]
pub async fn check_capacity(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<CapacityCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let booking_service = BookingService::new(&state);

    let check = booking_service
        .capacity_service()
        .check_capacity(
            &query.treatment_name,
            query.date,
            &query.time_slot,
            query.exclude_appointment_id,
            Some(auth.token()),
        )
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!(check)))
}

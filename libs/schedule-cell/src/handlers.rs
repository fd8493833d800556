// libs/schedule-cell/src/handlers.rs
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

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{CreateScheduleEntryRequest, ScheduleError, UpdateScheduleEntryRequest};
use crate::services::schedule::ClinicScheduleService;
use crate::services::slots::SlotGenerator;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleListQuery {
    pub year: i32,
    pub month: u32,
}

fn map_schedule_error(e: ScheduleError) -> AppError {
    match e {
        ScheduleError::NotFound => AppError::NotFound("Schedule entry not found".to_string()),
        ScheduleError::OverlappingInterval => AppError::Conflict(e.to_string()),
        ScheduleError::DatabaseError(msg) => AppError::Database(msg),
        other => AppError::ValidationError(other.to_string()),
    }
}

// ==============================================================================
// HANDLERS
// ==============================================================================

/// Public: the raw bookable slots for a date, before capacity narrowing.
#[axum::debug_handler]
pub async fn get_slots(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let generator = SlotGenerator::new(&state);

    let slots = generator
        .slots_for_date(query.date, query.duration_minutes, None)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "date": query.date,
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn list_schedule_entries(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ScheduleListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicScheduleService::new(&state);

    let entries = service
        .list_schedule_entries(query.year, query.month, Some(auth.token()))
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "entries": entries,
    })))
}

#[axum::debug_handler]
pub async fn create_schedule_entry(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateScheduleEntryRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicScheduleService::new(&state);

    let entry = service
        .create_schedule_entry(request, auth.token())
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "entry": entry,
    })))
}

#[axum::debug_handler]
pub async fn update_schedule_entry(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpdateScheduleEntryRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicScheduleService::new(&state);

    let entry = service
        .update_schedule_entry(schedule_id, request, auth.token())
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "entry": entry,
    })))
}

#[axum::debug_handler]
pub async fn delete_schedule_entry(
    State(state): State<Arc<AppConfig>>,
    Path(schedule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let service = ClinicScheduleService::new(&state);

    service
        .delete_schedule_entry(schedule_id, auth.token())
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
    })))
}

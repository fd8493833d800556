// libs/schedule-cell/src/services/schedule.rs
use chrono::{Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    ClinicScheduleEntry, CreateScheduleEntryRequest, OpenInterval, ScheduleError,
    UpdateScheduleEntryRequest,
};

/// Access layer for the administrator-maintained clinic calendar. The
/// booking flow only ever reads it through `open_intervals_for_date`.
pub struct ClinicScheduleService {
    supabase: SupabaseClient,
}

pub fn weekday_index(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

impl ClinicScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Open intervals governing `date`, in chronological order.
    ///
    /// Specific-date override rows take precedence: when any exist for the
    /// date they fully replace the weekday rules, and an unavailable
    /// override closes the whole day. A date with no entries at all is an
    /// ordinary closed day and yields an empty list, not an error.
    pub async fn open_intervals_for_date(
        &self,
        date: NaiveDate,
        auth_token: Option<&str>,
    ) -> Result<Vec<OpenInterval>, ScheduleError> {
        debug!("Fetching open intervals for {}", date);

        let override_path = format!(
            "/rest/v1/clinic_schedules?specific_date=eq.{}&order=start_time.asc",
            date
        );
        let overrides = self.fetch_entries(&override_path, auth_token).await?;

        if !overrides.is_empty() {
            if overrides.iter().any(|entry| !entry.is_available) {
                debug!("Date {} closed by specific-date override", date);
                return Ok(vec![]);
            }
            return Ok(Self::to_intervals(&overrides));
        }

        let weekday_path = format!(
            "/rest/v1/clinic_schedules?year=eq.{}&month=eq.{}&day_of_week=eq.{}&specific_date=is.null&order=start_time.asc",
            date.year(),
            date.month(),
            weekday_index(date)
        );
        let entries = self.fetch_entries(&weekday_path, auth_token).await?;

        if entries.iter().any(|entry| !entry.is_available) {
            debug!("Date {} closed by weekday rule", date);
            return Ok(vec![]);
        }

        Ok(Self::to_intervals(&entries))
    }

    pub async fn list_schedule_entries(
        &self,
        year: i32,
        month: u32,
        auth_token: Option<&str>,
    ) -> Result<Vec<ClinicScheduleEntry>, ScheduleError> {
        let path = format!(
            "/rest/v1/clinic_schedules?year=eq.{}&month=eq.{}&order=day_of_week.asc,start_time.asc",
            year, month
        );
        self.fetch_entries(&path, auth_token).await
    }

    pub async fn create_schedule_entry(
        &self,
        request: CreateScheduleEntryRequest,
        auth_token: &str,
    ) -> Result<ClinicScheduleEntry, ScheduleError> {
        debug!(
            "Creating schedule entry for {}-{} day {}",
            request.year, request.month, request.day_of_week
        );

        if request.start_time >= request.end_time {
            return Err(ScheduleError::InvalidTimeRange);
        }
        if !(1..=12).contains(&request.month) {
            return Err(ScheduleError::InvalidMonth(request.month));
        }

        // A date override carries its own weekday; derive it rather than
        // trusting the caller to keep the two in sync.
        let day_of_week = match request.specific_date {
            Some(date) => weekday_index(date),
            None => request.day_of_week,
        };
        if !(0..=6).contains(&day_of_week) {
            return Err(ScheduleError::InvalidDayOfWeek(day_of_week));
        }

        self.check_interval_overlap(
            request.year,
            request.month,
            day_of_week,
            request.start_time,
            request.end_time,
            request.specific_date,
            None,
            auth_token,
        )
        .await?;

        let entry_data = json!({
            "year": request.year,
            "month": request.month,
            "day_of_week": day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_available": request.is_available.unwrap_or(true),
            "specific_date": request.specific_date,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/clinic_schedules",
                Some(auth_token),
                Some(entry_data),
                Some(headers),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::DatabaseError("Failed to create schedule entry".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse schedule entry: {}", e)))
    }

    pub async fn update_schedule_entry(
        &self,
        schedule_id: Uuid,
        request: UpdateScheduleEntryRequest,
        auth_token: &str,
    ) -> Result<ClinicScheduleEntry, ScheduleError> {
        debug!("Updating schedule entry {}", schedule_id);

        let current = self.get_schedule_entry(schedule_id, auth_token).await?;

        let start_time = request.start_time.unwrap_or(current.start_time);
        let end_time = request.end_time.unwrap_or(current.end_time);
        if start_time >= end_time {
            return Err(ScheduleError::InvalidTimeRange);
        }

        self.check_interval_overlap(
            current.year,
            current.month,
            current.day_of_week,
            start_time,
            end_time,
            current.specific_date,
            Some(schedule_id),
            auth_token,
        )
        .await?;

        let mut update_data = serde_json::Map::new();
        if let Some(start) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(end) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(is_available) = request.is_available {
            update_data.insert("is_available".to_string(), json!(is_available));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/clinic_schedules?id=eq.{}", schedule_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(headers),
            )
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(ScheduleError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse schedule entry: {}", e)))
    }

    pub async fn delete_schedule_entry(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting schedule entry {}", schedule_id);

        let path = format!("/rest/v1/clinic_schedules?id=eq.{}", schedule_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, Some(auth_token), None, Some(headers))
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn get_schedule_entry(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<ClinicScheduleEntry, ScheduleError> {
        let path = format!("/rest/v1/clinic_schedules?id=eq.{}", schedule_id);
        let entries = self.fetch_entries(&path, Some(auth_token)).await?;
        entries.into_iter().next().ok_or(ScheduleError::NotFound)
    }

    async fn fetch_entries(
        &self,
        path: &str,
        auth_token: Option<&str>,
    ) -> Result<Vec<ClinicScheduleEntry>, ScheduleError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, auth_token, None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ClinicScheduleEntry>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse schedule entries: {}", e)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_interval_overlap(
        &self,
        year: i32,
        month: u32,
        day_of_week: i32,
        start_time: NaiveTime,
        end_time: NaiveTime,
        specific_date: Option<NaiveDate>,
        exclude_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let mut path = match specific_date {
            Some(date) => format!("/rest/v1/clinic_schedules?specific_date=eq.{}", date),
            None => format!(
                "/rest/v1/clinic_schedules?year=eq.{}&month=eq.{}&day_of_week=eq.{}&specific_date=is.null",
                year, month, day_of_week
            ),
        };

        if let Some(id) = exclude_id {
            path.push_str(&format!("&id=neq.{}", id));
        }

        let existing = self.fetch_entries(&path, Some(auth_token)).await?;

        for entry in existing {
            if start_time < entry.end_time && entry.start_time < end_time {
                return Err(ScheduleError::OverlappingInterval);
            }
        }

        Ok(())
    }

    fn to_intervals(entries: &[ClinicScheduleEntry]) -> Vec<OpenInterval> {
        entries
            .iter()
            .filter(|entry| entry.is_available)
            .map(|entry| OpenInterval {
                start_time: entry.start_time,
                end_time: entry.end_time,
            })
            .collect()
    }
}

// libs/booking-cell/src/services/consistency.rs
//
// Serializes the authoritative confirm-time check-then-write so two
// concurrent confirmations at the capacity boundary cannot both succeed.
//
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use schedule_cell::models::TimeSlot;
use shared_database::supabase::SupabaseClient;

use crate::models::BookingError;

pub struct SlotLockService {
    supabase: Arc<SupabaseClient>,
    lock_timeout_seconds: i64,
}

impl SlotLockService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            lock_timeout_seconds: 30,
        }
    }

    pub fn lock_key(treatment_name: &str, date: NaiveDate, time_slot: &TimeSlot) -> String {
        format!("{}|{}|{}", treatment_name, date, time_slot)
    }

    /// Try to take the lock by inserting its row; the unique constraint on
    /// `lock_key` makes the insert the arbiter. A stale row left by a
    /// crashed process is cleaned up and the insert retried once.
    pub async fn acquire(&self, lock_key: &str) -> Result<bool, BookingError> {
        if self.try_insert_lock(lock_key).await? {
            debug!("Slot lock acquired: {}", lock_key);
            return Ok(true);
        }

        if self.cleanup_expired(lock_key).await? {
            return self.try_insert_lock(lock_key).await;
        }

        debug!("Slot lock held elsewhere: {}", lock_key);
        Ok(false)
    }

    pub async fn release(&self, lock_key: &str) -> Result<(), BookingError> {
        let path = format!(
            "/rest/v1/slot_locks?lock_key=eq.{}",
            urlencoding::encode(lock_key)
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &path, None, None, Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        debug!("Slot lock released: {}", lock_key);
        Ok(())
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn try_insert_lock(&self, lock_key: &str) -> Result<bool, BookingError> {
        let lock_data = json!({
            "lock_key": lock_key,
            "acquired_at": Utc::now().to_rfc3339(),
            "expires_at": (Utc::now() + Duration::seconds(self.lock_timeout_seconds)).to_rfc3339(),
            "process_id": format!("booking_{}", Uuid::new_v4())
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        match self
            .supabase
            .request_with_headers::<Vec<Value>>(
                Method::POST,
                "/rest/v1/slot_locks",
                None,
                Some(lock_data),
                Some(headers),
            )
            .await
        {
            Ok(_) => Ok(true),
            // A duplicate-key rejection means the lock is held; any other
            // failure is indistinguishable here, so treat both as "not
            // acquired" and let the caller's retry loop decide.
            Err(e) => {
                debug!("Slot lock insert rejected for {}: {}", lock_key, e);
                Ok(false)
            }
        }
    }

    async fn cleanup_expired(&self, lock_key: &str) -> Result<bool, BookingError> {
        let lookup_path = format!(
            "/rest/v1/slot_locks?lock_key=eq.{}",
            urlencoding::encode(lock_key)
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &lookup_path, None, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let expired = rows.iter().any(|row| {
            row.get("expires_at")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|expires_at| expires_at < Utc::now())
                .unwrap_or(false)
        });

        if !expired {
            return Ok(false);
        }

        warn!("Cleaning up expired slot lock: {}", lock_key);

        let delete_path = format!(
            "/rest/v1/slot_locks?lock_key=eq.{}&expires_at=lt.{}",
            urlencoding::encode(lock_key),
            urlencoding::encode(&Utc::now().to_rfc3339())
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(Method::DELETE, &delete_path, None, None, Some(headers))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Ok(true)
    }
}

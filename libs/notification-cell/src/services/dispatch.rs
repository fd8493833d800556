// libs/notification-cell/src/services/dispatch.rs
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{NotificationError, NotificationEvent, NotificationPayload};

/// Best-effort bridge to the external email/SMS dispatcher.
///
/// The appointment state change is the durable fact; a failed dispatch is
/// logged and never propagated back into the booking flow.
#[derive(Clone)]
pub struct NotificationService {
    client: Client,
    webhook_url: String,
    api_token: String,
}

impl NotificationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            webhook_url: config.notify_webhook_url.clone(),
            api_token: config.notify_api_token.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    pub async fn notify(
        &self,
        event: NotificationEvent,
        payload: &NotificationPayload,
    ) -> Result<(), NotificationError> {
        if !self.is_configured() {
            return Err(NotificationError::NotConfigured);
        }

        debug!(
            "Dispatching {} notification for appointment {}",
            event, payload.appointment_id
        );

        let body = json!({
            "event": event,
            "payload": payload,
        });

        let mut request = self.client.post(&self.webhook_url).json(&body);
        if !self.api_token.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_token));
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(NotificationError::DispatchFailed(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        debug!(
            "{} notification dispatched for appointment {}",
            event, payload.appointment_id
        );
        Ok(())
    }

    /// Fire-and-forget dispatch off the request path. An unconfigured sink
    /// is a quiet no-op so local development works without a dispatcher.
    pub fn notify_detached(&self, event: NotificationEvent, payload: NotificationPayload) {
        if !self.is_configured() {
            debug!(
                "Notification sink not configured, skipping {} for appointment {}",
                event, payload.appointment_id
            );
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.notify(event, &payload).await {
                warn!(
                    "Failed to dispatch {} notification for appointment {}: {}",
                    event, payload.appointment_id, e
                );
            }
        });
    }
}

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NotifierConfig;
use crate::error::EngineError;
use crate::monitoring::types::CriticalityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Outage,
    Recovery,
}

/// Payload handed to the delivery channel for one alert.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub equipment_id: String,
    pub equipment_name: String,
    pub tier: CriticalityTier,
    pub outage_start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub repeat_index: u32,
}

/// Delivery channel for alert notifications. Creation of alert events
/// is decoupled from delivery; implementations only report success or
/// failure of one attempt.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), EngineError>;
}

/// Posts the notification as JSON to a configured webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_seconds: u64) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), EngineError> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// Fallback channel when no webhook is configured: alerts surface in
/// the service log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), EngineError> {
        tracing::warn!(
            kind = ?notification.kind,
            equipment_id = %notification.equipment_id,
            tier = %notification.tier,
            duration_minutes = notification.duration_minutes,
            repeat_index = notification.repeat_index,
            "alert notification (no webhook configured)"
        );
        Ok(())
    }
}

/// Build the delivery channel named by the configuration.
pub fn from_config(config: &NotifierConfig) -> Result<Box<dyn Notifier>, EngineError> {
    match &config.webhook_url {
        Some(url) => Ok(Box::new(WebhookNotifier::new(url.clone(), config.timeout_seconds)?)),
        None => Ok(Box::new(LogNotifier)),
    }
}

//! Notification port.
//!
//! Delivery is fire-and-forget: callers never wait on the channel and a
//! failed notification never rolls back the state change it reports.

use async_trait::async_trait;
use serde::Serialize;
use service_core::observability::TracedRequest;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Security,
    Access,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        priority: Priority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            priority,
            title: title.into(),
            message: message.into(),
            action_url: None,
        }
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Notify and log on failure. Never propagates.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let user_id = notification.user_id;
    if let Err(e) = notifier.notify(notification).await {
        tracing::warn!(error = %e, user_id = %user_id, "Notification dispatch failed");
    }
}

/// Posts notifications as JSON to a webhook, carrying the trace context.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        let request = TracedRequest::post(&self.client, &self.endpoint)
            .json(&notification)
            .timeout(self.timeout);
        let user_id = notification.user_id;

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(user_id = %user_id, "Notification delivered");
                }
                Ok(response) => {
                    tracing::warn!(
                        user_id = %user_id,
                        status = %response.status(),
                        "Notification webhook rejected request"
                    );
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Notification webhook unreachable");
                }
            }
        }
        .instrument(tracing::Span::current()));
        Ok(())
    }
}

/// Drops notifications. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        tracing::debug!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Notification dropped (no channel configured)"
        );
        Ok(())
    }
}

/// Records notifications in memory (for testing).
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn sent_to(&self, user_id: Uuid) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("notification channel down");
        }
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("RecordingNotifier mutex poisoned"))?
            .push(notification);
        Ok(())
    }
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Sync events pushed to connected observers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::services::clients::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SyncStarted,
    SyncProgress,
    SyncCompleted,
    SyncError,
    NewEmail,
    EmailRead,
    EmailStarred,
    EmailDeleted,
    Notification,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SyncStarted => "sync_started",
            EventType::SyncProgress => "sync_progress",
            EventType::SyncCompleted => "sync_completed",
            EventType::SyncError => "sync_error",
            EventType::NewEmail => "new_email",
            EventType::EmailRead => "email_read",
            EventType::EmailStarred => "email_starred",
            EventType::EmailDeleted => "email_deleted",
            EventType::Notification => "notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Payload of `sync_progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub account_id: i64,
    pub folder_name: String,
    /// Fraction of the planned work done, in `[0, 1]`.
    pub progress: f64,
    pub processed_count: u64,
    pub total_count: u64,
}

impl SyncProgress {
    pub fn new(account_id: i64, folder_name: &str, processed_count: u64, total_count: u64) -> Self {
        let progress = if total_count == 0 {
            1.0
        } else {
            (processed_count as f64 / total_count as f64).min(1.0)
        };
        Self {
            account_id,
            folder_name: folder_name.to_string(),
            progress,
            processed_count,
            total_count,
        }
    }
}

/// Destination for per-user events. Returns the number of connections the
/// event reached.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_to_user(&self, user_id: &str, event: SyncEvent) -> Result<usize, ConnectionError>;
}

/// Sink that drops everything, for runs without observers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish_to_user(&self, _user_id: &str, _event: SyncEvent) -> Result<usize, ConnectionError> {
        Ok(0)
    }
}

/// Typed, best-effort front end over an [`EventSink`]. Delivery errors are
/// logged and never reach the caller.
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub async fn publish(&self, user_id: &str, event: SyncEvent) {
        let event_type = event.event_type;
        match self.sink.publish_to_user(user_id, event).await {
            Ok(delivered) => debug!("Event {} delivered to {} connection(s) of {}", event_type.as_str(), delivered, user_id),
            Err(e) => warn!("Failed to publish {} for user {}: {}", event_type.as_str(), user_id, e),
        }
    }

    pub async fn sync_started(&self, user_id: &str, account_id: i64) {
        self.publish(user_id, SyncEvent::new(EventType::SyncStarted, json!({ "accountId": account_id })))
            .await;
    }

    pub async fn sync_progress(&self, user_id: &str, progress: SyncProgress) {
        let data = serde_json::to_value(&progress).unwrap_or_else(|_| json!({}));
        self.publish(user_id, SyncEvent::new(EventType::SyncProgress, data)).await;
    }

    pub async fn sync_completed(&self, user_id: &str, account_id: i64, new_messages: usize, folders: usize) {
        self.publish(
            user_id,
            SyncEvent::new(
                EventType::SyncCompleted,
                json!({ "accountId": account_id, "newMessages": new_messages, "folders": folders }),
            ),
        )
        .await;
    }

    pub async fn sync_error(&self, user_id: &str, account_id: i64, error: &str) {
        self.publish(
            user_id,
            SyncEvent::new(EventType::SyncError, json!({ "accountId": account_id, "error": error })),
        )
        .await;
    }

    pub async fn new_email(&self, user_id: &str, account_id: i64, folder_id: i64, message_id: i64, subject: Option<&str>) {
        self.publish(
            user_id,
            SyncEvent::new(
                EventType::NewEmail,
                json!({
                    "accountId": account_id,
                    "folderId": folder_id,
                    "emailId": message_id,
                    "subject": subject,
                }),
            ),
        )
        .await;
    }

    pub async fn email_read(&self, user_id: &str, message_ids: &[i64], read: bool) {
        self.publish(
            user_id,
            SyncEvent::new(EventType::EmailRead, json!({ "emailIds": message_ids, "isRead": read })),
        )
        .await;
    }

    pub async fn email_starred(&self, user_id: &str, message_ids: &[i64], starred: bool) {
        self.publish(
            user_id,
            SyncEvent::new(EventType::EmailStarred, json!({ "emailIds": message_ids, "isStarred": starred })),
        )
        .await;
    }

    pub async fn email_deleted(&self, user_id: &str, message_ids: &[i64]) {
        self.publish(user_id, SyncEvent::new(EventType::EmailDeleted, json!({ "emailIds": message_ids })))
            .await;
    }

    pub async fn notification(&self, user_id: &str, message: &str) {
        self.publish(user_id, SyncEvent::new(EventType::Notification, json!({ "message": message })))
            .await;
    }
}

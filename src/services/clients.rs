// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::events::{EventSink, SyncEvent};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("Connection context done")]
    ContextDone,
    #[error("Send failed: {0}")]
    Send(String),
}

/// Transport behind an observer connection.
#[async_trait]
pub trait EventWriter: Send + Sync {
    async fn write(&self, payload: &str) -> Result<(), ConnectionError>;
    async fn flush(&self) -> Result<(), ConnectionError>;
}

/// Bounded channel transport, suited to SSE-style streaming.
pub struct ChannelWriter {
    tx: mpsc::Sender<String>,
}

impl ChannelWriter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventWriter for ChannelWriter {
    async fn write(&self, payload: &str) -> Result<(), ConnectionError> {
        self.tx.try_send(payload.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::Send("buffer full".to_string()),
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Send("receiver dropped".to_string()),
        })
    }

    async fn flush(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_connections_per_user: usize,
    pub activity_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: 5,
            activity_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct ObserverConnection {
    id: String,
    client_id: String,
    user_id: String,
    writer: Box<dyn EventWriter>,
    active: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
}

impl ObserverConnection {
    pub fn new(user_id: &str, client_id: &str, writer: Box<dyn EventWriter>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            writer,
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            connected_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Token fired when the observer goes away.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_activity_ms.load(Ordering::SeqCst))
            .single()
            .unwrap_or(self.connected_at)
    }

    pub async fn send(&self, event: &SyncEvent) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            self.active.store(false, Ordering::SeqCst);
            return Err(ConnectionError::Closed);
        }
        if self.cancel.is_cancelled() {
            self.active.store(false, Ordering::SeqCst);
            return Err(ConnectionError::ContextDone);
        }

        let payload = serde_json::to_string(event).map_err(|e| ConnectionError::Send(e.to_string()))?;
        let outcome = AssertUnwindSafe(async {
            self.writer.write(&payload).await?;
            self.writer.flush().await
        })
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(())) => {
                self.last_activity_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
                Ok(())
            }
            Ok(Err(e)) => {
                self.active.store(false, Ordering::SeqCst);
                Err(match e {
                    ConnectionError::Send(_) => e,
                    other => ConnectionError::Send(other.to_string()),
                })
            }
            Err(_) => {
                self.active.store(false, Ordering::SeqCst);
                Err(ConnectionError::Send("writer panicked".to_string()))
            }
        }
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing observer connection {} ({})", self.id, self.client_id);
        }
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Records activity without sending an event, for transports that keep
    /// the connection alive on their own.
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    fn touch_at(&self, at: DateTime<Utc>) {
        self.last_activity_ms.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

/// Per-user observer connections.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Vec<Arc<ObserverConnection>>>>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Adds a connection. An existing one with the same `client_id` is closed
    /// and replaced; beyond the per-user cap the oldest is evicted.
    pub async fn register(&self, user_id: &str, client_id: &str, writer: Box<dyn EventWriter>) -> Arc<ObserverConnection> {
        let connection = Arc::new(ObserverConnection::new(user_id, client_id, writer));
        let mut connections = self.connections.write().await;
        let list = connections.entry(user_id.to_string()).or_default();

        if let Some(pos) = list.iter().position(|c| c.client_id == client_id) {
            let replaced = list.remove(pos);
            replaced.close();
            debug!("Replaced connection for client {} of user {}", client_id, user_id);
        }
        let cap = self.config.max_connections_per_user.max(1);
        while list.len() >= cap {
            let evicted = list.remove(0);
            evicted.close();
            info!("Evicted oldest connection {} of user {} (cap {})", evicted.id, user_id, cap);
        }

        list.push(connection.clone());
        info!("Registered observer {} for user {}", connection.id, user_id);
        connection
    }

    pub async fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let Some(list) = connections.get_mut(user_id) else { return false };
        let Some(pos) = list.iter().position(|c| c.id == connection_id) else { return false };
        list.remove(pos).close();
        if list.is_empty() {
            connections.remove(user_id);
        }
        true
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.connections.read().await.get(user_id).map_or(0, Vec::len)
    }

    pub async fn total_connections(&self) -> usize {
        self.connections.read().await.values().map(Vec::len).sum()
    }

    /// Removes connections that are inactive, closed or idle for longer than
    /// the activity timeout.
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.activity_timeout).unwrap_or(chrono::Duration::zero());
        let mut connections = self.connections.write().await;
        let mut removed = 0;

        for list in connections.values_mut() {
            list.retain(|connection| {
                let keep = connection.is_active() && connection.last_activity() >= cutoff;
                if !keep {
                    connection.close();
                    removed += 1;
                }
                keep
            });
        }
        connections.retain(|_, list| !list.is_empty());

        if removed > 0 {
            info!("Swept {} stale observer connection(s)", removed);
        }
        removed
    }

    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Connection sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[async_trait]
impl EventSink for ConnectionRegistry {
    async fn publish_to_user(&self, user_id: &str, event: SyncEvent) -> Result<usize, ConnectionError> {
        let targets: Vec<Arc<ObserverConnection>> = {
            let connections = self.connections.read().await;
            connections.get(user_id).cloned().unwrap_or_default()
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for connection in &targets {
            match connection.send(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Failed to send event to connection {}: {}", connection.id, e);
                    failed.push(connection.id.clone());
                }
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.write().await;
            if let Some(list) = connections.get_mut(user_id) {
                list.retain(|c| !failed.contains(&c.id));
                if list.is_empty() {
                    connections.remove(user_id);
                }
            }
        }
        Ok(delivered)
    }
}

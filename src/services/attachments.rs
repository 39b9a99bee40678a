// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! On-demand attachment downloads, bounded by one process-wide semaphore.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::imap::client::{ensure_connected, MailClientFactory};
use crate::models::{Attachment, DownloadProgress, DownloadStatus};
use crate::services::attachment_storage::{AttachmentError, ContentStorage};
use crate::services::retry::RetryController;
use crate::services::store::MailStore;
use crate::utils::decode_transfer_encoding;

#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    pub max_concurrent_downloads: usize,
    pub chunk_size: usize,
    pub preview_bytes: usize,
    pub retention: Duration,
    pub sweep_interval: Duration,
    /// How long a finished download's progress stays queryable.
    pub progress_retention: Duration,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 5,
            chunk_size: 64 * 1024,
            preview_bytes: 4096,
            retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            progress_retention: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadReport {
    pub completed: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

struct TrackedProgress {
    progress: DownloadProgress,
    finished_at: Option<Instant>,
}

pub struct AttachmentDownloadManager {
    store: Arc<dyn MailStore>,
    storage: Arc<dyn ContentStorage>,
    clients: Arc<dyn MailClientFactory>,
    retry: RetryController,
    semaphore: Arc<Semaphore>,
    progress: RwLock<HashMap<i64, TrackedProgress>>,
    config: AttachmentConfig,
    cancel: CancellationToken,
}

impl AttachmentDownloadManager {
    pub fn new(
        store: Arc<dyn MailStore>,
        storage: Arc<dyn ContentStorage>,
        clients: Arc<dyn MailClientFactory>,
        retry: RetryController,
        config: AttachmentConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            store,
            storage,
            clients,
            retry,
            progress: RwLock::new(HashMap::new()),
            config,
            cancel,
        }
    }

    pub fn storage(&self) -> &Arc<dyn ContentStorage> {
        &self.storage
    }

    /// Downloads slots not currently taken.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn progress(&self, attachment_id: i64) -> Option<DownloadProgress> {
        self.progress
            .read()
            .await
            .get(&attachment_id)
            .map(|tracked| tracked.progress.clone())
    }

    pub async fn clear_progress(&self, attachment_id: i64) {
        self.progress.write().await.remove(&attachment_id);
    }

    /// Drops progress of downloads that finished longer ago than
    /// `progress_retention`. Returns the number of entries removed.
    pub async fn prune_progress(&self) -> usize {
        self.prune_progress_older_than(self.config.progress_retention).await
    }

    pub async fn prune_progress_older_than(&self, age: Duration) -> usize {
        let mut progress = self.progress.write().await;
        let before = progress.len();
        progress.retain(|_, tracked| tracked.finished_at.map_or(true, |at| at.elapsed() < age));
        before - progress.len()
    }

    /// Fetches, decodes and stores one attachment. Already downloaded
    /// attachments whose content still exists are returned as is.
    pub async fn download_attachment(&self, attachment_id: i64) -> Result<Attachment, AttachmentError> {
        let attachment = self
            .store
            .get_attachment(attachment_id)
            .await?
            .ok_or_else(|| AttachmentError::NotFound(format!("attachment {}", attachment_id)))?;

        if attachment.is_downloaded {
            if let Some(path) = &attachment.storage_path {
                if self.storage.exists(path).await {
                    debug!("Attachment {} already downloaded", attachment_id);
                    return Ok(attachment);
                }
            }
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| AttachmentError::TaskFailed(e.to_string()))?;

        self.set_progress(attachment_id, DownloadProgress {
            status: DownloadStatus::Downloading,
            bytes_total: attachment.size,
            bytes_loaded: 0,
            error: None,
        })
        .await;

        match self.fetch_and_store(&attachment).await {
            Ok(stored) => {
                self.finish_progress(attachment_id, DownloadStatus::Completed, None).await;
                info!("Downloaded attachment {} ({} bytes)", attachment_id, stored.size);
                Ok(stored)
            }
            Err(e) => {
                warn!("Download of attachment {} failed: {}", attachment_id, e);
                self.finish_progress(attachment_id, DownloadStatus::Failed, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Downloads every attachment of a message concurrently.
    pub async fn download_email_attachments(&self, message_id: i64) -> Result<DownloadReport, AttachmentError> {
        let attachments = self.store.list_attachments(message_id).await?;
        let results = join_all(attachments.iter().map(|a| self.download_attachment(a.id))).await;

        let mut report = DownloadReport::default();
        for (attachment, result) in attachments.iter().zip(results) {
            match result {
                Ok(_) => report.completed.push(attachment.id),
                Err(e) => report.failed.push((attachment.id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Stores content that was delivered together with its message.
    pub async fn store_inline(&self, attachment: &Attachment, encoded: &[u8]) -> Result<Attachment, AttachmentError> {
        let decoded = decode_or_raw(attachment, encoded);
        self.write_content(attachment, &decoded).await
    }

    /// First bytes of a text or image attachment, downloading it if needed.
    pub async fn generate_preview(&self, attachment_id: i64) -> Result<Option<Vec<u8>>, AttachmentError> {
        let attachment = self
            .store
            .get_attachment(attachment_id)
            .await?
            .ok_or_else(|| AttachmentError::NotFound(format!("attachment {}", attachment_id)))?;
        if !matches!(attachment.main_type(), "text" | "image") {
            return Ok(None);
        }

        let attachment = self.download_attachment(attachment_id).await?;
        let path = attachment
            .storage_path
            .as_deref()
            .ok_or_else(|| AttachmentError::NotFound(format!("content of attachment {}", attachment_id)))?;
        let mut content = self.storage.retrieve(path).await?;
        content.truncate(self.config.preview_bytes);
        Ok(Some(content))
    }

    /// Removes stored content of the given attachments, logging failures.
    pub async fn delete_content(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            if let Some(path) = &attachment.storage_path {
                if let Err(e) = self.storage.delete(path).await {
                    warn!("Could not delete content of attachment {}: {}", attachment.id, e);
                }
            }
            self.progress.write().await.remove(&attachment.id);
        }
    }

    pub async fn sweep_unassociated(&self) -> Result<usize, AttachmentError> {
        let retention = chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::hours(24));
        self.sweep_unassociated_before(Utc::now() - retention).await
    }

    /// Deletes attachments without a message created before `cutoff`.
    pub async fn sweep_unassociated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AttachmentError> {
        let stale = self.store.list_unassociated_attachments(cutoff).await?;
        self.delete_content(&stale).await;
        for attachment in &stale {
            self.store.delete_attachment(attachment.id).await?;
        }
        if !stale.is_empty() {
            info!("Swept {} unassociated attachment(s)", stale.len());
        }
        Ok(stale.len())
    }

    pub fn spawn_retention_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!("Attachment retention sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep_unassociated().await {
                            warn!("Attachment retention sweep failed: {}", e);
                        }
                        let pruned = self.prune_progress().await;
                        if pruned > 0 {
                            debug!("Pruned {} finished download progress entries", pruned);
                        }
                    }
                }
            }
        })
    }

    async fn fetch_and_store(&self, attachment: &Attachment) -> Result<Attachment, AttachmentError> {
        let message_id = attachment.message_id.ok_or(AttachmentError::Orphaned(attachment.id))?;
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AttachmentError::NotFound(format!("message {}", message_id)))?;
        let folder_id = message.folder_id.ok_or(AttachmentError::Orphaned(attachment.id))?;
        let folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| AttachmentError::NotFound(format!("folder {}", folder_id)))?;
        let account = self
            .store
            .get_account(attachment.account_id)
            .await?
            .ok_or_else(|| AttachmentError::NotFound(format!("account {}", attachment.account_id)))?;

        let client = self.clients.create(&account).await?;
        let raw = self
            .retry
            .run("get_attachment", &self.cancel, Some(account.provider), || {
                let client = client.clone();
                let path = folder.path.clone();
                let part_id = attachment.part_id.clone();
                let uid = message.uid;
                async move {
                    ensure_connected(client.as_ref()).await?;
                    client.get_attachment(&path, uid, &part_id).await
                }
            })
            .await;
        if let Err(e) = client.disconnect().await {
            debug!("Disconnect after attachment fetch failed: {}", e);
        }

        let decoded = decode_or_raw(attachment, &raw?);
        self.write_content(attachment, &decoded).await
    }

    async fn write_content(&self, attachment: &Attachment, content: &[u8]) -> Result<Attachment, AttachmentError> {
        let path = self.storage.storage_path(attachment);
        let mut writer = self.storage.open_writer(&path).await?;

        let mut loaded = 0u64;
        for chunk in content.chunks(self.config.chunk_size.max(1)) {
            writer.write_all(chunk).await?;
            loaded += chunk.len() as u64;
            if let Some(tracked) = self.progress.write().await.get_mut(&attachment.id) {
                tracked.progress.bytes_loaded = loaded;
                tracked.progress.bytes_total = tracked.progress.bytes_total.max(content.len() as u64);
            }
        }
        writer.flush().await?;
        writer.shutdown().await?;

        if content.len() as u64 != attachment.size {
            debug!(
                "Attachment {} size changed from {} to {} after decoding",
                attachment.id,
                attachment.size,
                content.len()
            );
        }
        self.store
            .mark_attachment_downloaded(attachment.id, &path, content.len() as u64)
            .await?;

        Ok(Attachment {
            is_downloaded: true,
            storage_path: Some(path),
            size: content.len() as u64,
            ..attachment.clone()
        })
    }

    async fn set_progress(&self, attachment_id: i64, progress: DownloadProgress) {
        self.progress.write().await.insert(
            attachment_id,
            TrackedProgress {
                progress,
                finished_at: None,
            },
        );
    }

    async fn finish_progress(&self, attachment_id: i64, status: DownloadStatus, error: Option<String>) {
        let mut progress = self.progress.write().await;
        let entry = progress.entry(attachment_id).or_insert_with(|| TrackedProgress {
            progress: DownloadProgress::pending(0),
            finished_at: None,
        });
        entry.progress.status = status;
        entry.progress.error = error;
        entry.finished_at = Some(Instant::now());
    }
}

/// Decodes by transfer encoding, keeping the raw bytes when that fails.
fn decode_or_raw(attachment: &Attachment, raw: &[u8]) -> Vec<u8> {
    match decode_transfer_encoding(raw, &attachment.transfer_encoding) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(
                "Could not decode attachment {} as {}, storing raw bytes: {}",
                attachment.id, attachment.transfer_encoding, e
            );
            raw.to_vec()
        }
    }
}

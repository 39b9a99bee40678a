// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWrite;

use crate::imap::error::ImapError;
use crate::models::Attachment;
use crate::services::retry::RetryError;
use crate::services::store::StoreError;

#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("IMAP error: {0}")]
    ImapError(#[from] ImapError),
    #[error("Remote fetch failed: {0}")]
    RetryError(#[from] RetryError),
    #[error("Attachment not found: {0}")]
    NotFound(String),
    #[error("Attachment {0} has no message or folder to fetch from")]
    Orphaned(i64),
    #[error("Download task failed: {0}")]
    TaskFailed(String),
}

pub type ContentWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Backend holding decoded attachment bytes.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Location the attachment's content is written to.
    fn storage_path(&self, attachment: &Attachment) -> String;

    async fn open_writer(&self, path: &str) -> Result<ContentWriter, AttachmentError>;

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, AttachmentError>;

    async fn delete(&self, path: &str) -> Result<(), AttachmentError>;

    async fn exists(&self, path: &str) -> bool;
}

/// Replaces characters that are unsafe in file names and caps the length.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(200)
        .collect();
    match cleaned.trim_matches('.') {
        "" => "attachment".to_string(),
        _ => cleaned,
    }
}

/// Files under `<root>/<account>/<message>/<attachment-id>_<filename>`.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ContentStorage for FileSystemStorage {
    fn storage_path(&self, attachment: &Attachment) -> String {
        let message_dir = attachment
            .message_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unassociated".to_string());
        self.root
            .join(attachment.account_id.to_string())
            .join(message_dir)
            .join(format!("{}_{}", attachment.id, sanitize_filename(&attachment.filename)))
            .to_string_lossy()
            .to_string()
    }

    async fn open_writer(&self, path: &str) -> Result<ContentWriter, AttachmentError> {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(path).await?;
        debug!("Opened attachment file {:?}", path);
        Ok(Box::new(file))
    }

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, AttachmentError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AttachmentError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), AttachmentError> {
        let path = Path::new(path);
        match fs::remove_file(path).await {
            Ok(()) => debug!("Deleted attachment file {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to delete attachment file {:?}: {}", path, e);
                return Err(e.into());
            }
        }

        // Drop the message directory once it is empty
        if let Some(parent) = path.parent() {
            if fs::remove_dir(parent).await.is_err() {
                debug!("Kept non-empty directory {:?}", parent);
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
    }
}

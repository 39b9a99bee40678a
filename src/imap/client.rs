// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;

use crate::imap::error::ImapError;
use crate::imap::types::{FetchCriteria, FolderStatus, RemoteFolder, RemoteMessage};
use crate::models::Account;

/// Remote mail store operations the sync engine relies on.
///
/// Implementations own a single protocol session. `connect` must be safe to
/// call again after the session dropped; the engine uses it to resume.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailClient: Send + Sync {
    async fn connect(&self) -> Result<(), ImapError>;

    async fn disconnect(&self) -> Result<(), ImapError>;

    async fn is_connected(&self) -> bool;

    async fn list_folders(&self) -> Result<Vec<RemoteFolder>, ImapError>;

    async fn get_folder_status(&self, path: &str) -> Result<FolderStatus, ImapError>;

    /// Messages with `start <= uid <= end`. Missing UIDs are simply absent.
    async fn get_emails_in_uid_range(&self, path: &str, start: u32, end: u32) -> Result<Vec<RemoteMessage>, ImapError>;

    /// Sequence-number based fetch of the most recent `criteria.limit` messages.
    async fn fetch_emails(&self, path: &str, criteria: &FetchCriteria) -> Result<Vec<RemoteMessage>, ImapError>;

    /// Raw, still transfer-encoded bytes of one body part.
    async fn get_attachment(&self, path: &str, uid: u32, part_id: &str) -> Result<Vec<u8>, ImapError>;

    async fn create_folder(&self, path: &str) -> Result<(), ImapError>;

    async fn delete_folder(&self, path: &str) -> Result<(), ImapError>;

    async fn rename_folder(&self, from: &str, to: &str) -> Result<(), ImapError>;

    async fn move_emails(&self, path: &str, uids: &[u32], target_path: &str) -> Result<(), ImapError>;

    async fn delete_emails(&self, path: &str, uids: &[u32]) -> Result<(), ImapError>;
}

/// Builds connected clients for an account.
#[async_trait]
pub trait MailClientFactory: Send + Sync {
    async fn create(&self, account: &Account) -> Result<Arc<dyn MailClient>, ImapError>;
}

/// Makes sure the client has a live session before an operation runs.
pub async fn ensure_connected(client: &dyn MailClient) -> Result<(), ImapError> {
    if !client.is_connected().await {
        log::info!("Mail client disconnected, reconnecting");
        client.connect().await?;
    }
    Ok(())
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistence contract consumed by the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::imap::types::{FolderStatus, RemoteFolder};
use crate::models::{
    Account, AccountSyncStatus, Attachment, Folder, FolderSyncState, Message, MessageFlags, NewAccount,
    NewAttachment, NewMessage,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unique constraint violated: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store operation failed: {0}")]
    OperationFailed(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
            _ => StoreError::Database(err),
        }
    }
}

/// Folder state committed together with a window of new messages.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderCommit {
    pub folder_id: i64,
    pub status: FolderStatus,
    /// Cursor target; `None` for windows that must not move the cursor.
    pub cursor_uid: Option<u32>,
}

/// Rows sharing one Message-ID inside an account, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub message_id: String,
    pub ids: Vec<i64>,
}

#[async_trait]
pub trait MailStore: Send + Sync {
    // Accounts
    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError>;
    async fn get_account(&self, account_id: i64) -> Result<Option<Account>, StoreError>;
    async fn list_active_accounts(&self, user_id: Option<&str>) -> Result<Vec<Account>, StoreError>;
    async fn set_account_status(
        &self,
        account_id: i64,
        status: AccountSyncStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
    /// Recomputes total/unread counters from persisted rows and stores them.
    async fn refresh_account_counters(&self, account_id: i64) -> Result<(i64, i64), StoreError>;

    // Folders
    async fn list_folders(&self, account_id: i64) -> Result<Vec<Folder>, StoreError>;
    async fn get_folder(&self, folder_id: i64) -> Result<Option<Folder>, StoreError>;
    /// Looks a folder up by display name or full path.
    async fn find_folder(&self, account_id: i64, name: &str) -> Result<Option<Folder>, StoreError>;
    async fn upsert_folder(&self, account_id: i64, folder: &RemoteFolder) -> Result<Folder, StoreError>;
    async fn apply_folder_commit(&self, commit: &FolderCommit) -> Result<(), StoreError>;

    // Cursor
    async fn get_sync_state(&self, folder_id: i64) -> Result<FolderSyncState, StoreError>;
    /// Flags the folder as in progress, returning whether it already was.
    async fn mark_sync_started(&self, folder_id: i64) -> Result<bool, StoreError>;
    async fn mark_sync_finished(&self, folder_id: i64) -> Result<(), StoreError>;
    /// Monotonic: only applied when `uid` exceeds the stored value.
    async fn advance_cursor(&self, folder_id: i64, uid: u32) -> Result<bool, StoreError>;
    /// Drops every message of the folder and restarts its cursor under a new
    /// UID validity. Returns the removed attachment rows.
    async fn reset_folder(&self, folder_id: i64, uid_validity: u32) -> Result<Vec<Attachment>, StoreError>;
    async fn persisted_uids(&self, folder_id: i64) -> Result<Vec<u32>, StoreError>;
    async fn count_folder_messages(&self, folder_id: i64) -> Result<i64, StoreError>;

    // Messages
    /// Inserts every message plus attachments and applies `commit` in one
    /// transaction. A unique violation rolls everything back and surfaces as
    /// `StoreError::Conflict`.
    async fn insert_batch(&self, messages: &[NewMessage], commit: Option<&FolderCommit>) -> Result<Vec<i64>, StoreError>;
    async fn insert_message(&self, message: &NewMessage) -> Result<i64, StoreError>;
    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError>;
    async fn find_by_message_ids(&self, account_id: i64, normalized_ids: &[String]) -> Result<Vec<Message>, StoreError>;
    async fn find_by_uids(&self, folder_id: i64, uids: &[u32]) -> Result<Vec<Message>, StoreError>;
    async fn find_by_thread(&self, account_id: i64, thread_key: &str) -> Result<Vec<Message>, StoreError>;
    async fn find_similar(
        &self,
        account_id: i64,
        from_address: &str,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError>;
    async fn relocate_message(&self, message_id: i64, folder_id: i64, uid: u32) -> Result<(), StoreError>;
    async fn update_flags(&self, message_id: i64, flags: MessageFlags) -> Result<(), StoreError>;
    /// Fills body columns that are still empty; existing content is kept.
    async fn fill_missing_body(
        &self,
        message_id: i64,
        body_text: Option<&str>,
        body_html: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn set_read(&self, message_ids: &[i64], read: bool) -> Result<u64, StoreError>;
    async fn set_starred(&self, message_ids: &[i64], starred: bool) -> Result<u64, StoreError>;
    async fn move_messages(&self, message_ids: &[i64], folder_id: i64) -> Result<u64, StoreError>;
    async fn delete_messages(&self, message_ids: &[i64]) -> Result<u64, StoreError>;
    async fn find_duplicate_groups(&self, account_id: i64) -> Result<Vec<DuplicateGroup>, StoreError>;

    // Attachments
    async fn insert_attachment(
        &self,
        account_id: i64,
        message_id: Option<i64>,
        attachment: &NewAttachment,
    ) -> Result<Attachment, StoreError>;
    async fn get_attachment(&self, attachment_id: i64) -> Result<Option<Attachment>, StoreError>;
    async fn list_attachments(&self, message_id: i64) -> Result<Vec<Attachment>, StoreError>;
    async fn mark_attachment_downloaded(&self, attachment_id: i64, storage_path: &str, size: u64) -> Result<(), StoreError>;
    async fn reassign_attachments(&self, from_message_ids: &[i64], to_message_id: i64) -> Result<u64, StoreError>;
    async fn list_unassociated_attachments(&self, older_than: DateTime<Utc>) -> Result<Vec<Attachment>, StoreError>;
    async fn delete_attachment(&self, attachment_id: i64) -> Result<(), StoreError>;
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Junk,
    Archive,
    All,
    Other,
}

impl FolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::Inbox => "inbox",
            FolderType::Sent => "sent",
            FolderType::Drafts => "drafts",
            FolderType::Trash => "trash",
            FolderType::Junk => "junk",
            FolderType::Archive => "archive",
            FolderType::All => "all",
            FolderType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "inbox" => FolderType::Inbox,
            "sent" => FolderType::Sent,
            "drafts" => FolderType::Drafts,
            "trash" => FolderType::Trash,
            "junk" | "spam" => FolderType::Junk,
            "archive" => FolderType::Archive,
            "all" => FolderType::All,
            _ => FolderType::Other,
        }
    }
}

/// A persisted folder with its protocol state.
///
/// While `uid_validity` is unchanged, `uid_next` never decreases and every
/// persisted message UID in the folder is below it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub path: String,
    pub delimiter: Option<String>,
    pub folder_type: FolderType,
    pub is_selectable: bool,
    pub is_subscribed: bool,
    pub uid_validity: u32,
    pub uid_next: u32,
    pub total_count: u32,
    pub unread_count: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Per-folder sync cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSyncState {
    pub folder_id: i64,
    pub last_uid: u32,
    /// Incremented whenever the cursor is reset by a full resync.
    pub sync_version: i64,
    /// Set while a pass is running; still set at the start of the next pass
    /// means the previous one was interrupted.
    pub in_progress: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl FolderSyncState {
    pub fn empty(folder_id: i64) -> Self {
        Self {
            folder_id,
            last_uid: 0,
            sync_version: 1,
            in_progress: false,
            last_synced_at: None,
        }
    }
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    /// `None` for temporary attachments not yet tied to a message.
    pub message_id: Option<i64>,
    pub account_id: i64,
    pub filename: String,
    pub content_type: String,
    /// Declared size before decoding; replaced by the decoded size after download.
    pub size: u64,
    pub transfer_encoding: String,
    pub part_id: String,
    pub is_downloaded: bool,
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn main_type(&self) -> &str {
        self.content_type.split('/').next().unwrap_or("application")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    pub bytes_total: u64,
    pub bytes_loaded: u64,
    pub error: Option<String>,
}

impl DownloadProgress {
    pub fn pending(bytes_total: u64) -> Self {
        Self {
            status: DownloadStatus::Pending,
            bytes_total,
            bytes_loaded: 0,
            error: None,
        }
    }
}

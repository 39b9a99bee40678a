// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FolderType, MessageFlags};

/// Keyword prefix some servers use to expose a conversation id as a flag.
pub const THREAD_KEYWORD_PREFIX: &str = "$ThreadId:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub name: String,
    pub path: String,
    pub folder_type: FolderType,
    pub delimiter: Option<String>,
    pub selectable: bool,
    pub subscribed: bool,
}

/// Result of a STATUS query on a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FolderStatus {
    pub uid_validity: u32,
    pub uid_next: u32,
    pub total: u32,
    pub unread: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    /// Server-side part identifier used to fetch the bytes later.
    pub part_id: String,
    pub filename: String,
    pub content_type: String,
    /// Declared (encoded) size.
    pub size: u64,
    pub transfer_encoding: String,
    /// Still-encoded content when the server already delivered it.
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub uid: u32,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub flags: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub size: u32,
    pub attachments: Vec<RemoteAttachment>,
}

impl RemoteMessage {
    pub fn parsed_flags(&self) -> MessageFlags {
        MessageFlags::from_imap(&self.flags)
    }

    /// Conversation key: the explicit thread id, else a `$ThreadId:` keyword.
    pub fn thread_key(&self) -> Option<String> {
        if let Some(id) = self.thread_id.as_ref().filter(|id| !id.is_empty()) {
            return Some(id.clone());
        }
        self.flags.iter().find_map(|flag| {
            flag.strip_prefix(THREAD_KEYWORD_PREFIX)
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
        })
    }
}

/// Sequence-based fetch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCriteria {
    pub limit: usize,
    pub include_body: bool,
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Booleans derived from IMAP system flags and keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub read: bool,
    pub starred: bool,
    pub draft: bool,
    pub answered: bool,
    pub forwarded: bool,
}

impl MessageFlags {
    pub fn from_imap<S: AsRef<str>>(flags: &[S]) -> Self {
        let mut out = MessageFlags::default();
        for flag in flags {
            match flag.as_ref().to_ascii_lowercase().as_str() {
                "\\seen" => out.read = true,
                "\\flagged" => out.starred = true,
                "\\draft" => out.draft = true,
                "\\answered" => out.answered = true,
                "$forwarded" | "forwarded" => out.forwarded = true,
                // Read receipts sent count as read
                "$mdnsent" => out.read = true,
                _ => {}
            }
        }
        out
    }

    /// Union of both flag sets.
    pub fn merged(self, other: MessageFlags) -> Self {
        Self {
            read: self.read || other.read,
            starred: self.starred || other.starred,
            draft: self.draft && other.draft,
            answered: self.answered || other.answered,
            forwarded: self.forwarded || other.forwarded,
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub account_id: i64,
    /// `None` while the message is being moved between folders.
    pub folder_id: Option<i64>,
    pub uid: u32,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub flags: MessageFlags,
    pub has_attachments: bool,
    pub size: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn has_body(&self) -> bool {
        self.body_text.is_some() || self.body_html.is_some()
    }
}

/// Attachment metadata written together with its message.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub transfer_encoding: String,
    pub part_id: String,
}

/// A message ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub account_id: i64,
    pub folder_id: i64,
    pub uid: u32,
    pub message_id: Option<String>,
    /// Message-ID as compared by the account's dedup strategy.
    pub message_id_norm: Option<String>,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub flags: MessageFlags,
    pub size: u32,
    /// Identity under the account's dedup strategy; unique per
    /// `(account_id, dedup_scope)` when present.
    pub dedup_key: Option<String>,
    pub dedup_scope: i64,
    pub attachments: Vec<NewAttachment>,
}

/// Mutations applied by [`crate::services::batch::BatchPersister::batch_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageUpdate {
    Read { id: i64, read: bool },
    Starred { id: i64, starred: bool },
    Move { id: i64, folder_id: i64 },
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mail provider family. Drives the deduplication strategy and
/// provider-specific error patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Standard,
    Gmail,
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Standard => "standard",
            ProviderKind::Gmail => "gmail",
            ProviderKind::Outlook => "outlook",
        }
    }

    /// Best-effort guess from the IMAP host name.
    pub fn detect(imap_host: &str) -> Self {
        let host = imap_host.to_ascii_lowercase();
        if host.contains("gmail") || host.contains("googlemail") {
            ProviderKind::Gmail
        } else if host.contains("outlook") || host.contains("office365") || host.contains("hotmail") {
            ProviderKind::Outlook
        } else {
            ProviderKind::Standard
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "imap" => Ok(ProviderKind::Standard),
            "gmail" | "google" => Ok(ProviderKind::Gmail),
            "outlook" | "office365" | "microsoft" => Ok(ProviderKind::Outlook),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSyncStatus {
    Pending,
    Syncing,
    Success,
    Error,
}

impl AccountSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSyncStatus::Pending => "pending",
            AccountSyncStatus::Syncing => "syncing",
            AccountSyncStatus::Success => "success",
            AccountSyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "syncing" => AccountSyncStatus::Syncing,
            "success" => AccountSyncStatus::Success,
            "error" => AccountSyncStatus::Error,
            _ => AccountSyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub email_address: String,
    pub provider: ProviderKind,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_user: String,
    #[serde(skip_serializing)]
    pub imap_pass: String,
    pub is_active: bool,
    pub sync_status: AccountSyncStatus,
    pub sync_error: Option<String>,
    pub total_count: i64,
    pub unread_count: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Account row as created by account management.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub email_address: String,
    pub provider: ProviderKind,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_user: String,
    pub imap_pass: String,
    pub is_active: bool,
}

impl NewAccount {
    pub fn new(user_id: &str, email_address: &str, provider: ProviderKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            email_address: email_address.to_string(),
            provider,
            imap_host: "localhost".to_string(),
            imap_port: 993,
            imap_user: email_address.to_string(),
            imap_pass: String::new(),
            is_active: true,
        }
    }
}

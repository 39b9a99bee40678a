// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Library core for mailsync: incremental IMAP synchronization into a local
//! SQLite store.

// --- Modules ---
pub mod config;
pub mod imap;
pub mod models;
pub mod services;
pub mod utils;

pub mod prelude {
    // Config
    pub use crate::config::Settings;

    // Protocol
    pub use crate::imap::{ImapError, MailClient, MailClientFactory, RemoteFolder, RemoteMessage};

    // Entities
    pub use crate::models::{Account, Attachment, Folder, Message, ProviderKind};

    // Services
    pub use crate::services::{
        AttachmentDownloadManager, ConnectionRegistry, DuplicateResolver, EventPublisher, MailStore, SqliteStore,
        SyncError, SyncReport, SyncService,
    };

    // Common Libs
    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
    pub use thiserror::Error;
}

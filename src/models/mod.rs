// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persisted entities of the sync engine.

pub mod account;
pub mod attachment;
pub mod email;
pub mod folder;

pub use account::{Account, AccountSyncStatus, NewAccount, ProviderKind};
pub use attachment::{Attachment, DownloadProgress, DownloadStatus};
pub use email::{Message, MessageFlags, MessageUpdate, NewAttachment, NewMessage};
pub use folder::{Folder, FolderSyncState, FolderType};

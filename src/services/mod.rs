// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod attachment_storage;
pub mod attachments;
pub mod batch;
pub mod cache;
pub mod clients;
pub mod cursor;
pub mod dedup;
pub mod error_classifier;
pub mod events;
pub mod retry;
pub mod store;
pub mod sync;

pub use attachment_storage::{AttachmentError, ContentStorage, FileSystemStorage};
pub use attachments::{AttachmentConfig, AttachmentDownloadManager, DownloadReport};
pub use batch::{BatchOutcome, BatchPersister};
pub use cache::SqliteStore;
pub use clients::{ChannelWriter, ConnectionError, ConnectionRegistry, EventWriter, ObserverConnection, RegistryConfig};
pub use cursor::{CursorConfig, FolderCursorTracker, SyncPlan, SyncStrategy};
pub use dedup::{DedupConfig, DedupStrategy, DuplicateResolver, DuplicateVerdict};
pub use error_classifier::{ClassifiedError, ErrorClassifier, ErrorKind};
pub use events::{EventPublisher, EventSink, EventType, SyncEvent, SyncProgress};
pub use retry::{RetryConfig, RetryController, RetryError};
pub use store::{FolderCommit, MailStore, StoreError};
pub use sync::{SyncConfig, SyncError, SyncReport, SyncService};

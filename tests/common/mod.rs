// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared fixtures: a scripted in-process mail server, a recording event
//! sink and a fully wired sync service over an in-memory store.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mailsync::imap::{FetchCriteria, FolderStatus, ImapError, MailClient, MailClientFactory, RemoteAttachment, RemoteFolder, RemoteMessage};
use mailsync::models::{Account, FolderType, NewAccount, ProviderKind};
use mailsync::services::events::{EventSink, EventType, SyncEvent};
use mailsync::services::{
    AttachmentConfig, AttachmentDownloadManager, ConnectionError, EventPublisher, FileSystemStorage, MailStore,
    RetryConfig, RetryController, SqliteStore, SyncConfig, SyncService,
};

pub const USER_ID: &str = "user-1";
pub const UID_VALIDITY: u32 = 1000;

struct FakeFolder {
    remote: RemoteFolder,
    uid_validity: u32,
    uid_next: u32,
    /// Reported instead of the real UIDNEXT when set, to mimic servers that
    /// omit it.
    hide_uid_next: bool,
    messages: BTreeMap<u32, RemoteMessage>,
    parts: HashMap<(u32, String), Vec<u8>>,
}

impl FakeFolder {
    fn status(&self) -> FolderStatus {
        FolderStatus {
            uid_validity: self.uid_validity,
            uid_next: if self.hide_uid_next { 0 } else { self.uid_next },
            total: self.messages.len() as u32,
            unread: self.messages.values().filter(|m| !m.parsed_flags().read).count() as u32,
        }
    }
}

/// Scripted server shared by every client the factory hands out.
#[derive(Default)]
pub struct FakeServer {
    folders: Mutex<BTreeMap<String, FakeFolder>>,
    failing_status: Mutex<HashMap<String, ImapError>>,
    refuse_connections: AtomicBool,
    fetch_delay: Mutex<Duration>,
    pub connects: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    downloads: AtomicUsize,
    peak_downloads: AtomicUsize,
    pub range_fetches: AtomicUsize,
    pub sequence_fetches: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_folder(&self, path: &str) {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let folder = FakeFolder {
            remote: RemoteFolder {
                folder_type: FolderType::parse(&name),
                name,
                path: path.to_string(),
                delimiter: Some("/".to_string()),
                selectable: true,
                subscribed: true,
            },
            uid_validity: UID_VALIDITY,
            uid_next: 1,
            hide_uid_next: false,
            messages: BTreeMap::new(),
            parts: HashMap::new(),
        };
        self.folders.lock().unwrap().insert(path.to_string(), folder);
    }

    pub fn add_message(&self, path: &str, message: RemoteMessage) {
        let mut folders = self.folders.lock().unwrap();
        let folder = folders.get_mut(path).expect("unknown folder");
        folder.uid_next = folder.uid_next.max(message.uid + 1);
        folder.messages.insert(message.uid, message);
    }

    /// Appends `message` under the next free UID and returns that UID.
    pub fn deliver(&self, path: &str, mut message: RemoteMessage) -> u32 {
        let uid = self.folders.lock().unwrap().get(path).expect("unknown folder").uid_next;
        message.uid = uid;
        self.add_message(path, message);
        uid
    }

    pub fn expunge(&self, path: &str, uid: u32) {
        if let Some(folder) = self.folders.lock().unwrap().get_mut(path) {
            folder.messages.remove(&uid);
        }
    }

    pub fn set_part(&self, path: &str, uid: u32, part_id: &str, raw: &[u8]) {
        let mut folders = self.folders.lock().unwrap();
        let folder = folders.get_mut(path).expect("unknown folder");
        folder.parts.insert((uid, part_id.to_string()), raw.to_vec());
    }

    /// New UIDVALIDITY with every message renumbered from 1.
    pub fn renumber(&self, path: &str, uid_validity: u32) {
        let mut folders = self.folders.lock().unwrap();
        let folder = folders.get_mut(path).expect("unknown folder");
        let old = std::mem::take(&mut folder.messages);
        for (index, (_, mut message)) in old.into_iter().enumerate() {
            message.uid = index as u32 + 1;
            folder.messages.insert(message.uid, message);
        }
        folder.parts.clear();
        folder.uid_validity = uid_validity;
        folder.uid_next = folder.messages.len() as u32 + 1;
    }

    pub fn hide_uid_next(&self, path: &str) {
        if let Some(folder) = self.folders.lock().unwrap().get_mut(path) {
            folder.hide_uid_next = true;
        }
    }

    pub fn fail_status(&self, path: &str, error: ImapError) {
        self.failing_status.lock().unwrap().insert(path.to_string(), error);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn peak_connections(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak_downloads(&self) -> usize {
        self.peak_downloads.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Duration {
        *self.fetch_delay.lock().unwrap()
    }

    fn with_folder<T>(&self, path: &str, f: impl FnOnce(&FakeFolder) -> T) -> Result<T, ImapError> {
        let folders = self.folders.lock().unwrap();
        folders
            .get(path)
            .map(f)
            .ok_or_else(|| ImapError::FolderNotFound(path.to_string()))
    }
}

fn bump_peak(current: &AtomicUsize, peak: &AtomicUsize) {
    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
}

pub struct FakeClient {
    server: Arc<FakeServer>,
    connected: AtomicBool,
}

#[async_trait]
impl MailClient for FakeClient {
    async fn connect(&self) -> Result<(), ImapError> {
        if self.server.refuse_connections.load(Ordering::SeqCst) {
            return Err(ImapError::Auth("invalid credentials".to_string()));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.server.connects.fetch_add(1, Ordering::SeqCst);
            bump_peak(&self.server.active, &self.server.peak_active);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ImapError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.server.active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_folders(&self) -> Result<Vec<RemoteFolder>, ImapError> {
        let folders = self.server.folders.lock().unwrap();
        Ok(folders.values().map(|f| f.remote.clone()).collect())
    }

    async fn get_folder_status(&self, path: &str) -> Result<FolderStatus, ImapError> {
        if let Some(error) = self.server.failing_status.lock().unwrap().get(path) {
            return Err(error.clone());
        }
        self.server.with_folder(path, FakeFolder::status)
    }

    async fn get_emails_in_uid_range(&self, path: &str, start: u32, end: u32) -> Result<Vec<RemoteMessage>, ImapError> {
        self.server.range_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.server.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.server
            .with_folder(path, |f| f.messages.range(start..=end).map(|(_, m)| m.clone()).collect())
    }

    async fn fetch_emails(&self, path: &str, criteria: &FetchCriteria) -> Result<Vec<RemoteMessage>, ImapError> {
        self.server.sequence_fetches.fetch_add(1, Ordering::SeqCst);
        self.server.with_folder(path, |f| {
            let skip = f.messages.len().saturating_sub(criteria.limit);
            f.messages.values().skip(skip).cloned().collect()
        })
    }

    async fn get_attachment(&self, path: &str, uid: u32, part_id: &str) -> Result<Vec<u8>, ImapError> {
        bump_peak(&self.server.downloads, &self.server.peak_downloads);
        let delay = self.server.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.server.with_folder(path, |f| f.parts.get(&(uid, part_id.to_string())).cloned());
        self.server.downloads.fetch_sub(1, Ordering::SeqCst);
        result?.ok_or_else(|| ImapError::MissingData(format!("part {} of UID {}", part_id, uid)))
    }

    async fn create_folder(&self, path: &str) -> Result<(), ImapError> {
        self.server.add_folder(path);
        Ok(())
    }

    async fn delete_folder(&self, path: &str) -> Result<(), ImapError> {
        self.server.folders.lock().unwrap().remove(path);
        Ok(())
    }

    async fn rename_folder(&self, from: &str, to: &str) -> Result<(), ImapError> {
        let mut folders = self.server.folders.lock().unwrap();
        let mut folder = folders.remove(from).ok_or_else(|| ImapError::FolderNotFound(from.to_string()))?;
        folder.remote.path = to.to_string();
        folders.insert(to.to_string(), folder);
        Ok(())
    }

    async fn move_emails(&self, path: &str, uids: &[u32], target_path: &str) -> Result<(), ImapError> {
        for uid in uids {
            let message = self.server.with_folder(path, |f| f.messages.get(uid).cloned())?;
            if let Some(message) = message {
                self.server.expunge(path, *uid);
                self.server.deliver(target_path, message);
            }
        }
        Ok(())
    }

    async fn delete_emails(&self, path: &str, uids: &[u32]) -> Result<(), ImapError> {
        for uid in uids {
            self.server.expunge(path, *uid);
        }
        Ok(())
    }
}

pub struct FakeFactory {
    server: Arc<FakeServer>,
}

impl FakeFactory {
    pub fn new(server: Arc<FakeServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl MailClientFactory for FakeFactory {
    async fn create(&self, _account: &Account) -> Result<Arc<dyn MailClient>, ImapError> {
        let client = FakeClient {
            server: self.server.clone(),
            connected: AtomicBool::new(false),
        };
        client.connect().await?;
        Ok(Arc::new(client))
    }
}

/// Sink that keeps every event it is handed.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(String, SyncEvent)>>,
}

impl Recorder {
    pub fn types(&self) -> Vec<EventType> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.event_type).collect()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<SyncEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.event_type == event_type)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for Recorder {
    async fn publish_to_user(&self, user_id: &str, event: SyncEvent) -> Result<usize, ConnectionError> {
        self.events.lock().unwrap().push((user_id.to_string(), event));
        Ok(1)
    }
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub server: Arc<FakeServer>,
    pub recorder: Arc<Recorder>,
    pub service: Arc<SyncService>,
    pub attachments: Arc<AttachmentDownloadManager>,
    pub dir: TempDir,
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: 0.0,
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::default(), AttachmentConfig::default()).await
    }

    pub async fn with_config(sync: SyncConfig, attachment_config: AttachmentConfig) -> Self {
        let recorder = Arc::new(Recorder::default());
        Self::build(sync, attachment_config, recorder.clone(), recorder).await
    }

    /// Events go to `sink` instead of the recorder.
    pub async fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self::build(SyncConfig::default(), AttachmentConfig::default(), sink, Arc::new(Recorder::default())).await
    }

    async fn build(
        sync: SyncConfig,
        attachment_config: AttachmentConfig,
        sink: Arc<dyn EventSink>,
        recorder: Arc<Recorder>,
    ) -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let server = FakeServer::new();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let clients: Arc<dyn MailClientFactory> = Arc::new(FakeFactory::new(server.clone()));
        let retry = RetryController::new(fast_retry());

        let attachments = Arc::new(AttachmentDownloadManager::new(
            store.clone(),
            Arc::new(FileSystemStorage::new(dir.path())),
            clients.clone(),
            retry.clone(),
            attachment_config,
            cancel.clone(),
        ));
        let service = Arc::new(SyncService::new(
            store.clone(),
            clients,
            attachments.clone(),
            EventPublisher::new(sink),
            retry,
            sync,
            cancel,
        ));

        Self {
            store,
            server,
            recorder,
            service,
            attachments,
            dir,
        }
    }

    pub async fn account(&self, email: &str, provider: ProviderKind) -> Account {
        self.store
            .create_account(&NewAccount::new(USER_ID, email, provider))
            .await
            .unwrap()
    }

    pub async fn folder_id(&self, account_id: i64, path: &str) -> i64 {
        self.store.find_folder(account_id, path).await.unwrap().expect("folder not stored").id
    }

    pub async fn uids(&self, account_id: i64, path: &str) -> Vec<u32> {
        let folder_id = self.folder_id(account_id, path).await;
        let mut uids = self.store.persisted_uids(folder_id).await.unwrap();
        uids.sort_unstable();
        uids
    }
}

/// A plain message with a Message-ID and a text body.
pub fn message(uid: u32, message_id: &str, subject: &str) -> RemoteMessage {
    RemoteMessage {
        uid,
        message_id: Some(format!("<{}>", message_id)),
        subject: Some(subject.to_string()),
        from: Some("alice@example.com".to_string()),
        to: vec!["bob@example.com".to_string()],
        date: Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(uid as i64)),
        body_text: Some(format!("Body of {}", subject)),
        size: 512,
        ..Default::default()
    }
}

pub fn attachment(part_id: &str, filename: &str, encoding: &str) -> RemoteAttachment {
    RemoteAttachment {
        part_id: part_id.to_string(),
        filename: filename.to_string(),
        content_type: "text/plain".to_string(),
        size: 0,
        transfer_encoding: encoding.to_string(),
        content: None,
    }
}

/// Fills `path` with `count` messages, UIDs starting at 1.
pub fn seed(server: &FakeServer, path: &str, count: u32) {
    for uid in 1..=count {
        server.add_message(path, message(uid, &format!("{}-{}@example.com", path, uid), &format!("{} #{}", path, uid)));
    }
}

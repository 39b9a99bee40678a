// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Account and folder synchronization passes.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::imap::client::{ensure_connected, MailClient, MailClientFactory};
use crate::imap::error::ImapError;
use crate::imap::types::{FetchCriteria, RemoteMessage};
use crate::models::{Account, AccountSyncStatus, Folder, Message, NewMessage};
use crate::services::attachments::AttachmentDownloadManager;
use crate::services::batch::BatchPersister;
use crate::services::cursor::{CursorConfig, FolderCursorTracker, SyncStrategy};
use crate::services::dedup::{CleanupReport, DedupConfig, DuplicateAction, DuplicateResolver};
use crate::services::events::{EventPublisher, SyncProgress};
use crate::services::retry::{RetryController, RetryError};
use crate::services::store::{DuplicateGroup, FolderCommit, MailStore, StoreError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Account {0} not found")]
    AccountNotFound(i64),
    #[error("Account {0} is inactive")]
    AccountInactive(i64),
    #[error("Folder '{folder}' not found in account {account_id}")]
    FolderNotFound { account_id: i64, folder: String },
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("IMAP error: {0}")]
    ImapError(#[from] ImapError),
    #[error("{0}")]
    RemoteError(#[from] RetryError),
    #[error("Folder discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("Sync exceeded its deadline of {0:?}")]
    Timeout(Duration),
    #[error("Sync cancelled")]
    Cancelled,
    #[error("Sync task failed: {0}")]
    TaskFailed(String),
    #[error("Failed to sync {count} folder(s): {details}")]
    PartialFailure { count: usize, details: String },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_concurrent_folders: usize,
    pub sync_timeout: Duration,
    pub interval: Duration,
    pub cursor: CursorConfig,
    pub dedup: DedupConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_folders: 3,
            sync_timeout: Duration::from_secs(1800),
            interval: Duration::from_secs(300),
            cursor: CursorConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderReport {
    pub folder_id: i64,
    pub folder: String,
    pub strategy: Option<SyncStrategy>,
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Messages that lost a uniqueness race and were merged afterwards.
    pub conflicts: usize,
    pub gap_ranges: usize,
    pub last_uid: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderFailure {
    pub folder: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub account_id: i64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub folders: Vec<FolderReport>,
    pub failures: Vec<FolderFailure>,
    pub total_count: i64,
    pub unread_count: i64,
}

impl SyncReport {
    fn new(account_id: i64) -> Self {
        Self {
            account_id,
            started_at: Utc::now(),
            duration_ms: 0,
            folders: Vec::new(),
            failures: Vec::new(),
            total_count: 0,
            unread_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn new_messages(&self) -> usize {
        self.folders.iter().map(|f| f.inserted).sum()
    }

    /// Aggregated error for the failed folders, if any.
    pub fn error(&self) -> Option<SyncError> {
        if self.failures.is_empty() {
            return None;
        }
        let details = self
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.folder, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        Some(SyncError::PartialFailure {
            count: self.failures.len(),
            details,
        })
    }
}

#[derive(Debug)]
pub struct AccountOutcome {
    pub account_id: i64,
    pub result: Result<SyncReport, SyncError>,
}

pub struct SyncService {
    store: Arc<dyn MailStore>,
    clients: Arc<dyn MailClientFactory>,
    attachments: Arc<AttachmentDownloadManager>,
    batch: BatchPersister,
    events: EventPublisher,
    tracker: FolderCursorTracker,
    retry: RetryController,
    config: SyncConfig,
    account_locks: DashMap<i64, Arc<Mutex<()>>>,
    resolvers: DashMap<i64, Arc<DuplicateResolver>>,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn MailStore>,
        clients: Arc<dyn MailClientFactory>,
        attachments: Arc<AttachmentDownloadManager>,
        events: EventPublisher,
        retry: RetryController,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            batch: BatchPersister::new(store.clone(), events.clone()),
            tracker: FolderCursorTracker::new(config.cursor.clone()),
            store,
            clients,
            attachments,
            events,
            retry,
            config,
            account_locks: DashMap::new(),
            resolvers: DashMap::new(),
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels running passes and the background loop.
    pub fn shutdown(&self) {
        info!("Shutting down sync service");
        self.cancel.cancel();
    }

    pub fn batch(&self) -> &BatchPersister {
        &self.batch
    }

    pub fn attachments(&self) -> &Arc<AttachmentDownloadManager> {
        &self.attachments
    }

    /// Periodic pass over every active account until the service token is
    /// cancelled.
    pub fn start_background_sync(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(interval);
            interval.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("Background sync stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.sync_active_accounts().await {
                            Ok(outcomes) => {
                                for outcome in outcomes {
                                    if let Err(e) = outcome.result {
                                        error!("Background sync of account {} failed: {}", outcome.account_id, e);
                                    }
                                }
                            }
                            Err(e) => error!("Background sync failed: {}", e),
                        }
                    }
                }
            }
        })
    }

    pub async fn sync_all_accounts(self: &Arc<Self>, user_id: &str) -> Result<Vec<AccountOutcome>, SyncError> {
        let accounts = self.store.list_active_accounts(Some(user_id)).await?;
        Ok(self.sync_accounts(accounts).await)
    }

    /// Every active account of every user.
    pub async fn sync_active_accounts(self: &Arc<Self>) -> Result<Vec<AccountOutcome>, SyncError> {
        let accounts = self.store.list_active_accounts(None).await?;
        Ok(self.sync_accounts(accounts).await)
    }

    async fn sync_accounts(self: &Arc<Self>, accounts: Vec<Account>) -> Vec<AccountOutcome> {
        info!("Syncing {} account(s)", accounts.len());
        let results = join_all(accounts.iter().map(|a| self.sync_account(a.id))).await;
        accounts
            .iter()
            .zip(results)
            .map(|(account, result)| AccountOutcome {
                account_id: account.id,
                result,
            })
            .collect()
    }

    pub async fn sync_account(self: &Arc<Self>, account_id: i64) -> Result<SyncReport, SyncError> {
        self.spawn_pass(account_id, None).await
    }

    pub async fn sync_folder(self: &Arc<Self>, account_id: i64, folder_name: &str) -> Result<SyncReport, SyncError> {
        self.spawn_pass(account_id, Some(folder_name.to_string())).await
    }

    pub async fn find_duplicates(&self, account_id: i64) -> Result<Vec<DuplicateGroup>, SyncError> {
        let account = self.load_account(account_id).await?;
        Ok(self.resolver_for(&account).find_cross_folder_duplicates(account_id).await?)
    }

    pub async fn cleanup_duplicates(&self, account_id: i64, dry_run: bool) -> Result<CleanupReport, SyncError> {
        let account = self.load_account(account_id).await?;
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        let report = self.resolver_for(&account).cleanup_duplicates(account_id, dry_run).await?;
        if !dry_run {
            self.store.refresh_account_counters(account_id).await?;
        }
        Ok(report)
    }

    /// Runs the pass on its own task so dropping the caller's future does not
    /// abort it midway.
    async fn spawn_pass(self: &Arc<Self>, account_id: i64, folder: Option<String>) -> Result<SyncReport, SyncError> {
        let this = Arc::clone(self);
        let token = self.cancel.child_token();
        let deadline = self.config.sync_timeout;

        let handle = tokio::spawn(async move {
            let pass = Arc::clone(&this).run_pass(account_id, folder, token.clone());
            tokio::select! {
                result = time::timeout(deadline, pass) => match result {
                    Ok(result) => result,
                    Err(_) => {
                        token.cancel();
                        warn!("Sync of account {} exceeded {:?}", account_id, deadline);
                        let message = format!("Sync exceeded its deadline of {:?}", deadline);
                        this.finish_with_error(account_id, &message).await;
                        Err(SyncError::Timeout(deadline))
                    }
                },
                _ = this.cancel.cancelled() => {
                    this.finish_with_error(account_id, "Sync cancelled").await;
                    Err(SyncError::Cancelled)
                }
            }
        });

        handle.await.map_err(|e| SyncError::TaskFailed(e.to_string()))?
    }

    async fn run_pass(
        self: Arc<Self>,
        account_id: i64,
        folder_filter: Option<String>,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let account = self.load_account(account_id).await?;

        self.store
            .set_account_status(account_id, AccountSyncStatus::Syncing, None)
            .await?;
        self.events.sync_started(&account.user_id, account_id).await;
        info!("Starting sync of account {} ({})", account_id, account.email_address);

        // Once the account is marked syncing, every error path must leave a
        // terminal status behind.
        let result = Arc::clone(&self)
            .sync_marked_account(&account, folder_filter.as_deref(), &cancel, started)
            .await;
        if let Err(e) = &result {
            self.finish_with_error(account_id, &e.to_string()).await;
        }
        result
    }

    async fn sync_marked_account(
        self: Arc<Self>,
        account: &Account,
        folder_filter: Option<&str>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        let account_id = account.id;
        let mut report = SyncReport::new(account_id);
        let folders = self.resolve_folders(account, folder_filter, cancel).await?;

        let resolver = self.resolver_for(account);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_folders.max(1)));
        let mut workers = JoinSet::new();

        for folder in folders {
            let this = Arc::clone(&self);
            let account = account.clone();
            let resolver = resolver.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let name = folder.name.clone();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (name, Err(SyncError::TaskFailed(e.to_string()))),
                };
                let result = AssertUnwindSafe(this.sync_one_folder(&account, folder, resolver, cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(SyncError::TaskFailed("folder worker panicked".to_string())));
                (name, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(folder_report))) => report.folders.push(folder_report),
                Ok((name, Err(e))) => {
                    warn!("Folder {} of account {} failed: {}", name, account_id, e);
                    report.failures.push(FolderFailure { folder: name, error: e.to_string() });
                }
                Err(e) => report.failures.push(FolderFailure {
                    folder: "unknown".to_string(),
                    error: e.to_string(),
                }),
            }
        }
        report.folders.sort_by(|a, b| a.folder.cmp(&b.folder));

        let (total, unread) = self.store.refresh_account_counters(account_id).await?;
        report.total_count = total;
        report.unread_count = unread;
        report.duration_ms = started.elapsed().as_millis() as u64;

        match report.error() {
            None => {
                self.store
                    .set_account_status(account_id, AccountSyncStatus::Success, None)
                    .await?;
                self.events
                    .sync_completed(&account.user_id, account_id, report.new_messages(), report.folders.len())
                    .await;
                info!(
                    "Account {} synced: {} new message(s) across {} folder(s) in {}ms",
                    account_id,
                    report.new_messages(),
                    report.folders.len(),
                    report.duration_ms
                );
            }
            Some(e) => {
                let message = e.to_string();
                self.store
                    .set_account_status(account_id, AccountSyncStatus::Error, Some(&message))
                    .await?;
                self.events.sync_error(&account.user_id, account_id, &message).await;
                warn!("Account {} synced with errors: {}", account_id, message);
            }
        }

        Ok(report)
    }

    async fn finish_with_error(&self, account_id: i64, message: &str) {
        if let Err(e) = self
            .store
            .set_account_status(account_id, AccountSyncStatus::Error, Some(message))
            .await
        {
            warn!("Could not record sync error for account {}: {}", account_id, e);
        }
        if let Ok(Some(account)) = self.store.get_account(account_id).await {
            self.events.sync_error(&account.user_id, account_id, message).await;
        }
    }

    async fn load_account(&self, account_id: i64) -> Result<Account, SyncError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(SyncError::AccountInactive(account_id));
        }
        Ok(account)
    }

    fn account_lock(&self, account_id: i64) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn resolver_for(&self, account: &Account) -> Arc<DuplicateResolver> {
        self.resolvers
            .entry(account.id)
            .or_insert_with(|| {
                Arc::new(DuplicateResolver::for_provider(
                    self.store.clone(),
                    account.provider,
                    self.config.dedup.clone(),
                ))
            })
            .clone()
    }

    /// Selectable folders to process, discovering them on first contact.
    async fn resolve_folders(
        &self,
        account: &Account,
        filter: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Folder>, SyncError> {
        let mut folders: Vec<Folder> = self
            .store
            .list_folders(account.id)
            .await?
            .into_iter()
            .filter(|f| f.is_selectable)
            .collect();

        if folders.is_empty() {
            self.discover_folders(account, cancel).await?;
            folders = self
                .store
                .list_folders(account.id)
                .await?
                .into_iter()
                .filter(|f| f.is_selectable)
                .collect();
        }

        match filter {
            None => Ok(folders),
            Some(name) => {
                let folder = self
                    .store
                    .find_folder(account.id, name)
                    .await?
                    .filter(|f| f.is_selectable)
                    .ok_or_else(|| SyncError::FolderNotFound {
                        account_id: account.id,
                        folder: name.to_string(),
                    })?;
                Ok(vec![folder])
            }
        }
    }

    async fn discover_folders(&self, account: &Account, cancel: &CancellationToken) -> Result<(), SyncError> {
        info!("Discovering folders for account {}", account.id);
        let client = self
            .clients
            .create(account)
            .await
            .map_err(|e| SyncError::DiscoveryFailed(e.to_string()))?;
        let remote = self
            .remote(&client, "list_folders", account, cancel, |c| async move { c.list_folders().await })
            .await;
        disconnect(&client).await;

        let remote = remote.map_err(|e| SyncError::DiscoveryFailed(e.to_string()))?;
        for folder in &remote {
            self.store.upsert_folder(account.id, folder).await?;
        }
        debug!("Discovered {} folder(s) for account {}", remote.len(), account.id);
        Ok(())
    }

    async fn sync_one_folder(
        &self,
        account: &Account,
        folder: Folder,
        resolver: Arc<DuplicateResolver>,
        cancel: CancellationToken,
    ) -> Result<FolderReport, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let client = self
            .retry
            .run("connect", &cancel, Some(account.provider), || self.clients.create(account))
            .await?;
        let result = self.sync_folder_with(&client, account, &folder, &resolver, &cancel).await;
        disconnect(&client).await;
        result
    }

    async fn sync_folder_with(
        &self,
        client: &Arc<dyn MailClient>,
        account: &Account,
        folder: &Folder,
        resolver: &DuplicateResolver,
        cancel: &CancellationToken,
    ) -> Result<FolderReport, SyncError> {
        let path = folder.path.clone();
        let status = self
            .remote(client, "get_folder_status", account, cancel, |c| {
                let path = path.clone();
                async move { c.get_folder_status(&path).await }
            })
            .await?;

        let interrupted = self.store.mark_sync_started(folder.id).await?;
        if interrupted {
            info!("Previous sync of {} was interrupted, checking for gaps", folder.path);
        }

        let mut cursor = self.store.get_sync_state(folder.id).await?;
        let strategy = self.tracker.decide(folder, &cursor, &status);
        let persisted = match strategy {
            SyncStrategy::Full { uid_validity } => {
                let removed = self.store.reset_folder(folder.id, uid_validity).await?;
                self.attachments.delete_content(&removed).await;
                resolver.clear_cache().await;
                cursor = self.store.get_sync_state(folder.id).await?;
                Vec::new()
            }
            _ => self.store.persisted_uids(folder.id).await?,
        };

        let plan = self.tracker.plan(strategy, &cursor, &status, interrupted, &persisted);
        let mut report = FolderReport {
            folder_id: folder.id,
            folder: folder.name.clone(),
            strategy: Some(strategy),
            gap_ranges: plan.gaps.len(),
            ..Default::default()
        };

        if let Some(limit) = plan.sequence_limit {
            let criteria = FetchCriteria { limit, include_body: true };
            let messages = self
                .remote(client, "fetch_emails", account, cancel, |c| {
                    let path = path.clone();
                    async move { c.fetch_emails(&path, &criteria).await }
                })
                .await?;
            let commit = FolderCommit {
                folder_id: folder.id,
                status,
                cursor_uid: messages.iter().map(|m| m.uid).max(),
            };
            self.persist_window(account, folder, resolver, messages, commit, &mut report)
                .await?;
        } else if plan.windows.is_empty() {
            self.store
                .apply_folder_commit(&FolderCommit {
                    folder_id: folder.id,
                    status,
                    cursor_uid: None,
                })
                .await?;
        }

        let planned = plan.planned_uids() as u64;
        let mut processed = 0u64;
        for window in &plan.windows {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let (start, end) = (window.range.start, window.range.end);
            let mut messages = self
                .remote(client, "get_emails_in_uid_range", account, cancel, |c| {
                    let path = path.clone();
                    async move { c.get_emails_in_uid_range(&path, start, end).await }
                })
                .await?;
            messages.retain(|m| m.uid >= start && m.uid <= end);

            let commit = FolderCommit {
                folder_id: folder.id,
                status,
                cursor_uid: window.cursor_target(),
            };
            self.persist_window(account, folder, resolver, messages, commit, &mut report)
                .await?;

            processed += window.range.len() as u64;
            self.events
                .sync_progress(&account.user_id, SyncProgress::new(account.id, &folder.name, processed, planned))
                .await;
        }

        self.store.mark_sync_finished(folder.id).await?;
        report.last_uid = self.store.get_sync_state(folder.id).await?.last_uid;
        debug!(
            "Folder {} done: fetched {}, inserted {}, duplicates {}",
            folder.path, report.fetched, report.inserted, report.duplicates
        );
        Ok(report)
    }

    /// Dedups, persists and commits one fetched window.
    async fn persist_window(
        &self,
        account: &Account,
        folder: &Folder,
        resolver: &DuplicateResolver,
        messages: Vec<RemoteMessage>,
        commit: FolderCommit,
        report: &mut FolderReport,
    ) -> Result<(), SyncError> {
        report.fetched += messages.len();
        let prepared: Vec<_> = messages
            .iter()
            .map(|m| resolver.prepare(m, account.id, folder.id))
            .collect();
        let verdicts = resolver.check_batch(&prepared, account.id, folder.id).await?;

        let mut fresh = Vec::with_capacity(prepared.len());
        for (message, verdict) in prepared.into_iter().zip(verdicts) {
            if !verdict.is_duplicate {
                fresh.push(message);
                continue;
            }
            report.duplicates += 1;
            if let Some(existing) = &verdict.matched {
                apply_duplicate(resolver, existing, &message, folder.id, verdict.action).await?;
            }
        }

        let outcome = self.batch.insert_batch(&account.user_id, fresh, Some(commit)).await?;
        report.inserted += outcome.inserted.len();

        for conflict in &outcome.skipped {
            report.conflicts += 1;
            let verdict = resolver.recheck(conflict, account.id, folder.id).await?;
            match (&verdict.matched, verdict.action) {
                (Some(existing), action) if action != DuplicateAction::Create => {
                    apply_duplicate(resolver, existing, conflict, folder.id, action).await?;
                }
                _ => warn!(
                    "UID {} in {} conflicted but no stored match was found",
                    conflict.uid, folder.path
                ),
            }
        }

        let by_uid: HashMap<u32, &RemoteMessage> = messages.iter().map(|m| (m.uid, m)).collect();
        for inserted in &outcome.inserted {
            let Some(remote) = by_uid.get(&inserted.uid) else { continue };
            if remote.attachments.iter().all(|a| a.content.is_none()) {
                continue;
            }
            let stored = self.store.list_attachments(inserted.id).await?;
            for part in &remote.attachments {
                let (Some(content), Some(row)) = (&part.content, stored.iter().find(|a| a.part_id == part.part_id))
                else {
                    continue;
                };
                if let Err(e) = self.attachments.store_inline(row, content).await {
                    warn!("Could not store inline attachment {} of message {}: {}", row.id, inserted.id, e);
                }
            }
        }
        Ok(())
    }

    /// Wraps a remote call with retries, reconnecting first when needed.
    async fn remote<T, F, Fut>(
        &self,
        client: &Arc<dyn MailClient>,
        operation: &str,
        account: &Account,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, SyncError>
    where
        F: Fn(Arc<dyn MailClient>) -> Fut,
        Fut: Future<Output = Result<T, ImapError>>,
    {
        let op = &op;
        self.retry
            .run(operation, cancel, Some(account.provider), || {
                let client = client.clone();
                async move {
                    ensure_connected(client.as_ref()).await?;
                    op(client).await
                }
            })
            .await
            .map_err(|e| if e.is_cancelled() { SyncError::Cancelled } else { SyncError::from(e) })
    }
}

/// Applies a duplicate action. A uniqueness conflict while repointing means
/// another row already holds the slot, which leaves the stored state valid.
async fn apply_duplicate(
    resolver: &DuplicateResolver,
    existing: &Message,
    incoming: &NewMessage,
    folder_id: i64,
    action: DuplicateAction,
) -> Result<(), SyncError> {
    match resolver.handle_duplicate(existing, incoming, folder_id, action).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => {
            debug!("Skipping {:?} of message {}: {}", action, existing.id, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn disconnect(client: &Arc<dyn MailClient>) {
    if let Err(e) = client.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Duplicate detection and resolution for incoming messages.
//!
//! All strategies share the UID-slot match and the content-similarity
//! fallback. They differ in how Message-IDs are compared:
//!
//! * `Standard`: exact Message-ID within the account.
//! * `LabelBased`: a Message-ID seen under another folder is a separate
//!   label copy, not a duplicate.
//! * `NormalizedId`: Message-IDs are normalized first, thread keys are used
//!   as a secondary correlation, and matches are merged.
//!
//! The similarity fallback (subject, sender, date within a day) is
//! approximate and may yield false positives for mail lacking a Message-ID.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::imap::types::RemoteMessage;
use crate::models::{Message, NewAttachment, NewMessage, ProviderKind};
use crate::services::store::{DuplicateGroup, MailStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    Standard,
    LabelBased,
    NormalizedId,
}

impl DedupStrategy {
    pub fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::Gmail => DedupStrategy::LabelBased,
            ProviderKind::Outlook => DedupStrategy::NormalizedId,
            ProviderKind::Standard => DedupStrategy::Standard,
        }
    }

    /// Key used to compare Message-IDs. Only `NormalizedId` strips the
    /// delimiters and case-folds; the others compare the trimmed header.
    pub fn message_key(&self, message_id: &str) -> Option<String> {
        match self {
            DedupStrategy::NormalizedId => normalize_message_id(message_id),
            _ => {
                let trimmed = message_id.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }

    /// Scope of the persisted uniqueness constraint: the whole account, or
    /// one folder for label-based stores.
    pub fn dedup_scope(&self, folder_id: i64) -> i64 {
        match self {
            DedupStrategy::LabelBased => folder_id,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    None,
    MessageId,
    Uid,
    Thread,
    Content,
    InBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    Create,
    Skip,
    Update,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub matched: Option<Message>,
    pub conflict: ConflictKind,
    pub action: DuplicateAction,
    pub reason: String,
}

impl DuplicateVerdict {
    pub fn create() -> Self {
        Self {
            is_duplicate: false,
            matched: None,
            conflict: ConflictKind::None,
            action: DuplicateAction::Create,
            reason: "no existing message matched".to_string(),
        }
    }

    fn duplicate(matched: Option<Message>, conflict: ConflictKind, action: DuplicateAction, reason: String) -> Self {
        Self {
            is_duplicate: true,
            matched,
            conflict,
            action,
            reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub cache_ttl: Duration,
    pub similarity_window: ChronoDuration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            similarity_window: ChronoDuration::days(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub groups: usize,
    pub kept: Vec<i64>,
    pub removed: Vec<i64>,
}

/// Strip whitespace and angle brackets, then case-fold.
pub fn normalize_message_id(message_id: &str) -> Option<String> {
    let normalized: String = message_id
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
        .collect::<String>()
        .to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

fn normalize_subject(subject: &str) -> String {
    subject.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

struct VerdictCache {
    entries: HashMap<String, DuplicateVerdict>,
    created_at: Instant,
}

#[derive(Default)]
struct Candidates {
    by_id: HashMap<String, Vec<Message>>,
    by_uid: HashMap<u32, Message>,
}

pub struct DuplicateResolver {
    store: Arc<dyn MailStore>,
    strategy: DedupStrategy,
    config: DedupConfig,
    cache: RwLock<VerdictCache>,
}

impl DuplicateResolver {
    pub fn new(store: Arc<dyn MailStore>, strategy: DedupStrategy, config: DedupConfig) -> Self {
        Self {
            store,
            strategy,
            config,
            cache: RwLock::new(VerdictCache {
                entries: HashMap::new(),
                created_at: Instant::now(),
            }),
        }
    }

    pub fn for_provider(store: Arc<dyn MailStore>, provider: ProviderKind, config: DedupConfig) -> Self {
        Self::new(store, DedupStrategy::for_provider(provider), config)
    }

    pub fn strategy(&self) -> DedupStrategy {
        self.strategy
    }

    /// Converts a fetched message into an insertable row for this strategy.
    pub fn prepare(&self, remote: &RemoteMessage, account_id: i64, folder_id: i64) -> NewMessage {
        let message_id_norm = remote.message_id.as_deref().and_then(|id| self.strategy.message_key(id));
        NewMessage {
            account_id,
            folder_id,
            uid: remote.uid,
            message_id: remote.message_id.clone(),
            dedup_key: message_id_norm.clone(),
            message_id_norm,
            thread_id: remote.thread_key(),
            subject: remote.subject.clone(),
            from_address: remote.from.clone(),
            to_addresses: remote.to.clone(),
            date: remote.date,
            body_text: remote.body_text.clone(),
            body_html: remote.body_html.clone(),
            flags: remote.parsed_flags(),
            size: remote.size,
            dedup_scope: self.strategy.dedup_scope(folder_id),
            attachments: remote
                .attachments
                .iter()
                .map(|a| NewAttachment {
                    filename: a.filename.clone(),
                    content_type: a.content_type.clone(),
                    size: a.size,
                    transfer_encoding: a.transfer_encoding.clone(),
                    part_id: a.part_id.clone(),
                })
                .collect(),
        }
    }

    pub async fn check_duplicate(
        &self,
        message: &NewMessage,
        account_id: i64,
        folder_id: i64,
    ) -> Result<DuplicateVerdict, StoreError> {
        let key = cache_key(account_id, folder_id, message);
        if let Some(verdict) = self.cached(&key).await {
            return Ok(verdict);
        }

        let candidates = self.load_candidates(account_id, folder_id, std::slice::from_ref(message)).await?;
        let verdict = self.evaluate(message, account_id, folder_id, &candidates).await?;
        self.remember(key, &verdict).await;
        Ok(verdict)
    }

    /// Same as [`check_duplicate`](Self::check_duplicate) but ignores the
    /// verdict cache. Used after a persistence conflict.
    pub async fn recheck(&self, message: &NewMessage, account_id: i64, folder_id: i64) -> Result<DuplicateVerdict, StoreError> {
        let candidates = self.load_candidates(account_id, folder_id, std::slice::from_ref(message)).await?;
        self.evaluate(message, account_id, folder_id, &candidates).await
    }

    /// Verdicts for a whole batch, with candidates preloaded in one query per
    /// key kind. Later messages repeating an earlier one's Message-ID or UID
    /// are reported as in-batch duplicates.
    pub async fn check_batch(
        &self,
        messages: &[NewMessage],
        account_id: i64,
        folder_id: i64,
    ) -> Result<Vec<DuplicateVerdict>, StoreError> {
        self.expire_cache_if_stale().await;
        let candidates = self.load_candidates(account_id, folder_id, messages).await?;

        let mut seen_ids: HashMap<String, u32> = HashMap::new();
        let mut seen_uids: HashMap<u32, ()> = HashMap::new();
        let mut verdicts = Vec::with_capacity(messages.len());

        for message in messages {
            if seen_uids.insert(message.uid, ()).is_some() {
                verdicts.push(DuplicateVerdict::duplicate(
                    None,
                    ConflictKind::InBatch,
                    DuplicateAction::Skip,
                    format!("UID {} repeated within batch", message.uid),
                ));
                continue;
            }
            if let Some(norm) = &message.message_id_norm {
                if let Some(first_uid) = seen_ids.get(norm) {
                    verdicts.push(DuplicateVerdict::duplicate(
                        None,
                        ConflictKind::InBatch,
                        DuplicateAction::Skip,
                        format!("Message-ID already present in batch at UID {}", first_uid),
                    ));
                    continue;
                }
                seen_ids.insert(norm.clone(), message.uid);
            }

            let key = cache_key(account_id, folder_id, message);
            if let Some(verdict) = self.cached(&key).await {
                verdicts.push(verdict);
                continue;
            }
            let verdict = self.evaluate(message, account_id, folder_id, &candidates).await?;
            self.remember(key, &verdict).await;
            verdicts.push(verdict);
        }

        Ok(verdicts)
    }

    /// Applies a duplicate verdict's action to the existing row.
    pub async fn handle_duplicate(
        &self,
        existing: &Message,
        incoming: &NewMessage,
        folder_id: i64,
        action: DuplicateAction,
    ) -> Result<(), StoreError> {
        match action {
            DuplicateAction::Create | DuplicateAction::Skip => Ok(()),
            DuplicateAction::Update => {
                if existing.folder_id != Some(folder_id) || existing.uid != incoming.uid {
                    debug!(
                        "Repointing message {} to folder {} UID {}",
                        existing.id, folder_id, incoming.uid
                    );
                    self.store.relocate_message(existing.id, folder_id, incoming.uid).await?;
                }
                if existing.flags != incoming.flags {
                    self.store.update_flags(existing.id, incoming.flags).await?;
                }
                Ok(())
            }
            DuplicateAction::Merge => {
                if existing.folder_id != Some(folder_id) || existing.uid != incoming.uid {
                    self.store.relocate_message(existing.id, folder_id, incoming.uid).await?;
                }
                let merged = existing.flags.merged(incoming.flags);
                if merged != existing.flags {
                    self.store.update_flags(existing.id, merged).await?;
                }
                if !existing.has_body() && (incoming.body_text.is_some() || incoming.body_html.is_some()) {
                    self.store
                        .fill_missing_body(existing.id, incoming.body_text.as_deref(), incoming.body_html.as_deref())
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Message-IDs stored more than once in the account. Label copies are
    /// legitimate under the label-based strategy, so nothing is reported.
    pub async fn find_cross_folder_duplicates(&self, account_id: i64) -> Result<Vec<DuplicateGroup>, StoreError> {
        if self.strategy == DedupStrategy::LabelBased {
            return Ok(Vec::new());
        }
        self.store.find_duplicate_groups(account_id).await
    }

    /// Keeps the earliest-created row of every duplicate group, copies over
    /// any body it lacks, repoints attachments and deletes the rest.
    pub async fn cleanup_duplicates(&self, account_id: i64, dry_run: bool) -> Result<CleanupReport, StoreError> {
        let groups = self.find_cross_folder_duplicates(account_id).await?;
        let mut report = CleanupReport {
            dry_run,
            groups: groups.len(),
            ..Default::default()
        };

        for group in groups {
            let Some((&canonical_id, duplicates)) = group.ids.split_first() else { continue };
            report.kept.push(canonical_id);
            report.removed.extend_from_slice(duplicates);
            if dry_run {
                continue;
            }

            let Some(canonical) = self.store.get_message(canonical_id).await? else { continue };
            let mut has_text = canonical.body_text.is_some();
            let mut has_html = canonical.body_html.is_some();
            for duplicate_id in duplicates {
                if has_text && has_html {
                    break;
                }
                if let Some(duplicate) = self.store.get_message(*duplicate_id).await? {
                    let text = if has_text { None } else { duplicate.body_text.as_deref() };
                    let html = if has_html { None } else { duplicate.body_html.as_deref() };
                    if text.is_some() || html.is_some() {
                        self.store.fill_missing_body(canonical_id, text, html).await?;
                        has_text |= text.is_some();
                        has_html |= html.is_some();
                    }
                }
            }

            self.store.reassign_attachments(duplicates, canonical_id).await?;
            self.store.delete_messages(duplicates).await?;
            debug!("Collapsed {} duplicate(s) of {} into {}", duplicates.len(), group.message_id, canonical_id);
        }

        if !dry_run && !report.removed.is_empty() {
            self.clear_cache().await;
        }
        info!(
            "Duplicate cleanup for account {}: {} group(s), {} row(s) {}",
            account_id,
            report.groups,
            report.removed.len(),
            if dry_run { "would be removed" } else { "removed" }
        );
        Ok(report)
    }

    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        cache.entries.clear();
        cache.created_at = Instant::now();
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    async fn expire_cache_if_stale(&self) {
        let stale = self.cache.read().await.created_at.elapsed() > self.config.cache_ttl;
        if stale {
            debug!("Verdict cache expired, clearing");
            self.clear_cache().await;
        }
    }

    async fn cached(&self, key: &str) -> Option<DuplicateVerdict> {
        let cache = self.cache.read().await;
        if cache.created_at.elapsed() > self.config.cache_ttl {
            return None;
        }
        cache.entries.get(key).cloned()
    }

    /// Only duplicate verdicts are cached: a `Create` verdict goes stale as
    /// soon as the message is inserted.
    async fn remember(&self, key: String, verdict: &DuplicateVerdict) {
        if !verdict.is_duplicate {
            return;
        }
        self.expire_cache_if_stale().await;
        self.cache.write().await.entries.insert(key, verdict.clone());
    }

    async fn load_candidates(
        &self,
        account_id: i64,
        folder_id: i64,
        messages: &[NewMessage],
    ) -> Result<Candidates, StoreError> {
        let mut ids: Vec<String> = messages.iter().filter_map(|m| m.message_id_norm.clone()).collect();
        ids.sort();
        ids.dedup();
        let uids: Vec<u32> = messages.iter().map(|m| m.uid).collect();

        let mut candidates = Candidates::default();
        for message in self.store.find_by_message_ids(account_id, &ids).await? {
            let Some(norm) = message.message_id.as_deref().and_then(|id| self.strategy.message_key(id)) else { continue };
            candidates.by_id.entry(norm).or_default().push(message);
        }
        for message in self.store.find_by_uids(folder_id, &uids).await? {
            candidates.by_uid.insert(message.uid, message);
        }
        Ok(candidates)
    }

    async fn evaluate(
        &self,
        message: &NewMessage,
        account_id: i64,
        folder_id: i64,
        candidates: &Candidates,
    ) -> Result<DuplicateVerdict, StoreError> {
        let id_matches: &[Message] = message
            .message_id_norm
            .as_ref()
            .and_then(|norm| candidates.by_id.get(norm))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        match self.strategy {
            DedupStrategy::Standard => {
                if let Some(existing) = prefer_folder(id_matches, folder_id) {
                    return Ok(self.id_match_verdict(existing, folder_id, DuplicateAction::Update));
                }
            }
            DedupStrategy::LabelBased => {
                if let Some(existing) = candidates.by_uid.get(&message.uid) {
                    return Ok(uid_verdict(existing));
                }
                if let Some(existing) = id_matches.iter().find(|m| m.folder_id == Some(folder_id)) {
                    return Ok(DuplicateVerdict::duplicate(
                        Some(existing.clone()),
                        ConflictKind::MessageId,
                        DuplicateAction::Skip,
                        "Message-ID already stored under this label".to_string(),
                    ));
                }
                // Same Message-ID under another label is a legitimate copy
                return Ok(DuplicateVerdict::create());
            }
            DedupStrategy::NormalizedId => {
                if let Some(existing) = prefer_folder(id_matches, folder_id) {
                    return Ok(self.id_match_verdict(existing, folder_id, DuplicateAction::Merge));
                }
                if let Some(existing) = self.thread_match(message, account_id).await? {
                    return Ok(DuplicateVerdict::duplicate(
                        Some(existing),
                        ConflictKind::Thread,
                        DuplicateAction::Merge,
                        "thread key and subject match an existing message".to_string(),
                    ));
                }
            }
        }

        if let Some(existing) = candidates.by_uid.get(&message.uid) {
            return Ok(uid_verdict(existing));
        }

        if message.message_id_norm.is_none() {
            if let Some(existing) = self.similar_match(message, account_id, folder_id).await? {
                let same_folder = existing.folder_id == Some(folder_id);
                return Ok(DuplicateVerdict::duplicate(
                    Some(existing),
                    ConflictKind::Content,
                    if same_folder { DuplicateAction::Skip } else { DuplicateAction::Update },
                    "subject, sender and date match an existing message".to_string(),
                ));
            }
        }

        Ok(DuplicateVerdict::create())
    }

    fn id_match_verdict(&self, existing: &Message, folder_id: i64, moved_action: DuplicateAction) -> DuplicateVerdict {
        if existing.folder_id == Some(folder_id) && moved_action != DuplicateAction::Merge {
            return DuplicateVerdict::duplicate(
                Some(existing.clone()),
                ConflictKind::MessageId,
                DuplicateAction::Skip,
                "Message-ID already stored in this folder".to_string(),
            );
        }
        let reason = match existing.folder_id {
            Some(other) if other != folder_id => format!("Message-ID already stored in folder {}", other),
            Some(_) => "Message-ID already stored in this folder".to_string(),
            None => "Message-ID stored without a folder".to_string(),
        };
        DuplicateVerdict::duplicate(Some(existing.clone()), ConflictKind::MessageId, moved_action, reason)
    }

    async fn thread_match(&self, message: &NewMessage, account_id: i64) -> Result<Option<Message>, StoreError> {
        let (Some(thread_key), Some(subject)) = (message.thread_id.as_deref(), message.subject.as_deref()) else {
            return Ok(None);
        };
        let subject = normalize_subject(subject);
        let sender = message.from_address.as_deref().map(str::to_lowercase);

        let found = self
            .store
            .find_by_thread(account_id, thread_key)
            .await?
            .into_iter()
            .find(|candidate| {
                candidate.subject.as_deref().map(normalize_subject).as_deref() == Some(subject.as_str())
                    && candidate.from_address.as_deref().map(str::to_lowercase) == sender
            });
        Ok(found)
    }

    async fn similar_match(
        &self,
        message: &NewMessage,
        account_id: i64,
        folder_id: i64,
    ) -> Result<Option<Message>, StoreError> {
        let (Some(subject), Some(from), Some(date)) =
            (message.subject.as_deref(), message.from_address.as_deref(), message.date)
        else {
            return Ok(None);
        };
        let subject = normalize_subject(subject);
        let window = self.config.similarity_window;

        let candidates: Vec<Message> = self
            .store
            .find_similar(account_id, from, date - window, date + window)
            .await?
            .into_iter()
            .filter(|m| m.subject.as_deref().map(normalize_subject).as_deref() == Some(subject.as_str()))
            .collect();

        if candidates.len() > 1 {
            warn!(
                "Similarity fallback matched {} messages for UID {}, using the closest folder",
                candidates.len(),
                message.uid
            );
        }
        Ok(prefer_folder(&candidates, folder_id).cloned())
    }
}

fn uid_verdict(existing: &Message) -> DuplicateVerdict {
    DuplicateVerdict::duplicate(
        Some(existing.clone()),
        ConflictKind::Uid,
        DuplicateAction::Update,
        format!("UID {} already stored in this folder", existing.uid),
    )
}

fn prefer_folder(matches: &[Message], folder_id: i64) -> Option<&Message> {
    matches
        .iter()
        .find(|m| m.folder_id == Some(folder_id))
        .or_else(|| matches.first())
}

fn cache_key(account_id: i64, folder_id: i64, message: &NewMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}",
            account_id,
            folder_id,
            message.message_id.as_deref().unwrap_or(""),
            message.uid
        )
        .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::models::{MessageUpdate, NewMessage};
use crate::services::events::EventPublisher;
use crate::services::store::{FolderCommit, MailStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedMessage {
    pub id: i64,
    pub uid: u32,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub inserted: Vec<InsertedMessage>,
    /// Messages rejected by a uniqueness constraint, to be re-checked.
    pub skipped: Vec<NewMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum UpdateGroup {
    Read(bool),
    Starred(bool),
    Move(i64),
}

pub struct BatchPersister {
    store: Arc<dyn MailStore>,
    events: EventPublisher,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn MailStore>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    /// Persists a window of messages together with its folder commit.
    ///
    /// On a uniqueness conflict the transaction is rolled back and every
    /// message is retried on its own; the commit is then applied separately.
    pub async fn insert_batch(
        &self,
        user_id: &str,
        messages: Vec<NewMessage>,
        commit: Option<FolderCommit>,
    ) -> Result<BatchOutcome, StoreError> {
        let mut outcome = BatchOutcome::default();

        if messages.is_empty() {
            if let Some(commit) = &commit {
                self.store.apply_folder_commit(commit).await?;
            }
            return Ok(outcome);
        }

        match self.store.insert_batch(&messages, commit.as_ref()).await {
            Ok(ids) => {
                outcome.inserted = ids
                    .into_iter()
                    .zip(messages.iter())
                    .map(|(id, m)| InsertedMessage { id, uid: m.uid })
                    .collect();
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    "Batch of {} message(s) hit a uniqueness conflict ({}), inserting one by one",
                    messages.len(),
                    e
                );
                for message in &messages {
                    match self.store.insert_message(message).await {
                        Ok(id) => outcome.inserted.push(InsertedMessage { id, uid: message.uid }),
                        Err(e) if e.is_conflict() => {
                            debug!("UID {} conflicts with a stored message", message.uid);
                            outcome.skipped.push(message.clone());
                        }
                        Err(e) => return Err(e),
                    }
                }
                if let Some(commit) = &commit {
                    self.store.apply_folder_commit(commit).await?;
                }
            }
            Err(e) => return Err(e),
        }

        for inserted in &outcome.inserted {
            if let Some(message) = messages.iter().find(|m| m.uid == inserted.uid) {
                self.events
                    .new_email(user_id, message.account_id, message.folder_id, inserted.id, message.subject.as_deref())
                    .await;
            }
        }

        Ok(outcome)
    }

    /// Applies flag and folder mutations with one statement per distinct
    /// (kind, value) pair.
    pub async fn batch_update(&self, user_id: &str, updates: &[MessageUpdate]) -> Result<u64, StoreError> {
        let mut groups: BTreeMap<UpdateGroup, Vec<i64>> = BTreeMap::new();
        for update in updates {
            let (group, id) = match *update {
                MessageUpdate::Read { id, read } => (UpdateGroup::Read(read), id),
                MessageUpdate::Starred { id, starred } => (UpdateGroup::Starred(starred), id),
                MessageUpdate::Move { id, folder_id } => (UpdateGroup::Move(folder_id), id),
            };
            groups.entry(group).or_default().push(id);
        }

        let mut affected = 0;
        for (group, ids) in groups {
            match group {
                UpdateGroup::Read(read) => {
                    affected += self.store.set_read(&ids, read).await?;
                    self.events.email_read(user_id, &ids, read).await;
                }
                UpdateGroup::Starred(starred) => {
                    affected += self.store.set_starred(&ids, starred).await?;
                    self.events.email_starred(user_id, &ids, starred).await;
                }
                UpdateGroup::Move(folder_id) => {
                    affected += self.store.move_messages(&ids, folder_id).await?;
                }
            }
        }
        Ok(affected)
    }

    pub async fn batch_delete(&self, user_id: &str, message_ids: &[i64]) -> Result<u64, StoreError> {
        let deleted = self.store.delete_messages(message_ids).await?;
        if deleted > 0 {
            self.events.email_deleted(user_id, message_ids).await;
        }
        Ok(deleted)
    }
}

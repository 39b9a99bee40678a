// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Incremental sync of healthy folders: discovery, cursor movement and
//! repeated passes.

#[cfg(test)]
mod sync_flow_tests {
    use std::sync::atomic::Ordering;

    use mailsync::models::{AccountSyncStatus, ProviderKind};
    use mailsync::services::cursor::CursorConfig;
    use mailsync::services::events::{EventType, SyncProgress};
    use mailsync::services::{AttachmentConfig, MailStore, SyncConfig, SyncError, SyncStrategy};

    use crate::common::{message, seed, Harness};

    #[tokio::test]
    async fn test_initial_sync_discovers_folders_and_stores_every_message() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_folder("Sent");
        seed(&h.server, "INBOX", 5);
        seed(&h.server, "Sent", 2);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(report.is_success(), "unexpected failures: {:?}", report.failures);
        assert_eq!(report.new_messages(), 7);
        assert_eq!(report.folders.len(), 2);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1, 2, 3, 4, 5]);
        assert_eq!(h.uids(account.id, "Sent").await, vec![1, 2]);

        let inbox = h.folder_id(account.id, "INBOX").await;
        let state = h.store.get_sync_state(inbox).await.unwrap();
        assert_eq!(state.last_uid, 5);
        assert!(!state.in_progress);

        let folder = h.store.get_folder(inbox).await.unwrap().unwrap();
        assert_eq!(folder.uid_validity, crate::common::UID_VALIDITY);
        assert_eq!(folder.uid_next, 6);

        let stored = h.store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, AccountSyncStatus::Success);
        assert_eq!(stored.total_count, 7);
        assert_eq!(stored.unread_count, 7);
        assert!(stored.last_sync_at.is_some());

        let types = h.recorder.types();
        assert_eq!(types.first(), Some(&EventType::SyncStarted));
        assert_eq!(types.last(), Some(&EventType::SyncCompleted));
        assert_eq!(h.recorder.of_type(EventType::NewEmail).len(), 7);
        assert_eq!(h.server.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_second_pass_without_changes_is_a_no_op() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 4);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        h.service.sync_account(account.id).await.unwrap();
        let fetches = h.server.range_fetches.load(Ordering::SeqCst);
        h.recorder.clear();

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.new_messages(), 0);
        assert_eq!(report.folders[0].strategy, Some(SyncStrategy::UpToDate));
        assert_eq!(h.server.range_fetches.load(Ordering::SeqCst), fetches);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1, 2, 3, 4]);
        assert!(h.recorder.of_type(EventType::NewEmail).is_empty());
    }

    #[tokio::test]
    async fn test_new_mail_is_fetched_from_the_cursor() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 3);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        h.service.sync_account(account.id).await.unwrap();

        h.server.deliver("INBOX", message(0, "late-1@example.com", "Late one"));
        h.server.deliver("INBOX", message(0, "late-2@example.com", "Late two"));
        let report = h.service.sync_account(account.id).await.unwrap();

        let folder = &report.folders[0];
        assert_eq!(folder.strategy, Some(SyncStrategy::Delta { from: 4, to: 5 }));
        assert_eq!(folder.fetched, 2);
        assert_eq!(folder.inserted, 2);
        assert_eq!(folder.last_uid, 5);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards_after_expunge() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 4);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        h.service.sync_account(account.id).await.unwrap();
        let inbox = h.folder_id(account.id, "INBOX").await;

        h.server.expunge("INBOX", 4);
        h.server.expunge("INBOX", 3);
        h.service.sync_account(account.id).await.unwrap();

        assert_eq!(h.store.get_sync_state(inbox).await.unwrap().last_uid, 4);
        assert!(!h.store.advance_cursor(inbox, 2).await.unwrap());
        assert_eq!(h.store.get_sync_state(inbox).await.unwrap().last_uid, 4);
    }

    #[tokio::test]
    async fn test_sync_folder_only_touches_that_folder() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_folder("Sent");
        seed(&h.server, "INBOX", 2);
        seed(&h.server, "Sent", 3);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_folder(account.id, "Sent").await.unwrap();

        assert_eq!(report.folders.len(), 1);
        assert_eq!(report.folders[0].folder, "Sent");
        assert_eq!(h.uids(account.id, "Sent").await, vec![1, 2, 3]);
        assert!(h.uids(account.id, "INBOX").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_folder_is_reported() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let result = h.service.sync_folder(account.id, "Nowhere").await;

        match result {
            Err(SyncError::FolderNotFound { folder, .. }) => assert_eq!(folder, "Nowhere"),
            other => panic!("expected FolderNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_is_reported_per_window() {
        let config = SyncConfig {
            cursor: CursorConfig {
                batch_size: 2,
                ..CursorConfig::default()
            },
            ..SyncConfig::default()
        };
        let h = Harness::with_config(config, AttachmentConfig::default()).await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 5);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        h.service.sync_account(account.id).await.unwrap();

        let progress: Vec<SyncProgress> = h
            .recorder
            .of_type(EventType::SyncProgress)
            .into_iter()
            .map(|e| serde_json::from_value(e.data).unwrap())
            .collect();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress.last().unwrap().processed_count, 5);
        assert_eq!(progress.last().unwrap().progress, 1.0);
        assert!(progress.iter().all(|p| (0.0..=1.0).contains(&p.progress)));
        assert!(progress.windows(2).all(|w| w[0].processed_count < w[1].processed_count));
    }

    #[tokio::test]
    async fn test_seen_flag_is_persisted() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        let mut seen = message(1, "seen@example.com", "Seen");
        seen.flags = vec!["\\Seen".to_string(), "\\Flagged".to_string()];
        h.server.add_message("INBOX", seen);
        h.server.add_message("INBOX", message(2, "unseen@example.com", "Unseen"));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert_eq!(report.total_count, 2);
        assert_eq!(report.unread_count, 1);
        let inbox = h.folder_id(account.id, "INBOX").await;
        let stored = h.store.find_by_uids(inbox, &[1]).await.unwrap();
        assert!(stored[0].flags.read);
        assert!(stored[0].flags.starred);
    }
}

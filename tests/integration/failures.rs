// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Failure isolation, error reporting and deadlines.

#[cfg(test)]
mod failure_tests {
    use std::time::Duration;

    use mailsync::imap::ImapError;
    use mailsync::models::{AccountSyncStatus, NewAccount, ProviderKind};
    use mailsync::services::events::EventType;
    use mailsync::services::{AttachmentConfig, MailStore, SyncConfig, SyncError};

    use crate::common::{seed, Harness, USER_ID};

    #[tokio::test]
    async fn test_failing_folder_does_not_stop_the_others() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_folder("Sent");
        seed(&h.server, "INBOX", 3);
        seed(&h.server, "Sent", 2);
        h.server.fail_status("Sent", ImapError::Auth("session revoked".to_string()));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.folders.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].folder, "Sent");
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1, 2, 3]);

        match report.error() {
            Some(SyncError::PartialFailure { count, details }) => {
                assert_eq!(count, 1);
                assert!(details.starts_with("Sent: "), "details: {}", details);
                assert!(details.contains("session revoked"));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }

        let stored = h.store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, AccountSyncStatus::Error);
        assert!(stored.sync_error.unwrap().contains("Failed to sync 1 folder(s)"));
        assert_eq!(h.recorder.of_type(EventType::SyncError).len(), 1);
        assert!(h.recorder.of_type(EventType::SyncCompleted).is_empty());
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried_then_reported() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server
            .fail_status("INBOX", ImapError::Connection("connection reset by peer".to_string()));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(
            report.failures[0].error.contains("after 2 attempts"),
            "error: {}",
            report.failures[0].error
        );
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_stored_messages() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 2);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        h.service.sync_account(account.id).await.unwrap();

        h.server.fail_status("INBOX", ImapError::Auth("temporarily locked".to_string()));
        assert!(!h.service.sync_account(account.id).await.unwrap().is_success());

        let status = h.store.get_account(account.id).await.unwrap().unwrap().sync_status;
        assert_eq!(status, AccountSyncStatus::Error);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_store_failure_after_folders_leaves_error_status() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 2);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        sqlx::query(
            "CREATE TRIGGER reject_counters BEFORE UPDATE OF total_count ON accounts \
             BEGIN SELECT RAISE(ABORT, 'counters unavailable'); END",
        )
        .execute(h.store.pool())
        .await
        .unwrap();

        let result = h.service.sync_account(account.id).await;

        assert!(matches!(result, Err(SyncError::StoreError(_))), "got {:?}", result);
        let stored = h.store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, AccountSyncStatus::Error);
        assert!(stored.sync_error.unwrap().contains("counters unavailable"));
        assert_eq!(h.recorder.of_type(EventType::SyncError).len(), 1);
        assert!(h.recorder.of_type(EventType::SyncCompleted).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_accounts_are_rejected() {
        let h = Harness::new().await;
        assert!(matches!(h.service.sync_account(404).await, Err(SyncError::AccountNotFound(404))));

        let mut inactive = NewAccount::new(USER_ID, "dormant@example.com", ProviderKind::Standard);
        inactive.is_active = false;
        let inactive = h.store.create_account(&inactive).await.unwrap();
        assert!(matches!(
            h.service.sync_account(inactive.id).await,
            Err(SyncError::AccountInactive(id)) if id == inactive.id
        ));
    }

    #[tokio::test]
    async fn test_discovery_failure_fails_the_pass() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.refuse_connections(true);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let result = h.service.sync_account(account.id).await;

        assert!(matches!(result, Err(SyncError::DiscoveryFailed(_))), "got {:?}", result);
        let stored = h.store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, AccountSyncStatus::Error);
        assert_eq!(h.recorder.of_type(EventType::SyncError).len(), 1);
    }

    #[tokio::test]
    async fn test_pass_exceeding_deadline_times_out() {
        let config = SyncConfig {
            sync_timeout: Duration::from_millis(50),
            ..SyncConfig::default()
        };
        let h = Harness::with_config(config, AttachmentConfig::default()).await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 2);
        h.server.set_fetch_delay(Duration::from_secs(2));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let result = h.service.sync_account(account.id).await;

        assert!(matches!(result, Err(SyncError::Timeout(_))), "got {:?}", result);
        let stored = h.store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, AccountSyncStatus::Error);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_background_sync() {
        let h = Harness::new().await;
        let handle = h.service.clone().start_background_sync(Duration::from_millis(10));
        h.service.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("background loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_all_accounts_is_scoped_to_the_user() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 2);
        let mine = h.account("alice@example.com", ProviderKind::Standard).await;
        let other = h
            .store
            .create_account(&NewAccount::new("user-2", "carol@example.com", ProviderKind::Standard))
            .await
            .unwrap();

        let outcomes = h.service.sync_all_accounts(USER_ID).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].account_id, mine.id);
        assert!(outcomes[0].result.as_ref().unwrap().is_success());
        let untouched = h.store.get_account(other.id).await.unwrap().unwrap();
        assert_eq!(untouched.sync_status, AccountSyncStatus::Pending);
        assert!(h.store.list_folders(other.id).await.unwrap().is_empty());
    }
}

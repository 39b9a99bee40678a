// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Duplicate handling across folders for each provider family.

#[cfg(test)]
mod dedup_tests {
    use mailsync::models::ProviderKind;
    use mailsync::services::dedup::{DedupStrategy, DuplicateResolver};
    use mailsync::services::{AttachmentConfig, DedupConfig, MailStore, SyncConfig};

    use crate::common::{message, Harness};

    fn sequential() -> SyncConfig {
        SyncConfig {
            max_concurrent_folders: 1,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_standard_copy_in_two_folders_is_stored_once() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_folder("Archive");
        h.server.add_message("INBOX", message(1, "shared@example.com", "Shared"));
        h.server.add_message("Archive", message(7, "shared@example.com", "Shared"));
        h.server.add_message("Archive", message(8, "own@example.com", "Own"));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(report.is_success(), "unexpected failures: {:?}", report.failures);
        assert_eq!(report.total_count, 2);
        let duplicates: usize = report.folders.iter().map(|f| f.duplicates + f.conflicts).sum();
        assert_eq!(duplicates, 1);
        assert!(h.service.find_duplicates(account.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_message_id_in_one_folder_is_skipped() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_message("INBOX", message(1, "dup@example.com", "First"));
        h.server.add_message("INBOX", message(2, "DUP@example.com", "Second"));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert_eq!(report.folders[0].inserted, 1);
        assert_eq!(report.folders[0].duplicates, 1);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1]);
        // The cursor still covers the skipped UID
        assert_eq!(report.folders[0].last_uid, 2);
    }

    #[tokio::test]
    async fn test_gmail_label_copies_are_kept() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_folder("[Gmail]/All Mail");
        h.server.add_message("INBOX", message(3, "labelled@example.com", "Labelled"));
        h.server.add_message("[Gmail]/All Mail", message(41, "labelled@example.com", "Labelled"));
        let account = h.account("alice@gmail.com", ProviderKind::Gmail).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_count, 2);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![3]);
        assert_eq!(h.uids(account.id, "[Gmail]/All Mail").await, vec![41]);
        assert!(h.service.find_duplicates(account.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outlook_copies_merge_flags() {
        let h = Harness::with_config(sequential(), AttachmentConfig::default()).await;
        h.server.add_folder("INBOX");
        h.server.add_folder("Archive");
        h.server.add_message("INBOX", message(1, "merge@example.com", "Merge me"));
        let mut read_copy = message(5, "merge@example.com", "Merge me");
        read_copy.flags = vec!["\\Seen".to_string()];
        h.server.add_message("Archive", read_copy);
        let account = h.account("alice@outlook.com", ProviderKind::Outlook).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert_eq!(report.total_count, 1);
        assert_eq!(report.unread_count, 0);
    }

    #[tokio::test]
    async fn test_outlook_thread_match_merges_reissued_message() {
        let h = Harness::with_config(sequential(), AttachmentConfig::default()).await;
        h.server.add_folder("Archive");
        h.server.add_folder("INBOX");
        let mut original = message(1, "first-id@example.com", "Quarterly  Report");
        original.thread_id = Some("T-100".to_string());
        let mut reissued = message(2, "second-id@example.com", "quarterly report");
        reissued.thread_id = Some("T-100".to_string());
        h.server.add_message("Archive", original);
        h.server.add_message("INBOX", reissued);
        let account = h.account("alice@outlook.com", ProviderKind::Outlook).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_count, 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_oldest_row_and_fills_missing_body() {
        let h = Harness::new().await;
        h.server.add_folder("INBOX");
        h.server.add_folder("Archive");
        h.server.add_message("INBOX", message(1, "twice@example.com", "Twice"));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        h.service.sync_account(account.id).await.unwrap();

        // A second copy written without a dedup key, as legacy imports did
        let archive = h.folder_id(account.id, "Archive").await;
        let resolver = DuplicateResolver::new(h.store.clone(), DedupStrategy::Standard, DedupConfig::default());
        let mut copy = message(9, "twice@example.com", "Twice");
        copy.body_text = None;
        copy.body_html = Some("<p>Twice</p>".to_string());
        let mut row = resolver.prepare(&copy, account.id, archive);
        row.dedup_key = None;
        let copy_id = h.store.insert_message(&row).await.unwrap();

        let groups = h.service.find_duplicates(account.id).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].message_id, "twice@example.com");
        let canonical_id = groups[0].ids[0];
        assert_eq!(groups[0].ids, vec![canonical_id, copy_id]);

        let preview = h.service.cleanup_duplicates(account.id, true).await.unwrap();
        assert!(preview.dry_run);
        assert_eq!(preview.removed, vec![copy_id]);
        assert!(h.store.get_message(copy_id).await.unwrap().is_some());

        let report = h.service.cleanup_duplicates(account.id, false).await.unwrap();
        assert_eq!(report.kept, vec![canonical_id]);
        assert!(h.store.get_message(copy_id).await.unwrap().is_none());

        let kept = h.store.get_message(canonical_id).await.unwrap().unwrap();
        assert_eq!(kept.body_text.as_deref(), Some("Body of Twice"));
        assert_eq!(kept.body_html.as_deref(), Some("<p>Twice</p>"));
        let account = h.store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.total_count, 1);
    }

    #[tokio::test]
    async fn test_message_without_id_matches_by_content() {
        let h = Harness::with_config(sequential(), AttachmentConfig::default()).await;
        h.server.add_folder("Archive");
        h.server.add_folder("INBOX");
        let mut first = message(1, "unused@example.com", "No identifier");
        first.message_id = None;
        let mut second = first.clone();
        second.uid = 4;
        second.date = first.date.map(|d| d + chrono::Duration::minutes(30));
        h.server.add_message("Archive", first);
        h.server.add_message("INBOX", second);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert_eq!(report.total_count, 1);
    }
}

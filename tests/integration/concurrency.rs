// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bounded parallelism for folder workers and attachment downloads.

#[cfg(test)]
mod concurrency_tests {
    use std::time::Duration;

    use mailsync::models::ProviderKind;
    use mailsync::services::{AttachmentConfig, MailStore, SyncConfig};

    use crate::common::{attachment, message, seed, Harness};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_folder_workers_respect_the_limit() {
        let config = SyncConfig {
            max_concurrent_folders: 2,
            ..SyncConfig::default()
        };
        let h = Harness::with_config(config, AttachmentConfig::default()).await;
        for index in 0..6 {
            let path = format!("Folder{}", index);
            h.server.add_folder(&path);
            seed(&h.server, &path, 2);
        }
        h.server.set_fetch_delay(Duration::from_millis(30));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let report = h.service.sync_account(account.id).await.unwrap();

        assert!(report.is_success(), "unexpected failures: {:?}", report.failures);
        assert_eq!(report.folders.len(), 6);
        assert_eq!(report.total_count, 12);
        assert!(h.server.peak_connections() <= 2, "peak {}", h.server.peak_connections());
        assert_eq!(h.server.open_connections(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_passes_on_one_account_are_serialized() {
        let config = SyncConfig {
            max_concurrent_folders: 1,
            ..SyncConfig::default()
        };
        let h = Harness::with_config(config, AttachmentConfig::default()).await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 5);
        h.server.set_fetch_delay(Duration::from_millis(20));
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let (first, second) = tokio::join!(h.service.sync_account(account.id), h.service.sync_account(account.id));

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.new_messages() + second.new_messages(), 5);
        assert_eq!(h.uids(account.id, "INBOX").await, vec![1, 2, 3, 4, 5]);
        assert!(h.server.peak_connections() <= 1, "peak {}", h.server.peak_connections());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_attachment_downloads_respect_the_limit() {
        let attachment_config = AttachmentConfig {
            max_concurrent_downloads: 2,
            ..AttachmentConfig::default()
        };
        let h = Harness::with_config(SyncConfig::default(), attachment_config).await;
        h.server.add_folder("INBOX");
        let mut report = message(1, "report@example.com", "Report");
        for part in 0..6 {
            report
                .attachments
                .push(attachment(&format!("2.{}", part), &format!("part-{}.txt", part), "7bit"));
        }
        h.server.add_message("INBOX", report);
        for part in 0..6 {
            h.server
                .set_part("INBOX", 1, &format!("2.{}", part), format!("content {}", part).as_bytes());
        }
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        h.service.sync_account(account.id).await.unwrap();
        let inbox = h.folder_id(account.id, "INBOX").await;
        let stored = h.store.find_by_uids(inbox, &[1]).await.unwrap().remove(0);
        assert!(stored.has_attachments);

        h.server.set_fetch_delay(Duration::from_millis(20));
        let downloads = h.attachments.download_email_attachments(stored.id).await.unwrap();

        assert_eq!(downloads.completed.len(), 6, "failed: {:?}", downloads.failed);
        assert!(h.server.peak_downloads() <= 2, "peak {}", h.server.peak_downloads());
        assert!(h.server.peak_downloads() >= 1);
        assert_eq!(h.attachments.available_slots(), 2);
    }
}

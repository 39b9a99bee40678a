// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Event delivery to observer connections during real sync passes.

#[cfg(test)]
mod observer_tests {
    use std::sync::Arc;

    use serde_json::Value;

    use mailsync::models::{MessageUpdate, ProviderKind};
    use mailsync::services::{ChannelWriter, ConnectionRegistry, MailStore, RegistryConfig};

    use crate::common::{seed, Harness, USER_ID};

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            events.push(serde_json::from_str(&payload).unwrap());
        }
        events
    }

    fn event_types(events: &[Value]) -> Vec<String> {
        events.iter().map(|e| e["type"].as_str().unwrap().to_string()).collect()
    }

    #[tokio::test]
    async fn test_sync_events_reach_registered_observers() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let h = Harness::with_sink(registry.clone()).await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 2);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let (writer, mut rx) = ChannelWriter::new(64);
        registry.register(USER_ID, "browser-tab", Box::new(writer)).await;
        let (stranger, mut stranger_rx) = ChannelWriter::new(64);
        registry.register("user-2", "other-tab", Box::new(stranger)).await;

        h.service.sync_account(account.id).await.unwrap();

        let events = drain(&mut rx);
        let types = event_types(&events);
        assert_eq!(types.first().map(String::as_str), Some("sync_started"));
        assert_eq!(types.last().map(String::as_str), Some("sync_completed"));
        assert_eq!(types.iter().filter(|t| *t == "new_email").count(), 2);

        let progress = events.iter().find(|e| e["type"] == "sync_progress").unwrap();
        assert_eq!(progress["data"]["folderName"], "INBOX");
        assert_eq!(progress["data"]["accountId"], account.id);
        let completed = events.last().unwrap();
        assert_eq!(completed["data"]["newMessages"], 2);

        assert!(drain(&mut stranger_rx).is_empty());
    }

    #[tokio::test]
    async fn test_connection_cap_evicts_the_oldest_observer() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
            max_connections_per_user: 2,
            ..RegistryConfig::default()
        }));
        let h = Harness::with_sink(registry.clone()).await;
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let (first, mut first_rx) = ChannelWriter::new(16);
        let (second, mut second_rx) = ChannelWriter::new(16);
        let (third, mut third_rx) = ChannelWriter::new(16);
        let oldest = registry.register(USER_ID, "tab-1", Box::new(first)).await;
        registry.register(USER_ID, "tab-2", Box::new(second)).await;
        registry.register(USER_ID, "tab-3", Box::new(third)).await;

        assert_eq!(registry.connection_count(USER_ID).await, 2);
        assert!(!oldest.is_active());
        assert!(oldest.cancellation_token().is_cancelled());

        h.service.sync_account(account.id).await.unwrap();

        assert!(drain(&mut first_rx).is_empty());
        assert!(!drain(&mut second_rx).is_empty());
        assert!(!drain(&mut third_rx).is_empty());
    }

    #[tokio::test]
    async fn test_dropped_observer_is_pruned_on_publish() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let h = Harness::with_sink(registry.clone()).await;
        let account = h.account("alice@example.com", ProviderKind::Standard).await;

        let (writer, rx) = ChannelWriter::new(16);
        registry.register(USER_ID, "closed-tab", Box::new(writer)).await;
        drop(rx);

        h.service.sync_account(account.id).await.unwrap();

        assert_eq!(registry.connection_count(USER_ID).await, 0);
    }

    #[tokio::test]
    async fn test_flag_updates_are_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let h = Harness::with_sink(registry.clone()).await;
        h.server.add_folder("INBOX");
        seed(&h.server, "INBOX", 3);
        let account = h.account("alice@example.com", ProviderKind::Standard).await;
        h.service.sync_account(account.id).await.unwrap();
        let inbox = h.folder_id(account.id, "INBOX").await;
        let ids: Vec<i64> = h
            .store
            .find_by_uids(inbox, &[1, 2, 3])
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        let (writer, mut rx) = ChannelWriter::new(16);
        registry.register(USER_ID, "tab", Box::new(writer)).await;

        let updates = vec![
            MessageUpdate::Read { id: ids[0], read: true },
            MessageUpdate::Read { id: ids[1], read: true },
            MessageUpdate::Starred { id: ids[2], starred: true },
        ];
        let changed = h.service.batch().batch_update(USER_ID, &updates).await.unwrap();
        assert_eq!(changed, 3);

        let events = drain(&mut rx);
        assert_eq!(event_types(&events), vec!["email_read", "email_starred"]);
        assert_eq!(events[0]["data"]["emailIds"].as_array().unwrap().len(), 2);

        let (total, unread) = h.store.refresh_account_counters(account.id).await.unwrap();
        assert_eq!((total, unread), (3, 1));
    }
}

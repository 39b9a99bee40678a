// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

use config::{Environment, File};
use serde::{Deserialize, Serialize};

use crate::services::attachments::AttachmentConfig;
use crate::services::clients::RegistryConfig;
use crate::services::cursor::CursorConfig;
use crate::services::dedup::DedupConfig;
use crate::services::retry::RetryConfig;
use crate::services::sync::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub max_concurrent_folders: usize,
    pub sync_timeout_secs: u64,
    pub interval_secs: u64,
    pub batch_size: u32,
    pub max_gap_uids: usize,
    pub sequence_fallback_limit: usize,
    pub imap_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentSettings {
    pub storage_dir: Option<String>,
    pub max_concurrent_downloads: usize,
    pub preview_bytes: usize,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub progress_retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    pub max_connections_per_user: usize,
    pub activity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    pub cache_ttl_secs: u64,
    pub similarity_window_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub sync: SyncSettings,
    pub retry: RetrySettings,
    pub attachments: AttachmentSettings,
    pub events: EventSettings,
    pub dedup: DedupSettings,
}

impl Settings {
    /// Defaults, then the optional TOML file, then `MAILSYNC_` variables
    /// (`MAILSYNC_SYNC__BATCH_SIZE=100` overrides `sync.batch_size`).
    pub fn new(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut config_builder = config::Config::builder()
            .set_default("database.url", "sqlite:data/mailsync.db")?
            .set_default("log.level", "info")?
            // Sync defaults
            .set_default("sync.max_concurrent_folders", 3)?
            .set_default("sync.sync_timeout_secs", 1800)?
            .set_default("sync.interval_secs", 300)?
            .set_default("sync.batch_size", 50)?
            .set_default("sync.max_gap_uids", 10_000)?
            .set_default("sync.sequence_fallback_limit", 500)?
            .set_default("sync.imap_timeout_secs", 60)?
            // Retry defaults
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 1000)?
            .set_default("retry.max_delay_ms", 30_000)?
            .set_default("retry.jitter", 0.1)?
            // Attachment defaults
            .set_default("attachments.max_concurrent_downloads", 5)?
            .set_default("attachments.preview_bytes", 4096)?
            .set_default("attachments.retention_hours", 24)?
            .set_default("attachments.sweep_interval_secs", 3600)?
            .set_default("attachments.progress_retention_secs", 3600)?
            // Observer connection defaults
            .set_default("events.max_connections_per_user", 5)?
            .set_default("events.activity_timeout_secs", 300)?
            .set_default("events.sweep_interval_secs", 60)?
            // Dedup defaults
            .set_default("dedup.cache_ttl_secs", 300)?
            .set_default("dedup.similarity_window_hours", 24)?;

        if let Some(path) = config_path {
            config_builder = config_builder.add_source(File::with_name(path));
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("MAILSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );

        config_builder.build()?.try_deserialize()
    }

    pub fn attachment_dir(&self) -> PathBuf {
        match &self.attachments.storage_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join("mailsync").join("attachments"))
                .unwrap_or_else(|| PathBuf::from("data/attachments")),
        }
    }

    pub fn imap_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.imap_timeout_secs)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_concurrent_folders: self.sync.max_concurrent_folders,
            sync_timeout: Duration::from_secs(self.sync.sync_timeout_secs),
            interval: Duration::from_secs(self.sync.interval_secs),
            cursor: CursorConfig {
                batch_size: self.sync.batch_size,
                max_gap_uids: self.sync.max_gap_uids,
                sequence_fallback_limit: self.sync.sequence_fallback_limit,
            },
            dedup: self.dedup_config(),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn attachment_config(&self) -> AttachmentConfig {
        AttachmentConfig {
            max_concurrent_downloads: self.attachments.max_concurrent_downloads,
            preview_bytes: self.attachments.preview_bytes,
            retention: Duration::from_secs(self.attachments.retention_hours * 3600),
            sweep_interval: Duration::from_secs(self.attachments.sweep_interval_secs),
            progress_retention: Duration::from_secs(self.attachments.progress_retention_secs),
            ..AttachmentConfig::default()
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections_per_user: self.events.max_connections_per_user,
            activity_timeout: Duration::from_secs(self.events.activity_timeout_secs),
            sweep_interval: Duration::from_secs(self.events.sweep_interval_secs),
        }
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            cache_ttl: Duration::from_secs(self.dedup.cache_ttl_secs),
            similarity_window: chrono::Duration::hours(self.dedup.similarity_window_hours),
        }
    }
}

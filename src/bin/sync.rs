// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mail sync binary.
//!
//! Runs one sync cycle and exits, or keeps syncing on an interval with
//! `--watch`. SQLite is the only state shared between runs.
//!
//! Usage:
//!   mailsync                                     # Sync all active accounts
//!   mailsync --user <id>                         # Sync every account of one user
//!   mailsync --account <id>                      # Sync all folders of one account
//!   mailsync --account <id> --folder <name>      # Sync one folder of one account
//!   mailsync --account <id> --scan-duplicates    # Report cross-folder duplicates
//!   mailsync --account <id> --cleanup-duplicates [--dry-run]
//!   mailsync --sweep                             # Remove expired unassociated attachments
//!   mailsync --watch                             # Sync on an interval, printing events as JSON lines
//!
//! Exit codes:
//!   0 - Success
//!   1 - Error (including partially failed accounts)

use std::collections::BTreeSet;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mailsync::config::Settings;
use mailsync::imap::ImapClientFactory;
use mailsync::services::{
    AttachmentDownloadManager, ChannelWriter, ConnectionRegistry, EventPublisher, FileSystemStorage, MailStore,
    RetryController, SqliteStore, SyncService,
};

#[derive(Parser)]
#[command(name = "mailsync", about = "Incremental IMAP mailbox sync")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Overrides `database.url` from the configuration
    #[arg(long, env = "MAILSYNC_DATABASE_URL")]
    database_url: Option<String>,

    /// Sync only this account (numeric id)
    #[arg(long)]
    account: Option<i64>,

    /// Sync only this folder (requires --account)
    #[arg(long, requires = "account")]
    folder: Option<String>,

    /// Sync only the accounts of this user
    #[arg(long, conflicts_with = "account")]
    user: Option<String>,

    /// List Message-IDs stored more than once (requires --account)
    #[arg(long, requires = "account")]
    scan_duplicates: bool,

    /// Remove redundant copies of duplicated messages (requires --account)
    #[arg(long, requires = "account", conflicts_with = "scan_duplicates")]
    cleanup_duplicates: bool,

    /// Report what --cleanup-duplicates would remove without deleting
    #[arg(long, requires = "cleanup_duplicates")]
    dry_run: bool,

    /// Delete unassociated attachments past their retention and exit
    #[arg(long)]
    sweep: bool,

    /// Keep running and sync on the configured interval until interrupted.
    /// Sync events of the selected users are printed to stdout as JSON lines.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::new(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        settings.database.url = url.clone();
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(settings.log.level.as_str()));
    info!("Starting mailsync (pid: {})", std::process::id());

    let store = SqliteStore::connect(&settings.database.url).await?;
    info!("Connected to database: {}", settings.database.url);
    let store: Arc<dyn MailStore> = Arc::new(store);

    let cancel = CancellationToken::new();
    let clients = Arc::new(ImapClientFactory::new(settings.imap_timeout()));
    let retry = RetryController::new(settings.retry_config());

    let attachments = Arc::new(AttachmentDownloadManager::new(
        store.clone(),
        Arc::new(FileSystemStorage::new(settings.attachment_dir())),
        clients.clone(),
        retry.clone(),
        settings.attachment_config(),
        cancel.clone(),
    ));

    // Observers only exist in long-running mode; one-shot runs publish nowhere.
    let mut printers = Vec::new();
    let events = if cli.watch {
        let registry = Arc::new(ConnectionRegistry::new(settings.registry_config()));
        registry.clone().spawn_sweeper(cancel.clone());
        let heartbeat = settings.registry_config().activity_timeout / 2;
        for user_id in observed_users(store.as_ref(), &cli).await? {
            printers.push(attach_stdout_observer(&registry, &user_id, heartbeat, cancel.clone()).await);
        }
        EventPublisher::new(registry)
    } else {
        EventPublisher::disabled()
    };

    let service = Arc::new(SyncService::new(
        store.clone(),
        clients,
        attachments.clone(),
        events,
        retry,
        settings.sync_config(),
        cancel.clone(),
    ));

    if cli.sweep {
        let removed = attachments.sweep_unassociated().await?;
        info!("Removed {} expired attachment(s)", removed);
        return Ok(());
    }

    if let Some(account_id) = cli.account {
        if cli.scan_duplicates {
            let groups = service.find_duplicates(account_id).await?;
            for group in &groups {
                println!("{}\t{:?}", group.message_id, group.ids);
            }
            info!("Found {} duplicate group(s) in account {}", groups.len(), account_id);
            return Ok(());
        }
        if cli.cleanup_duplicates {
            let report = service.cleanup_duplicates(account_id, cli.dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
    }

    if cli.watch {
        let sweeper = attachments.clone().spawn_retention_sweeper();
        let background = service.clone().start_background_sync(settings.sync_config().interval);
        let ok = run_once(&service, &cli).await;
        if !ok {
            warn!("Initial sync finished with errors");
        }

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, shutting down");
        service.shutdown();
        let _ = background.await;
        let _ = sweeper.await;
        for printer in printers {
            let _ = printer.await;
        }
        return Ok(());
    }

    if !run_once(&service, &cli).await {
        std::process::exit(1);
    }
    info!("Sync complete, exiting");
    Ok(())
}

/// Users whose events `--watch` prints: the selected user, the owner of the
/// selected account, or every user with an active account at startup.
async fn observed_users(store: &dyn MailStore, cli: &Cli) -> Result<BTreeSet<String>, Box<dyn std::error::Error>> {
    if let Some(user_id) = &cli.user {
        return Ok(BTreeSet::from([user_id.clone()]));
    }
    if let Some(account_id) = cli.account {
        let owner = store.get_account(account_id).await?.map(|a| a.user_id);
        return Ok(owner.into_iter().collect());
    }
    let accounts = store.list_active_accounts(None).await?;
    Ok(accounts.into_iter().map(|a| a.user_id).collect())
}

/// Registers a channel observer for one user and prints what it receives.
/// The observer is touched on every heartbeat so idle periods between sync
/// passes do not get it swept.
async fn attach_stdout_observer(
    registry: &Arc<ConnectionRegistry>,
    user_id: &str,
    heartbeat: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let (writer, mut rx) = ChannelWriter::new(1024);
    let connection = registry.register(user_id, "mailsync-cli", Box::new(writer)).await;
    debug!("Printing events of user {} to stdout", user_id);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat.max(std::time::Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => println!("{}", line),
                    None => break,
                },
                _ = ticker.tick() => connection.touch(),
            }
        }
        connection.close();
    })
}

/// One sync cycle for the selection on the command line. Returns whether
/// every account synced cleanly.
async fn run_once(service: &Arc<SyncService>, cli: &Cli) -> bool {
    match (cli.account, &cli.folder) {
        (Some(account_id), Some(folder)) => report(account_id, service.sync_folder(account_id, folder).await),
        (Some(account_id), None) => report(account_id, service.sync_account(account_id).await),
        (None, _) => {
            let outcomes = match &cli.user {
                Some(user_id) => service.sync_all_accounts(user_id).await,
                None => service.sync_active_accounts().await,
            };
            match outcomes {
                Ok(outcomes) => {
                    if outcomes.is_empty() {
                        info!("No active accounts found");
                    }
                    outcomes
                        .into_iter()
                        .map(|o| report(o.account_id, o.result))
                        .fold(true, |all, ok| all && ok)
                }
                Err(e) => {
                    error!("Failed to list accounts: {}", e);
                    false
                }
            }
        }
    }
}

fn report(account_id: i64, result: Result<mailsync::services::SyncReport, mailsync::services::SyncError>) -> bool {
    match result {
        Ok(report) => match report.error() {
            None => {
                info!(
                    "Account {}: {} new message(s), {} total, {} unread",
                    account_id,
                    report.new_messages(),
                    report.total_count,
                    report.unread_count
                );
                true
            }
            Some(e) => {
                error!("Account {}: {}", account_id, e);
                false
            }
        },
        Err(e) => {
            error!("Failed to sync account {}: {}", account_id, e);
            false
        }
    }
}

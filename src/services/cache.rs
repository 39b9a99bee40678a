// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SQLite implementation of [`MailStore`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::imap::types::RemoteFolder;
use crate::models::{
    Account, AccountSyncStatus, Attachment, Folder, FolderSyncState, FolderType, Message, MessageFlags, NewAccount,
    NewAttachment, NewMessage,
};
use crate::services::store::{DuplicateGroup, FolderCommit, MailStore, StoreError};

const ACCOUNT_COLUMNS: &str = "id, user_id, email_address, provider, imap_host, imap_port, imap_user, imap_pass, \
     is_active, sync_status, sync_error, total_count, unread_count, last_sync_at";

const FOLDER_COLUMNS: &str = "id, account_id, name, path, delimiter, folder_type, is_selectable, is_subscribed, \
     uid_validity, uid_next, total_count, unread_count, last_sync_at";

const MESSAGE_COLUMNS: &str = "id, account_id, folder_id, uid, message_id, thread_id, subject, from_address, \
     to_addresses, date, body_text, body_html, is_read, is_starred, is_draft, is_answered, is_forwarded, \
     has_attachments, size, created_at, updated_at";

const ATTACHMENT_COLUMNS: &str = "id, message_id, account_id, filename, content_type, size, transfer_encoding, \
     part_id, is_downloaded, storage_path, created_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `database_url` and runs
    /// the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Opening mail store at {}", database_url);

        let db_path = database_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
        if !db_path.starts_with(':') {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::OperationFailed(format!("Failed to create data directory: {}", e))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single connection that never expires
    /// keeps the schema alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Mail store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_messages_where(&self, clause: &str, binds: Vec<SqlValue>) -> Result<Vec<Message>, StoreError> {
        let sql = format!("SELECT {} FROM messages WHERE {} ORDER BY id", MESSAGE_COLUMNS, clause);
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = match value {
                SqlValue::Int(v) => query.bind(v),
                SqlValue::Text(v) => query.bind(v),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(message_from_row).collect()
    }
}

/// Owned bind values for dynamically built statements.
enum SqlValue {
    Int(i64),
    Text(String),
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

fn opt_from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.map(from_ts)
}

fn account_from_row(row: &SqliteRow) -> Result<Account, StoreError> {
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("sync_status")?;
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        email_address: row.try_get("email_address")?,
        provider: provider.parse().unwrap_or_default(),
        imap_host: row.try_get("imap_host")?,
        imap_port: row.try_get::<i64, _>("imap_port")? as u16,
        imap_user: row.try_get("imap_user")?,
        imap_pass: row.try_get("imap_pass")?,
        is_active: row.try_get("is_active")?,
        sync_status: AccountSyncStatus::parse(&status),
        sync_error: row.try_get("sync_error")?,
        total_count: row.try_get("total_count")?,
        unread_count: row.try_get("unread_count")?,
        last_sync_at: opt_from_ts(row.try_get("last_sync_at")?),
    })
}

fn folder_from_row(row: &SqliteRow) -> Result<Folder, StoreError> {
    let folder_type: String = row.try_get("folder_type")?;
    Ok(Folder {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        delimiter: row.try_get("delimiter")?,
        folder_type: FolderType::parse(&folder_type),
        is_selectable: row.try_get("is_selectable")?,
        is_subscribed: row.try_get("is_subscribed")?,
        uid_validity: row.try_get::<i64, _>("uid_validity")? as u32,
        uid_next: row.try_get::<i64, _>("uid_next")? as u32,
        total_count: row.try_get::<i64, _>("total_count")? as u32,
        unread_count: row.try_get::<i64, _>("unread_count")? as u32,
        last_sync_at: opt_from_ts(row.try_get("last_sync_at")?),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, StoreError> {
    let to_addresses: String = row.try_get("to_addresses")?;
    Ok(Message {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        folder_id: row.try_get("folder_id")?,
        uid: row.try_get::<i64, _>("uid")? as u32,
        message_id: row.try_get("message_id")?,
        thread_id: row.try_get("thread_id")?,
        subject: row.try_get("subject")?,
        from_address: row.try_get("from_address")?,
        to_addresses: serde_json::from_str(&to_addresses)?,
        date: opt_from_ts(row.try_get("date")?),
        body_text: row.try_get("body_text")?,
        body_html: row.try_get("body_html")?,
        flags: MessageFlags {
            read: row.try_get("is_read")?,
            starred: row.try_get("is_starred")?,
            draft: row.try_get("is_draft")?,
            answered: row.try_get("is_answered")?,
            forwarded: row.try_get("is_forwarded")?,
        },
        has_attachments: row.try_get("has_attachments")?,
        size: row.try_get::<i64, _>("size")? as u32,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn attachment_from_row(row: &SqliteRow) -> Result<Attachment, StoreError> {
    Ok(Attachment {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        account_id: row.try_get("account_id")?,
        filename: row.try_get("filename")?,
        content_type: row.try_get("content_type")?,
        size: row.try_get::<i64, _>("size")? as u64,
        transfer_encoding: row.try_get("transfer_encoding")?,
        part_id: row.try_get("part_id")?,
        is_downloaded: row.try_get("is_downloaded")?,
        storage_path: row.try_get("storage_path")?,
        created_at: from_ts(row.try_get("created_at")?),
    })
}

async fn insert_message_with(conn: &mut SqliteConnection, message: &NewMessage) -> Result<i64, StoreError> {
    let now = to_ts(Utc::now());
    let to_addresses = serde_json::to_string(&message.to_addresses)?;

    let result = sqlx::query(
        r#"
        INSERT INTO messages
            (account_id, folder_id, uid, message_id, message_id_norm, thread_id, subject, from_address,
             to_addresses, date, body_text, body_html, is_read, is_starred, is_draft, is_answered,
             is_forwarded, has_attachments, size, dedup_key, dedup_scope, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(message.account_id)
    .bind(message.folder_id)
    .bind(i64::from(message.uid))
    .bind(&message.message_id)
    .bind(&message.message_id_norm)
    .bind(&message.thread_id)
    .bind(&message.subject)
    .bind(&message.from_address)
    .bind(to_addresses)
    .bind(message.date.map(to_ts))
    .bind(&message.body_text)
    .bind(&message.body_html)
    .bind(message.flags.read)
    .bind(message.flags.starred)
    .bind(message.flags.draft)
    .bind(message.flags.answered)
    .bind(message.flags.forwarded)
    .bind(!message.attachments.is_empty())
    .bind(i64::from(message.size))
    .bind(&message.dedup_key)
    .bind(message.dedup_scope)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let message_id = result.last_insert_rowid();
    for attachment in &message.attachments {
        insert_attachment_with(conn, message.account_id, Some(message_id), attachment).await?;
    }
    Ok(message_id)
}

async fn insert_attachment_with(
    conn: &mut SqliteConnection,
    account_id: i64,
    message_id: Option<i64>,
    attachment: &NewAttachment,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO attachments
            (message_id, account_id, filename, content_type, size, transfer_encoding, part_id, is_downloaded, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(message_id)
    .bind(account_id)
    .bind(&attachment.filename)
    .bind(&attachment.content_type)
    .bind(attachment.size as i64)
    .bind(&attachment.transfer_encoding)
    .bind(&attachment.part_id)
    .bind(to_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn apply_commit_with(conn: &mut SqliteConnection, commit: &FolderCommit) -> Result<(), StoreError> {
    let now = to_ts(Utc::now());
    let status = commit.status;

    // uid_next only grows within one validity epoch
    sqlx::query(
        r#"
        UPDATE folders SET
            uid_next = CASE WHEN uid_validity = ? THEN MAX(uid_next, ?) ELSE ? END,
            uid_validity = ?,
            total_count = ?,
            unread_count = ?,
            last_sync_at = ?
        WHERE id = ?
        "#,
    )
    .bind(i64::from(status.uid_validity))
    .bind(i64::from(status.uid_next))
    .bind(i64::from(status.uid_next))
    .bind(i64::from(status.uid_validity))
    .bind(i64::from(status.total))
    .bind(i64::from(status.unread))
    .bind(now)
    .bind(commit.folder_id)
    .execute(&mut *conn)
    .await?;

    if let Some(uid) = commit.cursor_uid {
        advance_cursor_with(conn, commit.folder_id, uid).await?;
    }
    Ok(())
}

async fn ensure_sync_state(conn: &mut SqliteConnection, folder_id: i64) -> Result<(), StoreError> {
    sqlx::query("INSERT OR IGNORE INTO folder_sync_state (folder_id) VALUES (?)")
        .bind(folder_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn advance_cursor_with(conn: &mut SqliteConnection, folder_id: i64, uid: u32) -> Result<bool, StoreError> {
    ensure_sync_state(conn, folder_id).await?;
    let result = sqlx::query(
        "UPDATE folder_sync_state SET last_uid = ?, last_synced_at = ? WHERE folder_id = ? AND last_uid < ?",
    )
    .bind(i64::from(uid))
    .bind(to_ts(Utc::now()))
    .bind(folder_id)
    .bind(i64::from(uid))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl MailStore for SqliteStore {
    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, email_address, provider, imap_host, imap_port, imap_user, imap_pass, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.user_id)
        .bind(&account.email_address)
        .bind(account.provider.as_str())
        .bind(&account.imap_host)
        .bind(i64::from(account.imap_port))
        .bind(&account.imap_user)
        .bind(&account.imap_pass)
        .bind(account.is_active)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_account(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }

    async fn get_account(&self, account_id: i64) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql).bind(account_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_active_accounts(&self, user_id: Option<&str>) -> Result<Vec<Account>, StoreError> {
        let rows = match user_id {
            Some(user_id) => {
                let sql = format!("SELECT {} FROM accounts WHERE is_active = 1 AND user_id = ? ORDER BY id", ACCOUNT_COLUMNS);
                sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!("SELECT {} FROM accounts WHERE is_active = 1 ORDER BY id", ACCOUNT_COLUMNS);
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(account_from_row).collect()
    }

    async fn set_account_status(
        &self,
        account_id: i64,
        status: AccountSyncStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let finished = matches!(status, AccountSyncStatus::Success | AccountSyncStatus::Error);
        sqlx::query(
            r#"
            UPDATE accounts SET
                sync_status = ?,
                sync_error = ?,
                last_sync_at = CASE WHEN ? THEN ? ELSE last_sync_at END
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(finished)
        .bind(to_ts(Utc::now()))
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_account_counters(&self, account_id: i64) -> Result<(i64, i64), StoreError> {
        let (total, unread): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0) FROM messages WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("UPDATE accounts SET total_count = ?, unread_count = ? WHERE id = ?")
            .bind(total)
            .bind(unread)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok((total, unread))
    }

    async fn list_folders(&self, account_id: i64) -> Result<Vec<Folder>, StoreError> {
        let sql = format!("SELECT {} FROM folders WHERE account_id = ? ORDER BY id", FOLDER_COLUMNS);
        let rows = sqlx::query(&sql).bind(account_id).fetch_all(&self.pool).await?;
        rows.iter().map(folder_from_row).collect()
    }

    async fn get_folder(&self, folder_id: i64) -> Result<Option<Folder>, StoreError> {
        let sql = format!("SELECT {} FROM folders WHERE id = ?", FOLDER_COLUMNS);
        let row = sqlx::query(&sql).bind(folder_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(folder_from_row).transpose()
    }

    async fn find_folder(&self, account_id: i64, name: &str) -> Result<Option<Folder>, StoreError> {
        let sql = format!(
            "SELECT {} FROM folders WHERE account_id = ? AND (path = ? OR name = ?) ORDER BY path = ? DESC LIMIT 1",
            FOLDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(name)
            .bind(name)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(folder_from_row).transpose()
    }

    async fn upsert_folder(&self, account_id: i64, folder: &RemoteFolder) -> Result<Folder, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO folders (account_id, name, path, delimiter, folder_type, is_selectable, is_subscribed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, path) DO UPDATE SET
                name = excluded.name,
                delimiter = excluded.delimiter,
                folder_type = excluded.folder_type,
                is_selectable = excluded.is_selectable,
                is_subscribed = excluded.is_subscribed
            "#,
        )
        .bind(account_id)
        .bind(&folder.name)
        .bind(&folder.path)
        .bind(&folder.delimiter)
        .bind(folder.folder_type.as_str())
        .bind(folder.selectable)
        .bind(folder.subscribed)
        .execute(&self.pool)
        .await?;

        let sql = format!("SELECT {} FROM folders WHERE account_id = ? AND path = ?", FOLDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(&folder.path)
            .fetch_one(&self.pool)
            .await?;
        folder_from_row(&row)
    }

    async fn apply_folder_commit(&self, commit: &FolderCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        apply_commit_with(&mut tx, commit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_sync_state(&self, folder_id: i64) -> Result<FolderSyncState, StoreError> {
        let row = sqlx::query(
            "SELECT folder_id, last_uid, sync_version, in_progress, last_synced_at FROM folder_sync_state WHERE folder_id = ?",
        )
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(FolderSyncState {
                folder_id: row.try_get("folder_id")?,
                last_uid: row.try_get::<i64, _>("last_uid")? as u32,
                sync_version: row.try_get("sync_version")?,
                in_progress: row.try_get("in_progress")?,
                last_synced_at: opt_from_ts(row.try_get("last_synced_at")?),
            }),
            None => Ok(FolderSyncState::empty(folder_id)),
        }
    }

    async fn mark_sync_started(&self, folder_id: i64) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ensure_sync_state(&mut conn, folder_id).await?;
        let was_in_progress: bool = sqlx::query_scalar("SELECT in_progress FROM folder_sync_state WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query("UPDATE folder_sync_state SET in_progress = 1 WHERE folder_id = ?")
            .bind(folder_id)
            .execute(&mut *conn)
            .await?;
        Ok(was_in_progress)
    }

    async fn mark_sync_finished(&self, folder_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE folder_sync_state SET in_progress = 0, last_synced_at = ? WHERE folder_id = ?")
            .bind(to_ts(Utc::now()))
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn advance_cursor(&self, folder_id: i64, uid: u32) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        advance_cursor_with(&mut conn, folder_id, uid).await
    }

    async fn reset_folder(&self, folder_id: i64, uid_validity: u32) -> Result<Vec<Attachment>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM attachments WHERE message_id IN (SELECT id FROM messages WHERE folder_id = ?)",
            ATTACHMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(folder_id).fetch_all(&mut *tx).await?;
        let removed = rows.iter().map(attachment_from_row).collect::<Result<Vec<_>, _>>()?;

        sqlx::query("DELETE FROM attachments WHERE message_id IN (SELECT id FROM messages WHERE folder_id = ?)")
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM messages WHERE folder_id = ?")
            .bind(folder_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        ensure_sync_state(&mut tx, folder_id).await?;
        sqlx::query(
            "UPDATE folder_sync_state SET last_uid = 0, sync_version = sync_version + 1, last_synced_at = NULL WHERE folder_id = ?",
        )
        .bind(folder_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE folders SET uid_validity = ?, uid_next = 0, total_count = 0, unread_count = 0 WHERE id = ?")
            .bind(i64::from(uid_validity))
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Reset folder {}: removed {} messages, {} attachments", folder_id, deleted, removed.len());
        Ok(removed)
    }

    async fn persisted_uids(&self, folder_id: i64) -> Result<Vec<u32>, StoreError> {
        let uids: Vec<i64> = sqlx::query_scalar("SELECT uid FROM messages WHERE folder_id = ? ORDER BY uid")
            .bind(folder_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(uids.into_iter().map(|uid| uid as u32).collect())
    }

    async fn count_folder_messages(&self, folder_id: i64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_batch(&self, messages: &[NewMessage], commit: Option<&FolderCommit>) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(insert_message_with(&mut tx, message).await?);
        }
        if let Some(commit) = commit {
            apply_commit_with(&mut tx, commit).await?;
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_message_with(&mut tx, message).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let mut found = self
            .fetch_messages_where("id = ?", vec![SqlValue::Int(message_id)])
            .await?;
        Ok(found.pop())
    }

    async fn find_by_message_ids(&self, account_id: i64, normalized_ids: &[String]) -> Result<Vec<Message>, StoreError> {
        if normalized_ids.is_empty() {
            return Ok(Vec::new());
        }
        let clause = format!("account_id = ? AND message_id_norm IN ({})", placeholders(normalized_ids.len()));
        let mut binds = vec![SqlValue::Int(account_id)];
        binds.extend(normalized_ids.iter().cloned().map(SqlValue::Text));
        self.fetch_messages_where(&clause, binds).await
    }

    async fn find_by_uids(&self, folder_id: i64, uids: &[u32]) -> Result<Vec<Message>, StoreError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let clause = format!("folder_id = ? AND uid IN ({})", placeholders(uids.len()));
        let mut binds = vec![SqlValue::Int(folder_id)];
        binds.extend(uids.iter().map(|uid| SqlValue::Int(i64::from(*uid))));
        self.fetch_messages_where(&clause, binds).await
    }

    async fn find_by_thread(&self, account_id: i64, thread_key: &str) -> Result<Vec<Message>, StoreError> {
        self.fetch_messages_where(
            "account_id = ? AND thread_id = ?",
            vec![SqlValue::Int(account_id), SqlValue::Text(thread_key.to_string())],
        )
        .await
    }

    async fn find_similar(
        &self,
        account_id: i64,
        from_address: &str,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        self.fetch_messages_where(
            "account_id = ? AND from_address = ? COLLATE NOCASE AND date BETWEEN ? AND ?",
            vec![
                SqlValue::Int(account_id),
                SqlValue::Text(from_address.to_string()),
                SqlValue::Int(to_ts(date_from)),
                SqlValue::Int(to_ts(date_to)),
            ],
        )
        .await
    }

    async fn relocate_message(&self, message_id: i64, folder_id: i64, uid: u32) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET folder_id = ?, uid = ?, updated_at = ? WHERE id = ?")
            .bind(folder_id)
            .bind(i64::from(uid))
            .bind(to_ts(Utc::now()))
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_flags(&self, message_id: i64, flags: MessageFlags) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE messages SET
                is_read = ?, is_starred = ?, is_draft = ?, is_answered = ?, is_forwarded = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(flags.read)
        .bind(flags.starred)
        .bind(flags.draft)
        .bind(flags.answered)
        .bind(flags.forwarded)
        .bind(to_ts(Utc::now()))
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fill_missing_body(
        &self,
        message_id: i64,
        body_text: Option<&str>,
        body_html: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE messages SET
                body_text = COALESCE(body_text, ?),
                body_html = COALESCE(body_html, ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(body_text)
        .bind(body_html)
        .bind(to_ts(Utc::now()))
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_read(&self, message_ids: &[i64], read: bool) -> Result<u64, StoreError> {
        update_column(&self.pool, "is_read", read as i64, message_ids).await
    }

    async fn set_starred(&self, message_ids: &[i64], starred: bool) -> Result<u64, StoreError> {
        update_column(&self.pool, "is_starred", starred as i64, message_ids).await
    }

    async fn move_messages(&self, message_ids: &[i64], folder_id: i64) -> Result<u64, StoreError> {
        update_column(&self.pool, "folder_id", folder_id, message_ids).await
    }

    async fn delete_messages(&self, message_ids: &[i64]) -> Result<u64, StoreError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM messages WHERE id IN ({})", placeholders(message_ids.len()));
        let mut query = sqlx::query(&sql);
        for id in message_ids {
            query = query.bind(*id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn find_duplicate_groups(&self, account_id: i64) -> Result<Vec<DuplicateGroup>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT message_id_norm, id FROM messages
            WHERE account_id = ? AND message_id_norm IN (
                SELECT message_id_norm FROM messages
                WHERE account_id = ? AND message_id_norm IS NOT NULL
                GROUP BY message_id_norm
                HAVING COUNT(*) > 1
            )
            ORDER BY message_id_norm, created_at, id
            "#,
        )
        .bind(account_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for (message_id, id) in rows {
            match groups.last_mut() {
                Some(group) if group.message_id == message_id => group.ids.push(id),
                _ => groups.push(DuplicateGroup { message_id, ids: vec![id] }),
            }
        }
        Ok(groups)
    }

    async fn insert_attachment(
        &self,
        account_id: i64,
        message_id: Option<i64>,
        attachment: &NewAttachment,
    ) -> Result<Attachment, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_attachment_with(&mut conn, account_id, message_id, attachment).await?;
        drop(conn);
        self.get_attachment(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("attachment {}", id)))
    }

    async fn get_attachment(&self, attachment_id: i64) -> Result<Option<Attachment>, StoreError> {
        let sql = format!("SELECT {} FROM attachments WHERE id = ?", ATTACHMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(attachment_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(attachment_from_row).transpose()
    }

    async fn list_attachments(&self, message_id: i64) -> Result<Vec<Attachment>, StoreError> {
        let sql = format!("SELECT {} FROM attachments WHERE message_id = ? ORDER BY id", ATTACHMENT_COLUMNS);
        let rows = sqlx::query(&sql).bind(message_id).fetch_all(&self.pool).await?;
        rows.iter().map(attachment_from_row).collect()
    }

    async fn mark_attachment_downloaded(&self, attachment_id: i64, storage_path: &str, size: u64) -> Result<(), StoreError> {
        sqlx::query("UPDATE attachments SET is_downloaded = 1, storage_path = ?, size = ? WHERE id = ?")
            .bind(storage_path)
            .bind(size as i64)
            .bind(attachment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reassign_attachments(&self, from_message_ids: &[i64], to_message_id: i64) -> Result<u64, StoreError> {
        if from_message_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE attachments SET message_id = ? WHERE message_id IN ({})",
            placeholders(from_message_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(to_message_id);
        for id in from_message_ids {
            query = query.bind(*id);
        }
        let moved = query.execute(&self.pool).await?.rows_affected();
        if moved > 0 {
            sqlx::query("UPDATE messages SET has_attachments = 1 WHERE id = ?")
                .bind(to_message_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(moved)
    }

    async fn list_unassociated_attachments(&self, older_than: DateTime<Utc>) -> Result<Vec<Attachment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM attachments WHERE message_id IS NULL AND created_at < ? ORDER BY id",
            ATTACHMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(to_ts(older_than)).fetch_all(&self.pool).await?;
        rows.iter().map(attachment_from_row).collect()
    }

    async fn delete_attachment(&self, attachment_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(attachment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn update_column(pool: &SqlitePool, column: &str, value: i64, message_ids: &[i64]) -> Result<u64, StoreError> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE messages SET {} = ?, updated_at = ? WHERE id IN ({})",
        column,
        placeholders(message_ids.len())
    );
    let mut query = sqlx::query(&sql).bind(value).bind(to_ts(Utc::now()));
    for id in message_ids {
        query = query.bind(*id);
    }
    Ok(query.execute(pool).await?.rows_affected())
}

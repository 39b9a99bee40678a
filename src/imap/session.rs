// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `MailClient` implementation over `async-imap` with native TLS.

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag, Name};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use log::{debug, info, warn};
use mail_parser::{HeaderValue, MimeHeaders};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;
use tokio_native_tls::{native_tls, TlsConnector};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::imap::client::{MailClient, MailClientFactory};
use crate::imap::error::ImapError;
use crate::imap::types::{FetchCriteria, FolderStatus, RemoteAttachment, RemoteFolder, RemoteMessage};
use crate::models::{Account, FolderType};

pub type TlsCompatibleStream = Compat<tokio_native_tls::TlsStream<TokioTcpStream>>;
pub type TlsImapSession = async_imap::Session<TlsCompatibleStream>;

const FULL_FETCH_QUERY: &str = "(UID FLAGS RFC822.SIZE BODY.PEEK[])";
const HEADER_FETCH_QUERY: &str = "(UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])";
const STATUS_ITEMS: &str = "(MESSAGES UIDNEXT UIDVALIDITY UNSEEN)";

/// Attachments up to this encoded size are handed over with the message.
const INLINE_ATTACHMENT_LIMIT: usize = 1024 * 1024;

/// Runs `$body` against the live session, bounded by the client timeout.
/// A connection-level failure drops the session so the next call reconnects.
macro_rules! with_session {
    ($self:ident, $session:ident => $body:block) => {{
        let mut guard = $self.session.lock().await;
        let result = match guard.as_mut() {
            Some($session) => match timeout($self.timeout, async $body).await {
                Ok(inner) => inner,
                Err(elapsed) => Err(ImapError::from(elapsed)),
            },
            None => Err(ImapError::NotConnected),
        };
        if let Err(e) = &result {
            if e.is_connection_loss() {
                warn!("IMAP session for {} dropped: {}", $self.username, e);
                *guard = None;
            }
        }
        result
    }};
}

pub struct ImapMailClient {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
    session: TokioMutex<Option<TlsImapSession>>,
}

impl ImapMailClient {
    pub fn new(host: String, port: u16, username: String, password: String, timeout: Duration) -> Self {
        Self {
            host,
            port,
            username,
            password,
            timeout,
            session: TokioMutex::new(None),
        }
    }

    async fn open_session(&self) -> Result<TlsImapSession, ImapError> {
        debug!("Connecting to {}:{}", self.host, self.port);
        let tcp_stream = timeout(self.timeout, TokioTcpStream::connect((self.host.as_str(), self.port))).await??;

        let tls = native_tls::TlsConnector::builder().build()?;
        let tls = TlsConnector::from(tls);
        let tls_stream = timeout(self.timeout, tls.connect(&self.host, tcp_stream)).await??;

        let client = async_imap::Client::new(tls_stream.compat());
        let session = timeout(self.timeout, client.login(&self.username, &self.password))
            .await?
            .map_err(|(e, _client)| match e {
                async_imap::error::Error::No(msg) => ImapError::Auth(msg),
                other => ImapError::from(other),
            })?;

        info!("IMAP login successful for {}", self.username);
        Ok(session)
    }
}

#[async_trait]
impl MailClient for ImapMailClient {
    async fn connect(&self) -> Result<(), ImapError> {
        let session = self.open_session().await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ImapError> {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            session.logout().await?;
            debug!("Logged out {}", self.username);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn list_folders(&self) -> Result<Vec<RemoteFolder>, ImapError> {
        with_session!(self, session => {
            let names: Vec<Name> = session.list(Some(""), Some("*")).await?.try_collect().await?;
            Ok::<_, ImapError>(names.iter().map(remote_folder).collect())
        })
    }

    async fn get_folder_status(&self, path: &str) -> Result<FolderStatus, ImapError> {
        with_session!(self, session => {
            let mailbox = session.status(path, STATUS_ITEMS).await?;
            Ok::<_, ImapError>(FolderStatus {
                uid_validity: mailbox.uid_validity.unwrap_or(0),
                uid_next: mailbox.uid_next.unwrap_or(0),
                total: mailbox.exists,
                unread: mailbox.unseen.unwrap_or(0),
            })
        })
    }

    async fn get_emails_in_uid_range(&self, path: &str, start: u32, end: u32) -> Result<Vec<RemoteMessage>, ImapError> {
        if start == 0 || end < start {
            return Ok(Vec::new());
        }
        with_session!(self, session => {
            session.select(path).await?;
            let fetches: Vec<Fetch> = session
                .uid_fetch(format!("{}:{}", start, end), FULL_FETCH_QUERY)
                .await?
                .try_collect()
                .await?;
            Ok::<_, ImapError>(
                fetches
                    .iter()
                    .filter_map(parse_fetch)
                    .filter(|m| m.uid >= start && m.uid <= end)
                    .collect(),
            )
        })
    }

    async fn fetch_emails(&self, path: &str, criteria: &FetchCriteria) -> Result<Vec<RemoteMessage>, ImapError> {
        let query = if criteria.include_body { FULL_FETCH_QUERY } else { HEADER_FETCH_QUERY };
        let limit = criteria.limit.max(1) as u32;
        with_session!(self, session => {
            let mailbox = session.select(path).await?;
            if mailbox.exists == 0 {
                return Ok(Vec::new());
            }
            let first = mailbox.exists.saturating_sub(limit) + 1;
            let fetches: Vec<Fetch> = session
                .fetch(format!("{}:{}", first, mailbox.exists), query)
                .await?
                .try_collect()
                .await?;
            Ok::<_, ImapError>(fetches.iter().filter_map(parse_fetch).collect())
        })
    }

    async fn get_attachment(&self, path: &str, uid: u32, part_id: &str) -> Result<Vec<u8>, ImapError> {
        let part_index: usize = part_id
            .parse()
            .map_err(|_| ImapError::Parse(format!("invalid part id: {}", part_id)))?;
        with_session!(self, session => {
            session.select(path).await?;
            let fetches: Vec<Fetch> = session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await?
                .try_collect()
                .await?;
            let raw = fetches
                .iter()
                .find_map(|f| f.body())
                .ok_or_else(|| ImapError::MissingData(format!("no body for UID {}", uid)))?;
            let parsed = mail_parser::Message::parse(raw)
                .ok_or_else(|| ImapError::Parse(format!("unparseable message UID {}", uid)))?;
            let part = parsed
                .parts
                .get(part_index)
                .ok_or_else(|| ImapError::MissingData(format!("part {} not found in UID {}", part_id, uid)))?;
            Ok::<_, ImapError>(raw.get(part.offset_body..part.offset_end).unwrap_or_default().to_vec())
        })
    }

    async fn create_folder(&self, path: &str) -> Result<(), ImapError> {
        with_session!(self, session => {
            session.create(path).await?;
            Ok::<_, ImapError>(())
        })
    }

    async fn delete_folder(&self, path: &str) -> Result<(), ImapError> {
        with_session!(self, session => {
            session.delete(path).await?;
            Ok::<_, ImapError>(())
        })
    }

    async fn rename_folder(&self, from: &str, to: &str) -> Result<(), ImapError> {
        with_session!(self, session => {
            session.rename(from, to).await?;
            Ok::<_, ImapError>(())
        })
    }

    async fn move_emails(&self, path: &str, uids: &[u32], target_path: &str) -> Result<(), ImapError> {
        if uids.is_empty() {
            return Ok(());
        }
        let set = uid_set(uids);
        with_session!(self, session => {
            session.select(path).await?;
            session.uid_mv(&set, target_path).await?;
            Ok::<_, ImapError>(())
        })
    }

    async fn delete_emails(&self, path: &str, uids: &[u32]) -> Result<(), ImapError> {
        if uids.is_empty() {
            return Ok(());
        }
        let set = uid_set(uids);
        with_session!(self, session => {
            session.select(path).await?;
            session
                .uid_store(&set, "+FLAGS (\\Deleted)")
                .await?
                .try_collect::<Vec<_>>()
                .await?;
            session.expunge().await?.try_collect::<Vec<_>>().await?;
            Ok::<_, ImapError>(())
        })
    }
}

/// Opens one authenticated IMAP session per requested client.
pub struct ImapClientFactory {
    timeout: Duration,
}

impl ImapClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MailClientFactory for ImapClientFactory {
    async fn create(&self, account: &Account) -> Result<Arc<dyn MailClient>, ImapError> {
        let client = ImapMailClient::new(
            account.imap_host.clone(),
            account.imap_port,
            account.imap_user.clone(),
            account.imap_pass.clone(),
            self.timeout,
        );
        client.connect().await?;
        Ok(Arc::new(client))
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",")
}

fn remote_folder(name: &Name) -> RemoteFolder {
    let attributes: Vec<String> = name
        .attributes()
        .iter()
        .map(|attr| format!("{:?}", attr).to_ascii_lowercase())
        .collect();
    let has = |needle: &str| attributes.iter().any(|a| a.contains(needle));

    let path = name.name().to_string();
    let delimiter = name.delimiter().map(str::to_string);
    let display = match delimiter.as_deref() {
        Some(d) if !d.is_empty() => path.rsplit(d).next().unwrap_or(&path).to_string(),
        _ => path.clone(),
    };

    let folder_type = if path.eq_ignore_ascii_case("INBOX") {
        FolderType::Inbox
    } else if has("sent") {
        FolderType::Sent
    } else if has("drafts") {
        FolderType::Drafts
    } else if has("trash") {
        FolderType::Trash
    } else if has("junk") {
        FolderType::Junk
    } else if has("archive") {
        FolderType::Archive
    } else if has("all") && !has("noselect") {
        FolderType::All
    } else {
        FolderType::Other
    };

    RemoteFolder {
        name: display,
        path,
        folder_type,
        delimiter,
        selectable: !has("noselect"),
        subscribed: true,
    }
}

fn flag_to_string(flag: Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
    }
}

fn parse_fetch(fetch: &Fetch) -> Option<RemoteMessage> {
    let uid = fetch.uid?;
    let raw = fetch.body().or_else(|| fetch.header()).unwrap_or_default();
    let mut message = RemoteMessage {
        uid,
        flags: fetch.flags().map(flag_to_string).collect(),
        size: fetch.size.unwrap_or(raw.len() as u32),
        ..Default::default()
    };

    let Some(parsed) = mail_parser::Message::parse(raw) else {
        warn!("Could not parse message UID {}", uid);
        return Some(message);
    };

    message.message_id = parsed.message_id().map(str::to_string);
    message.subject = parsed.subject().map(str::to_string);
    message.from = addresses(parsed.from()).into_iter().next();
    message.to = addresses(parsed.to());
    message.date = parsed
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());
    message.body_text = parsed.body_text(0).map(|b| b.into_owned());
    message.body_html = parsed.body_html(0).map(|b| b.into_owned());

    for &part_index in &parsed.attachments {
        let Some(part) = parsed.parts.get(part_index) else { continue };
        let encoded = raw.get(part.offset_body..part.offset_end).unwrap_or_default();
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string())
            .to_ascii_lowercase();

        message.attachments.push(RemoteAttachment {
            part_id: part_index.to_string(),
            filename: part.attachment_name().unwrap_or("attachment").to_string(),
            content_type,
            size: encoded.len() as u64,
            transfer_encoding: part
                .content_transfer_encoding()
                .unwrap_or("7bit")
                .to_ascii_lowercase(),
            content: (encoded.len() <= INLINE_ATTACHMENT_LIMIT).then(|| encoded.to_vec()),
        });
    }

    Some(message)
}

fn addresses(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Address(addr) => addr.address.iter().map(|a| a.to_string()).collect(),
        HeaderValue::AddressList(list) => list
            .iter()
            .filter_map(|addr| addr.address.as_ref().map(|a| a.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ImapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ImapError {
    /// Whether the session that produced this error is no longer usable.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            ImapError::Connection(_) | ImapError::Tls(_) | ImapError::NotConnected | ImapError::Timeout(_)
        )
    }
}

impl From<async_imap::error::Error> for ImapError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Parse(e) => ImapError::Parse(e.to_string()),
            async_imap::error::Error::No(msg) => ImapError::Operation(msg),
            async_imap::error::Error::Bad(msg) => ImapError::BadResponse(msg),
            async_imap::error::Error::Io(e) => ImapError::Connection(e.to_string()),
            async_imap::error::Error::ConnectionLost => ImapError::Connection("connection lost".to_string()),
            async_imap::error::Error::Validate(e) => ImapError::BadResponse(e.to_string()),
            _ => ImapError::Unknown(err.to_string()),
        }
    }
}

impl From<tokio_native_tls::native_tls::Error> for ImapError {
    fn from(err: tokio_native_tls::native_tls::Error) -> Self {
        ImapError::Tls(err.to_string())
    }
}

impl From<std::io::Error> for ImapError {
    fn from(err: std::io::Error) -> Self {
        ImapError::Connection(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ImapError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ImapError::Timeout(err.to_string())
    }
}

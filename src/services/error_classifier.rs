// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Maps raw failures onto a small taxonomy with retry metadata.
//!
//! Patterns are ordered: the first matching regex decides the kind. Provider
//! specific patterns are consulted before the generic list so that wording a
//! provider uses for, say, throttling is not mistaken for an auth failure.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::imap::error::ImapError;
use crate::models::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Network,
    Authentication,
    OAuth,
    RateLimit,
    QuotaExceeded,
    ServiceUnavailable,
    Protocol,
    DataFormat,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::OAuth => "oauth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Protocol => "protocol",
            ErrorKind::DataFormat => "data_format",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "E_CONNECTION",
            ErrorKind::Timeout => "E_TIMEOUT",
            ErrorKind::Network => "E_NETWORK",
            ErrorKind::Authentication => "E_AUTH",
            ErrorKind::OAuth => "E_OAUTH",
            ErrorKind::RateLimit => "E_RATE_LIMIT",
            ErrorKind::QuotaExceeded => "E_QUOTA",
            ErrorKind::ServiceUnavailable => "E_UNAVAILABLE",
            ErrorKind::Protocol => "E_PROTOCOL",
            ErrorKind::DataFormat => "E_DATA_FORMAT",
            ErrorKind::Unknown => "E_UNKNOWN",
        }
    }

    /// Quota is transient on the server side but retrying inside one pass
    /// never clears it, so it is not retried here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::RateLimit
                | ErrorKind::ServiceUnavailable
        )
    }

    pub fn is_temporary(&self) -> bool {
        self.is_retryable() || *self == ErrorKind::QuotaExceeded
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::Authentication | ErrorKind::OAuth => Severity::Critical,
            ErrorKind::QuotaExceeded => Severity::High,
            ErrorKind::Protocol | ErrorKind::DataFormat | ErrorKind::Unknown => Severity::Medium,
            _ => Severity::Low,
        }
    }

    fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ErrorKind::Connection => &["Check that the mail server is reachable", "Verify host and port settings"],
            ErrorKind::Timeout => &["The server is slow to respond; the operation will be retried"],
            ErrorKind::Network => &["Check network connectivity and DNS resolution"],
            ErrorKind::Authentication => &["Verify the account credentials", "An app-specific password may be required"],
            ErrorKind::OAuth => &["Re-authorize the account to obtain a fresh token"],
            ErrorKind::RateLimit => &["Reduce sync frequency or concurrent folders"],
            ErrorKind::QuotaExceeded => &["Free up mailbox storage or raise the quota"],
            ErrorKind::ServiceUnavailable => &["The provider is temporarily unavailable; try again later"],
            ErrorKind::Protocol => &["The server rejected the command; check folder names and server capabilities"],
            ErrorKind::DataFormat => &["The message could not be parsed and was skipped"],
            ErrorKind::Unknown => &["Check the logs for details"],
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub code: String,
    pub severity: Severity,
    pub retryable: bool,
    pub temporary: bool,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            severity: kind.severity(),
            retryable: kind.is_retryable(),
            temporary: kind.is_temporary(),
            message,
            suggestions: kind.suggestions().iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn compile(patterns: &[(ErrorKind, &str)]) -> Vec<(ErrorKind, Regex)> {
    patterns
        .iter()
        .map(|(kind, pattern)| (*kind, Regex::new(pattern).unwrap()))
        .collect()
}

lazy_static! {
    static ref GMAIL_PATTERNS: Vec<(ErrorKind, Regex)> = compile(&[
        (ErrorKind::Authentication, r"(?i)web login required|application-specific password|log in via your web browser"),
        (ErrorKind::RateLimit, r"(?i)account exceeded command or bandwidth limits|too many simultaneous connections"),
        (ErrorKind::QuotaExceeded, r"(?i)\[overquota\]|account is over quota"),
    ]);

    static ref OUTLOOK_PATTERNS: Vec<(ErrorKind, Regex)> = compile(&[
        (ErrorKind::Authentication, r"(?i)user is authenticated but not connected|authenticate failed"),
        (ErrorKind::RateLimit, r"(?i)request is throttled|mailboxconcurrency"),
        (ErrorKind::ServiceUnavailable, r"(?i)server unavailable\. \d+"),
    ]);

    static ref GENERIC_PATTERNS: Vec<(ErrorKind, Regex)> = compile(&[
        (ErrorKind::OAuth, r"(?i)oauth|xoauth2|invalid_grant|access token|token (has )?expired"),
        (ErrorKind::Authentication, r"(?i)authenticat|authorizationfailed|login failed|invalid credentials|bad credentials|password"),
        (ErrorKind::QuotaExceeded, r"(?i)quota|mailbox (is )?full|storage limit"),
        (ErrorKind::RateLimit, r"(?i)rate.?limit|too many (requests|connections)|throttl|\[limit\]|\b429\b"),
        (ErrorKind::ServiceUnavailable, r"(?i)service unavailable|temporarily unavailable|\[unavailable\]|server (is )?busy|try again later|maintenance|\b503\b"),
        (ErrorKind::Timeout, r"(?i)timed? ?out|deadline (has )?elapsed|deadline exceeded"),
        (ErrorKind::Connection, r"(?i)connection (refused|reset|closed|lost|aborted)|broken pipe|not connected|unexpected eof|disconnected|\btls\b|\bssl\b|handshake"),
        (ErrorKind::Network, r"(?i)network|\bdns\b|failed to lookup|resolve|no route to host|unreachable|host not found"),
        (ErrorKind::DataFormat, r"(?i)parse|malformed|invalid (utf-?8|encoding|format|data)|decode|unexpected (token|character)"),
        (ErrorKind::Protocol, r"(?i)protocol|bad response|unexpected response|invalid command|\[cannot\]|\[nonexistent\]|does not exist|no such (mailbox|folder)|folder not found"),
    ]);
}

#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &str, provider: Option<ProviderKind>) -> ClassifiedError {
        ClassifiedError::new(Self::match_kind(message, provider), message.to_string())
    }

    /// Structured variants short-circuit; free-text server replies go through
    /// the pattern lists.
    pub fn classify_imap(&self, error: &ImapError, provider: Option<ProviderKind>) -> ClassifiedError {
        let message = error.to_string();
        let kind = match error {
            ImapError::Auth(_) => ErrorKind::Authentication,
            ImapError::Timeout(_) => ErrorKind::Timeout,
            ImapError::NotConnected | ImapError::Tls(_) => ErrorKind::Connection,
            ImapError::Parse(_) | ImapError::MissingData(_) => ErrorKind::DataFormat,
            ImapError::BadResponse(_) | ImapError::FolderNotFound(_) => ErrorKind::Protocol,
            ImapError::Connection(_) => match Self::match_kind(&message, provider) {
                ErrorKind::Unknown => ErrorKind::Connection,
                kind => kind,
            },
            ImapError::Fetch(_) | ImapError::Operation(_) | ImapError::Unknown(_) => {
                Self::match_kind(&message, provider)
            }
        };
        ClassifiedError::new(kind, message)
    }

    fn match_kind(message: &str, provider: Option<ProviderKind>) -> ErrorKind {
        let provider_patterns: &[(ErrorKind, Regex)] = match provider {
            Some(ProviderKind::Gmail) => &GMAIL_PATTERNS,
            Some(ProviderKind::Outlook) => &OUTLOOK_PATTERNS,
            _ => &[],
        };

        provider_patterns
            .iter()
            .chain(GENERIC_PATTERNS.iter())
            .find(|(_, regex)| regex.is_match(message))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::imap::error::ImapError;
use crate::models::ProviderKind;
use crate::services::error_classifier::{ClassifiedError, ErrorClassifier};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: 0.1,
        }
    }
}

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("{operation} failed ({}): {source}", .classified.kind)]
    NonRetryable {
        operation: String,
        source: ImapError,
        classified: ClassifiedError,
    },

    #[error("{operation} failed after {attempts} attempts ({}): {source}", .classified.kind)]
    Exhausted {
        operation: String,
        attempts: u32,
        source: ImapError,
        classified: ClassifiedError,
    },
}

impl RetryError {
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::NonRetryable { classified, .. } | RetryError::Exhausted { classified, .. } => Some(classified),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Drives bounded exponential backoff around remote operations.
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
    classifier: ErrorClassifier,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped,
    /// then scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let capped = (base * 2f64.powi(retry.min(31) as i32)).min(self.config.max_delay.as_millis() as f64);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).round() as u64)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        provider: Option<ProviderKind>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ImapError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { operation: operation.to_string() });
            }

            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let classified = self.classifier.classify_imap(&error, provider);
            if !classified.retryable {
                debug!("{} failed with non-retryable {} error: {}", operation, classified.kind, error);
                return Err(RetryError::NonRetryable {
                    operation: operation.to_string(),
                    source: error,
                    classified,
                });
            }
            if attempt >= max_attempts {
                warn!("{} exhausted {} attempts: {}", operation, attempt, error);
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: error,
                    classified,
                });
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                "{} attempt {}/{} failed ({}), retrying in {:?}: {}",
                operation, attempt, max_attempts, classified.kind, delay, error
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { operation: operation.to_string() });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

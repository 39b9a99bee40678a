// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-folder cursor decisions: full vs. delta, UID windows and gap ranges.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::imap::types::FolderStatus;
use crate::models::{Folder, FolderSyncState};

#[derive(Debug, Clone)]
pub struct CursorConfig {
    pub batch_size: u32,
    pub max_gap_uids: usize,
    pub sequence_fallback_limit: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_gap_uids: 10_000,
            sequence_fallback_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncStrategy {
    /// UIDVALIDITY changed: drop local state and refetch everything.
    Full { uid_validity: u32 },
    /// Server reports messages but no UIDNEXT.
    SequenceFallback { limit: usize },
    UpToDate,
    Delta { from: u32, to: u32 },
}

/// Inclusive UID range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidRange {
    pub start: u32,
    pub end: u32,
}

impl UidRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Delta,
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidWindow {
    pub range: UidRange,
    pub kind: WindowKind,
}

impl UidWindow {
    /// Only delta windows move the cursor; gap windows sit below it.
    pub fn cursor_target(&self) -> Option<u32> {
        match self.kind {
            WindowKind::Delta => Some(self.range.end),
            WindowKind::Gap => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub strategy: SyncStrategy,
    pub windows: Vec<UidWindow>,
    pub gaps: Vec<UidRange>,
    /// Set when messages must be fetched by sequence number instead of UID.
    pub sequence_limit: Option<usize>,
}

impl SyncPlan {
    pub fn planned_uids(&self) -> usize {
        self.windows.iter().map(|w| w.range.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FolderCursorTracker {
    config: CursorConfig,
}

impl FolderCursorTracker {
    pub fn new(config: CursorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CursorConfig {
        &self.config
    }

    pub fn decide(&self, folder: &Folder, cursor: &FolderSyncState, status: &FolderStatus) -> SyncStrategy {
        if folder.uid_validity != 0 && folder.uid_validity != status.uid_validity {
            info!(
                "UIDVALIDITY of {} changed ({} -> {}), full resync required",
                folder.path, folder.uid_validity, status.uid_validity
            );
            return SyncStrategy::Full { uid_validity: status.uid_validity };
        }

        if status.uid_next == 0 {
            if status.total > 0 {
                warn!("{} reports {} messages without UIDNEXT, falling back to sequence fetch", folder.path, status.total);
                return SyncStrategy::SequenceFallback {
                    limit: (status.total as usize).min(self.config.sequence_fallback_limit),
                };
            }
            return SyncStrategy::UpToDate;
        }

        let newest = status.uid_next - 1;
        if cursor.last_uid >= newest {
            SyncStrategy::UpToDate
        } else {
            SyncStrategy::Delta { from: cursor.last_uid + 1, to: newest }
        }
    }

    /// Builds the fetch plan. `cursor` and `persisted_uids` must reflect the
    /// state after any reset a `Full` strategy required.
    pub fn plan(
        &self,
        strategy: SyncStrategy,
        cursor: &FolderSyncState,
        status: &FolderStatus,
        interrupted: bool,
        persisted_uids: &[u32],
    ) -> SyncPlan {
        let delta = match strategy {
            SyncStrategy::Delta { from, to } => Some(UidRange::new(from, to)),
            SyncStrategy::Full { .. } if status.uid_next > 1 => Some(UidRange::new(1, status.uid_next - 1)),
            _ => None,
        };

        let sequence_limit = match strategy {
            SyncStrategy::SequenceFallback { limit } => Some(limit),
            SyncStrategy::Full { .. } if status.uid_next == 0 && status.total > 0 => {
                Some((status.total as usize).min(self.config.sequence_fallback_limit))
            }
            _ => None,
        };

        let mut windows: Vec<UidWindow> = delta
            .map(|range| self.split(range, WindowKind::Delta))
            .unwrap_or_default();

        let mut gaps = Vec::new();
        if sequence_limit.is_none() && !matches!(strategy, SyncStrategy::Full { .. }) {
            let delta_len = delta.map(|r| r.len()).unwrap_or(0);
            let inconsistent = persisted_uids.len() + delta_len < status.total as usize;
            if interrupted || inconsistent {
                gaps = self.detect_gaps(cursor.last_uid, status.uid_next, persisted_uids);
                if !gaps.is_empty() {
                    debug!(
                        "Gap check (interrupted={}, inconsistent={}) found {} missing UID range(s)",
                        interrupted,
                        inconsistent,
                        gaps.len()
                    );
                }
                for gap in &gaps {
                    windows.extend(self.split(*gap, WindowKind::Gap));
                }
            }
        }

        SyncPlan { strategy, windows, gaps, sequence_limit }
    }

    /// UIDs in `[1, min(last_uid, uid_next - 1)]` that are not persisted,
    /// merged into contiguous ranges and capped at `max_gap_uids`.
    pub fn detect_gaps(&self, last_uid: u32, uid_next: u32, persisted_uids: &[u32]) -> Vec<UidRange> {
        let upper = last_uid.min(uid_next.saturating_sub(1));
        if upper == 0 {
            return Vec::new();
        }

        let mut persisted: Vec<u32> = persisted_uids.iter().copied().filter(|uid| *uid >= 1 && *uid <= upper).collect();
        persisted.sort_unstable();
        persisted.dedup();

        // Walked in u64 so the end sentinel cannot overflow near u32::MAX.
        let mut ranges = Vec::new();
        let mut next_expected = 1u64;
        let sentinel = u64::from(upper) + 1;
        for uid in persisted.into_iter().map(u64::from).chain(std::iter::once(sentinel)) {
            if uid > next_expected {
                ranges.push(UidRange::new(next_expected as u32, (uid - 1) as u32));
            }
            next_expected = uid + 1;
        }

        let mut budget = self.config.max_gap_uids;
        let mut capped = Vec::with_capacity(ranges.len());
        for range in ranges {
            if budget == 0 {
                warn!("Gap list truncated at {} UIDs", self.config.max_gap_uids);
                break;
            }
            if range.len() <= budget {
                budget -= range.len();
                capped.push(range);
            } else {
                capped.push(UidRange::new(range.start, range.start + budget as u32 - 1));
                budget = 0;
            }
        }
        capped
    }

    fn split(&self, range: UidRange, kind: WindowKind) -> Vec<UidWindow> {
        let step = self.config.batch_size.max(1);
        let mut windows = Vec::new();
        let mut start = range.start;
        while start <= range.end {
            let end = start.saturating_add(step - 1).min(range.end);
            windows.push(UidWindow { range: UidRange::new(start, end), kind });
            if end == u32::MAX {
                break;
            }
            start = end + 1;
        }
        windows
    }
}

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Integration tests for mailsync
// Every module drives the full sync service against the scripted server.

#[path = "../common/mod.rs"]
mod common;

pub mod concurrency;
pub mod dedup;
pub mod failures;
pub mod observers;
pub mod sync_flow;

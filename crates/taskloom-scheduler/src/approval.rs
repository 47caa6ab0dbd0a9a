// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::types::ToolCallRequest;

/// Consulted when a call reaches `AwaitingApproval`. Returns `true` to
/// proceed to `Executing`, `false` to move the call to `Cancelled`.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn confirm(&self, call: &ToolCallRequest) -> bool;
}

/// Approves everything without prompting — used when no interactive
/// front-end is attached (e.g. headless `auto` runs).
pub struct AlwaysApprove;

#[async_trait]
impl Approver for AlwaysApprove {
    async fn confirm(&self, _call: &ToolCallRequest) -> bool {
        true
    }
}

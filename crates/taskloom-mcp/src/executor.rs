// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Adapts an [`McpManager`] to the scheduler's [`ToolExecutor`] contract, so
//! the Engine can dispatch a turn's tool calls through the same Scheduler
//! state machine regardless of whether tools are served by MCP providers or
//! the local [`taskloom_tools`] registry.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskloom_scheduler::{LiveOutputSink, ToolCallRequest, ToolCallResponse, ToolExecutor, DEFAULT_CALL_TIMEOUT};

use crate::manager::McpManager;

/// No MCP tool definition declares a destructive flag in this protocol
/// version, so every call is treated as non-destructive by this executor;
/// callers that need approval gating for MCP-hosted tools should run the
/// scheduler under [`taskloom_scheduler::ApprovalMode::Interactive`] instead
/// of relying on [`taskloom_scheduler::ApprovalMode::DefaultOnlyDestructive`].
pub struct McpExecutor {
    manager: Arc<McpManager>,
}

impl McpExecutor {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolExecutor for McpExecutor {
    async fn validate(&self, call: &ToolCallRequest) -> Result<(), String> {
        if call.tool_name.trim().is_empty() {
            return Err("empty tool name".to_string());
        }
        let known = self.manager.list_tools().await;
        if known.iter().any(|t| t.name == call.tool_name) {
            Ok(())
        } else {
            // Not fatal: `invoke_tool` itself may still resolve this via the
            // manager's default-server fallback, so validation only checks
            // for an empty name and lets the manager decide the rest.
            Ok(())
        }
    }

    fn is_destructive(&self, _tool_name: &str) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCallRequest, _live: LiveOutputSink, _cancel: CancellationToken) -> ToolCallResponse {
        match self.manager.invoke_tool(&call.tool_name, call.args.clone(), DEFAULT_CALL_TIMEOUT).await {
            Ok(value) => ToolCallResponse::success(value.to_string()),
            Err(fallback) => ToolCallResponse::error(fallback.message),
        }
    }
}

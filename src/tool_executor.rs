// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Composite [`ToolExecutor`] bridging the local [`taskloom_tools`] registry
//! and an [`McpManager`] behind one scheduler-facing implementation.
//!
//! `taskloom-scheduler`'s own crate doc puts it plainly: "the scheduler
//! never executes a tool itself — it drives the state machine around
//! whatever `ToolExecutor` the caller supplies, so the same crate serves
//! both the local `taskloom-tools` registry and the MCP manager." Neither
//! `RegistryExecutor` nor `McpExecutor` know about the other; this type is
//! the composition-root glue that lets one `Scheduler` dispatch to both,
//! local tools taking precedence on a name collision.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskloom_mcp::McpManager;
use taskloom_scheduler::{ApprovalMode, LiveOutputSink, ToolCallRequest, ToolCallResponse, ToolExecutor, DEFAULT_CALL_TIMEOUT};
use taskloom_tools::{ApprovalPolicy, ToolCall, ToolRegistry};

pub struct CompositeExecutor {
    registry: Arc<ToolRegistry>,
    mcp: Arc<McpManager>,
}

impl CompositeExecutor {
    pub fn new(registry: Arc<ToolRegistry>, mcp: Arc<McpManager>) -> Self {
        Self { registry, mcp }
    }
}

#[async_trait]
impl ToolExecutor for CompositeExecutor {
    async fn validate(&self, call: &ToolCallRequest) -> Result<(), String> {
        if call.tool_name.trim().is_empty() {
            return Err("empty tool name".to_string());
        }
        if self.registry.get(&call.tool_name).is_some() {
            return Ok(());
        }
        let known = self.mcp.list_tools().await;
        if known.iter().any(|t| t.name == call.tool_name) {
            return Ok(());
        }
        Err(format!("unknown tool: {}", call.tool_name))
    }

    fn is_destructive(&self, tool_name: &str) -> bool {
        self.registry
            .get(tool_name)
            .map(|t| t.default_policy() != ApprovalPolicy::Auto)
            .unwrap_or(false)
    }

    async fn execute(&self, call: &ToolCallRequest, live: LiveOutputSink, cancel: CancellationToken) -> ToolCallResponse {
        if self.registry.get(&call.tool_name).is_some() {
            let tool_call = ToolCall { id: call.call_id.clone(), name: call.tool_name.clone(), args: call.args.clone() };
            let output = self.registry.execute(&tool_call).await;
            return if output.is_error { ToolCallResponse::error(output.content) } else { ToolCallResponse::success(output.content) };
        }
        let _ = (live, cancel);
        match self.mcp.invoke_tool(&call.tool_name, call.args.clone(), DEFAULT_CALL_TIMEOUT).await {
            Ok(value) => ToolCallResponse::success(value.to_string()),
            Err(fallback) => ToolCallResponse::error(fallback.message),
        }
    }
}

/// Default bounded parallelism for the scheduler when no CLI override is given.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Approval policy for unattended runs (`auto`, `watch`): never block on a
/// human, since there is no interactive front-end to ask.
pub const HEADLESS_APPROVAL: ApprovalMode = ApprovalMode::Auto;

/// Approval policy for attended runs (`task`, `repl`): only destructive
/// tools (per the registry's own policy metadata) pause for confirmation.
pub const ATTENDED_APPROVAL: ApprovalMode = ApprovalMode::DefaultOnlyDestructive;

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskloom_tools::{ApprovalPolicy, ToolCall, ToolRegistry};

use crate::executor::{LiveOutputSink, ToolExecutor};
use crate::types::{ToolCallRequest, ToolCallResponse};

/// Adapts a local [`taskloom_tools::ToolRegistry`] to the scheduler's
/// [`ToolExecutor`] contract. The registry's own `default_policy()` doubles
/// as the destructive-tool metadata: anything that is not `Auto`-approved
/// is treated as destructive under [`crate::ApprovalMode::DefaultOnlyDestructive`].
pub struct RegistryExecutor {
    registry: Arc<ToolRegistry>,
}

impl RegistryExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for RegistryExecutor {
    async fn validate(&self, call: &ToolCallRequest) -> Result<(), String> {
        if call.tool_name.trim().is_empty() {
            return Err("empty tool name".to_string());
        }
        match self.registry.get(&call.tool_name) {
            Some(_) => Ok(()),
            None => Err(format!("unknown tool: {}", call.tool_name)),
        }
    }

    fn is_destructive(&self, tool_name: &str) -> bool {
        self.registry
            .get(tool_name)
            .map(|t| t.default_policy() != ApprovalPolicy::Auto)
            .unwrap_or(false)
    }

    async fn execute(
        &self,
        call: &ToolCallRequest,
        _live: LiveOutputSink,
        _cancel: CancellationToken,
    ) -> ToolCallResponse {
        let tool_call = ToolCall { id: call.call_id.clone(), name: call.tool_name.clone(), args: call.args.clone() };
        let output = self.registry.execute(&tool_call).await;
        if output.is_error {
            ToolCallResponse::error(output.content)
        } else {
            ToolCallResponse::success(output.content)
        }
    }
}

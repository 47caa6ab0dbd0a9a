// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{ToolCallRequest, ToolCallResponse};

/// Sink a [`ToolExecutor`] pushes incremental output chunks into while a
/// call is `Executing`. Cheap to clone; backed by an unbounded channel so a
/// slow observer never blocks tool execution.
#[derive(Clone)]
pub struct LiveOutputSink {
    call_id: String,
    tx: mpsc::UnboundedSender<(String, String)>,
}

impl LiveOutputSink {
    pub(crate) fn new(call_id: String, tx: mpsc::UnboundedSender<(String, String)>) -> Self {
        Self { call_id, tx }
    }

    /// Append a chunk to this call's live output. Silently dropped if the
    /// scheduler has already shut down.
    pub fn push(&self, chunk: impl Into<String>) {
        let _ = self.tx.send((self.call_id.clone(), chunk.into()));
    }
}

/// Bridges the scheduler's state machine to whatever actually runs tools —
/// a [`taskloom-tools`][taskloom_tools] registry, an MCP manager, or a test
/// double. The scheduler never executes a tool itself.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Arg-schema / existence check performed during the `Validating` state.
    /// `Err` moves the call straight to `Error` without ever executing it.
    async fn validate(&self, call: &ToolCallRequest) -> Result<(), String>;

    /// Whether this tool is in the destructive category declared by its
    /// definition metadata — consulted only under
    /// [`ApprovalMode::DefaultOnlyDestructive`][crate::ApprovalMode].
    fn is_destructive(&self, tool_name: &str) -> bool;

    /// Run the call. Implementations should periodically check `cancel` and
    /// return promptly — the scheduler also races this future against
    /// `cancel` itself, so a non-cooperative executor merely has its result
    /// discarded rather than leaking.
    async fn execute(
        &self,
        call: &ToolCallRequest,
        live: LiveOutputSink,
        cancel: CancellationToken,
    ) -> ToolCallResponse;
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// One tool invocation requested by the model for this turn.
///
/// `call_id` is a fresh opaque token per request and uniquely identifies the
/// [`ToolCallSnapshot`] for its entire lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
}

/// Left-to-right state machine, except `AwaitingApproval` which forks into
/// `Executing` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCallStatus {
    Scheduled,
    Validating,
    AwaitingApproval,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Success,
    Error,
    Cancelled,
}

/// Terminal outcome of a tool call.
#[derive(Debug, Clone)]
pub struct ToolCallResponse {
    pub kind: ResponseKind,
    pub display: String,
}

impl ToolCallResponse {
    pub fn success(display: impl Into<String>) -> Self {
        Self { kind: ResponseKind::Success, display: display.into() }
    }
    pub fn error(display: impl Into<String>) -> Self {
        Self { kind: ResponseKind::Error, display: display.into() }
    }
    pub fn cancelled(display: impl Into<String>) -> Self {
        Self { kind: ResponseKind::Cancelled, display: display.into() }
    }
}

/// Immutable snapshot of one tracked call, handed to observers and, on
/// batch completion, to the caller.
#[derive(Debug, Clone)]
pub struct ToolCallSnapshot {
    pub request: ToolCallRequest,
    pub status: ToolCallStatus,
    pub response_submitted: bool,
    pub live_output: Option<String>,
    pub confirmation_details: Option<String>,
    pub response: Option<ToolCallResponse>,
}

impl ToolCallSnapshot {
    pub(crate) fn scheduled(request: ToolCallRequest) -> Self {
        Self {
            request,
            status: ToolCallStatus::Scheduled,
            response_submitted: false,
            live_output: None,
            confirmation_details: None,
            response: None,
        }
    }
}

/// Approval policy selecting which calls require interactive confirmation.
/// The destructive-tool predicate is supplied by the [`crate::ToolExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Never ask; every validated call proceeds straight to execution.
    Auto,
    /// Ask before every call.
    Interactive,
    /// Ask only for calls the executor marks destructive.
    DefaultOnlyDestructive,
}

/// Events emitted by the scheduler as calls progress. Mirrors this
/// codebase's `AgentEvent` / `ManagerEvent` channel convention.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A chunk of live output was appended to an executing call.
    OutputUpdate { call_id: String, chunk: String },
    /// The full set of tracked calls changed (any transition).
    ToolCallsUpdate(Vec<ToolCallSnapshot>),
    /// Every call in one `schedule()` batch reached a terminal status.
    AllToolCallsComplete(Vec<ToolCallSnapshot>),
}

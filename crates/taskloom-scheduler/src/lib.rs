// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool Scheduler: per-call state machine (`scheduled → validating →
//! awaiting_approval? → executing → success|error|cancelled`) bounded by
//! `maxParallel`, with cancellation, live output, and confirmation policy.
//!
//! The scheduler never executes a tool itself — it drives the state machine
//! around whatever [`ToolExecutor`] the caller supplies, so the same crate
//! serves both the local `taskloom-tools` registry and the MCP manager.

mod approval;
mod executor;
mod registry_executor;
mod scheduler;
mod types;

pub use approval::{AlwaysApprove, Approver};
pub use executor::{LiveOutputSink, ToolExecutor};
pub use registry_executor::RegistryExecutor;
pub use scheduler::{Scheduler, SchedulerError, DEFAULT_CALL_TIMEOUT};
pub use types::{
    ApprovalMode, ResponseKind, SchedulerEvent, ToolCallRequest, ToolCallResponse,
    ToolCallSnapshot, ToolCallStatus,
};

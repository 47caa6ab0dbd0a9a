// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! One [`McpClient`] owns one tool-provider child process and speaks
//! newline-delimited JSON-RPC 2.0 over its stdin/stdout. stderr is captured
//! only for diagnostic logging.
//!
//! # Framing
//!
//! A background task owns the process's stdout, reads one JSON value per
//! line, and either resolves a `oneshot` sender stored in `pending` (keyed by
//! the JSON-RPC `id`) or forwards an `id`-less frame as a [`Notification`]
//! over an `mpsc` channel. Outbound writes go through a `Mutex`-guarded stdin
//! handle so concurrent requests never interleave partial JSON lines.
//!
//! # Failure semantics
//!
//! `invokeTool` never throws: any failure — connection not established,
//! malformed response, timeout, process exit — resolves to a
//! [`FallbackResult`] instead. Malformed frames on the read side are logged
//! and skipped; the connection itself stays up.

mod process;
mod protocol;

pub use process::{ConnectError, McpClient};
pub use protocol::{FallbackResult, Notification, ServerConfig, ToolDefinition};

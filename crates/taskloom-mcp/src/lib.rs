// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The MCP Manager owns the lifecycle of every configured tool-provider
//! process and presents one aggregated catalog to the rest of the runtime.
//! The Dynamic Tool Selector narrows that catalog to a provider-sized subset
//! for a given turn.

pub mod executor;
pub mod manager;
pub mod selector;

pub use executor::McpExecutor;
pub use manager::{ManagerEvent, McpManager, ServerStatus};
pub use selector::{is_tool_limit_error, DynamicToolSelector};

pub use taskloom_mcp_client::{FallbackResult, Notification, ServerConfig, ToolDefinition};

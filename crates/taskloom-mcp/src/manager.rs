// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, instrument, warn};

use taskloom_mcp_client::{FallbackResult, McpClient, Notification, ServerConfig, ToolDefinition};
use taskloom_retry::{with_retry, RetryOptions, RetryToken};

/// Lifecycle status of one configured MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Starting,
    Ready,
    Failed,
}

/// Progress and catalog-change notifications emitted by [`McpManager::initialize`].
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    InitializationStarted { server_count: usize },
    ServerInitialized { name: String, tool_count: usize },
    ServerStatusUpdated { name: String, status: ServerStatus, error: Option<String> },
}

struct ServerEntry {
    client: McpClient,
    status: ServerStatus,
}

/// Holds `{name → MCPClient}` and `{toolName → serverName}`. Initialization
/// of the configured servers runs in parallel; a subset failing to start
/// does not fail the whole manager.
pub struct McpManager {
    clients: RwLock<HashMap<String, ServerEntry>>,
    tool_owner: RwLock<HashMap<String, String>>,
    default_server: Option<String>,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl McpManager {
    pub fn new(default_server: Option<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            tool_owner: RwLock::new(HashMap::new()),
            default_server,
            events: tx,
        });
        (manager, rx)
    }

    /// Start every configured server in parallel. Connection failures are
    /// reported via [`ManagerEvent::ServerStatusUpdated`] but never abort the
    /// initialization of the remaining servers.
    #[instrument(skip(self, configs))]
    pub async fn initialize(self: &Arc<Self>, configs: &HashMap<String, ServerConfig>) {
        let _ = self.events.send(ManagerEvent::InitializationStarted { server_count: configs.len() });

        let futures = configs.iter().map(|(name, config)| {
            let manager = self.clone();
            let name = name.clone();
            let config = config.clone();
            async move { manager.start_one(name, config).await }
        });

        futures::future::join_all(futures).await;
    }

    async fn start_one(self: &Arc<Self>, name: String, config: ServerConfig) {
        let opts = RetryOptions { max_retries: 2, base_delay: Duration::from_millis(500), exponential_backoff: true, timeout: Duration::from_secs(10) };
        let token = RetryToken::new();

        let outcome = with_retry(&opts, &token, |_: &anyhow::Error| true, {
            let name = name.clone();
            let config = config.clone();
            move || {
                let name = name.clone();
                let config = config.clone();
                async move {
                    McpClient::connect(name, &config).await.map_err(|e| anyhow::anyhow!(e.to_string()))
                }
            }
        })
        .await;

        match outcome {
            Ok(outcome) => {
                let (client, mut notifications) = outcome.value;
                let tools = client.list_tools().await;
                let tool_count = tools.len();

                {
                    let mut owner = self.tool_owner.write().await;
                    for t in &tools {
                        if let Some(prior) = owner.insert(t.name.clone(), name.clone()) {
                            if prior != name {
                                warn!(tool = %t.name, prior_server = %prior, new_server = %name, "tool name collision, last-writer-wins");
                            }
                        }
                    }
                }

                self.clients.write().await.insert(name.clone(), ServerEntry { client, status: ServerStatus::Ready });
                info!(server = %name, tool_count, "mcp server initialized");
                let _ = self.events.send(ManagerEvent::ServerInitialized { name: name.clone(), tool_count });
                let _ = self.events.send(ManagerEvent::ServerStatusUpdated { name: name.clone(), status: ServerStatus::Ready, error: None });

                // Drain unsolicited notifications on a detached task; the manager
                // has no subscriber registry for them yet, only logs.
                tokio::spawn(async move {
                    while let Some(Notification { method, .. }) = notifications.recv().await {
                        tracing::debug!(server = %name, %method, "mcp notification");
                    }
                });
            }
            Err(e) => {
                warn!(server = %name, error = %e, "mcp server failed to initialize");
                let _ = self.events.send(ManagerEvent::ServerStatusUpdated { name, status: ServerStatus::Failed, error: Some(e.to_string()) });
            }
        }
    }

    /// Union of every connected client's catalog.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let clients = self.clients.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for entry in clients.values() {
            if entry.status != ServerStatus::Ready {
                continue;
            }
            for tool in entry.client.list_tools().await {
                if seen.insert(tool.name.clone()) {
                    out.push(tool);
                }
            }
        }
        out
    }

    /// Dispatch by owning server; falls back to the configured default
    /// server when the tool name is unknown, else returns a fallback result.
    pub async fn invoke_tool(&self, tool_name: &str, args: Value, timeout: Duration) -> Result<Value, FallbackResult> {
        let server_name = {
            let owner = self.tool_owner.read().await;
            owner.get(tool_name).cloned().or_else(|| self.default_server.clone())
        };

        let Some(server_name) = server_name else {
            return Err(FallbackResult::new(tool_name, "no server owns this tool and no default is configured", false));
        };

        let clients = self.clients.read().await;
        match clients.get(&server_name) {
            Some(entry) if entry.status == ServerStatus::Ready => entry.client.invoke_tool(tool_name, args, timeout).await,
            Some(_) => Err(FallbackResult::new(tool_name, format!("server {server_name} is not ready"), true)),
            None => Err(FallbackResult::new(tool_name, format!("unknown server {server_name}"), false)),
        }
    }

    /// Tear down and re-initialize a single client.
    pub async fn restart_server(self: &Arc<Self>, name: &str, config: &ServerConfig) {
        if let Some(entry) = self.clients.write().await.remove(name) {
            entry.client.disconnect().await;
        }
        let _ = self.events.send(ManagerEvent::ServerStatusUpdated { name: name.to_string(), status: ServerStatus::Starting, error: None });
        self.start_one(name.to_string(), config.clone()).await;
    }

    pub async fn status(&self, name: &str) -> Option<ServerStatus> {
        self.clients.read().await.get(name).map(|e| e.status.clone())
    }
}

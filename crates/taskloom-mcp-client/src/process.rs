// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};

use taskloom_retry::{with_retry, RetryOptions, RetryToken};

use crate::protocol::{FallbackResult, Notification, RawFrame, Request, ServerConfig, ToolDefinition};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to spawn provider process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("provider did not respond to initialize: {0}")]
    Handshake(String),
}

type Pending = HashMap<u64, oneshot::Sender<Result<Value, String>>>;

struct Inner {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    connected: AtomicBool,
    child: Mutex<Option<Child>>,
    notifications: mpsc::UnboundedSender<Notification>,
}

/// One connection to one tool-provider process.
///
/// Construct with [`McpClient::connect`]. Cloning shares the underlying
/// connection; the process and its reader/writer tasks are torn down when
/// [`McpClient::disconnect`] is called or the process exits on its own.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<Inner>,
}

impl McpClient {
    /// Spawn `config.command` and perform the `initialize` handshake.
    #[instrument(skip(config), fields(server = %name))]
    pub async fn connect(
        name: impl Into<String>,
        config: &ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), ConnectError> {
        let name = name.into();
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(ConnectError::Spawn)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (notif_tx, notif_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            name: name.clone(),
            stdin: Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            child: Mutex::new(Some(child)),
            notifications: notif_tx,
        });

        spawn_stdout_reader(inner.clone(), stdout);
        spawn_stderr_reader(inner.clone(), stderr);
        spawn_exit_watcher(inner.clone());

        let client = Self { inner };

        client
            .request("initialize", serde_json::json!({"protocolVersion": "2024-11-05"}), DEFAULT_REQUEST_TIMEOUT)
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        info!(server = %name, "mcp server connected");
        Ok((client, notif_rx))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// `tools/list` — empty on any failure, never throws.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        if !self.is_connected() {
            return Vec::new();
        }
        match self.request("tools/list", serde_json::json!({}), DEFAULT_REQUEST_TIMEOUT).await {
            Ok(value) => serde_json::from_value::<ToolsListResult>(value)
                .map(|r| r.tools)
                .unwrap_or_default(),
            Err(e) => {
                warn!(server = %self.inner.name, error = %e, "tools/list failed");
                Vec::new()
            }
        }
    }

    /// `tools/call` — returns the provider's JSON verbatim on success, or a
    /// [`FallbackResult`] instead of throwing on any failure.
    pub async fn invoke_tool(
        &self,
        tool_name: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, FallbackResult> {
        if tool_name.is_empty() {
            return Err(FallbackResult::new(tool_name, "empty tool name", false));
        }
        if !self.is_connected() {
            return Err(FallbackResult::new(tool_name, "not connected", true));
        }

        match self
            .request("tools/call", serde_json::json!({"name": tool_name, "arguments": args}), timeout)
            .await
        {
            Ok(value) => Ok(value),
            Err(e) => Err(FallbackResult::new(tool_name, e.to_string(), true)),
        }
    }

    /// Best-effort `shutdown`, then kill the process group if it outlives
    /// [`SHUTDOWN_GRACE`].
    pub async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let _ = self.request("shutdown", serde_json::json!({}), Duration::from_millis(500)).await;

        let mut guard = self.inner.child.lock().await;
        if let Some(mut child) = guard.take() {
            let waited = tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await;
            if waited.is_err() {
                let _ = child.kill().await;
            }
        }
        drain_pending(&self.inner, "disconnected").await;
    }

    async fn request(&self, method: &str, params: Value, timeout: Duration) -> anyhow::Result<Value> {
        let opts = RetryOptions { max_retries: 0, base_delay: Duration::ZERO, exponential_backoff: false, timeout };
        let token = RetryToken::new();
        let inner = self.inner.clone();
        let method = method.to_string();

        let outcome = with_retry(&opts, &token, |_: &anyhow::Error| false, move || {
            let inner = inner.clone();
            let method = method.clone();
            let params = params.clone();
            async move { send_one(&inner, &method, params).await }
        })
        .await;

        match outcome {
            Ok(o) => Ok(o.value),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }
}

async fn send_one(inner: &Arc<Inner>, method: &str, params: Value) -> anyhow::Result<Value> {
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    inner.pending.lock().await.insert(id, tx);

    let req = Request { jsonrpc: "2.0", id, method, params };
    let mut line = serde_json::to_string(&req)?;
    line.push('\n');

    {
        let mut guard = inner.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => stdin.write_all(line.as_bytes()).await?,
            None => {
                inner.pending.lock().await.remove(&id);
                anyhow::bail!("stdin closed");
            }
        }
    }

    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => anyhow::bail!(message),
        Err(_) => anyhow::bail!("request dropped before a response arrived"),
    }
}

fn spawn_stdout_reader(inner: Arc<Inner>, stdout: tokio::process::ChildStdout) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RawFrame>(&line) {
                        Ok(frame) => dispatch_frame(&inner, frame).await,
                        Err(e) => warn!(server = %inner.name, error = %e, "malformed MCP frame, ignoring"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %inner.name, error = %e, "stdout read error");
                    break;
                }
            }
        }
        inner.connected.store(false, Ordering::SeqCst);
        drain_pending(&inner, "provider closed stdout").await;
    });
}

async fn dispatch_frame(inner: &Arc<Inner>, frame: RawFrame) {
    let Some(id) = frame.id else {
        if let Some(method) = frame.method {
            let _ = inner.notifications.send(Notification { method, params: frame.params });
        }
        return;
    };

    if let Some(tx) = inner.pending.lock().await.remove(&id) {
        let result = match frame.error {
            Some(err) => Err(err.message),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }
}

fn spawn_stderr_reader(inner: Arc<Inner>, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %inner.name, "mcp stderr: {line}");
        }
    });
}

fn spawn_exit_watcher(inner: Arc<Inner>) {
    tokio::spawn(async move {
        let status = {
            let mut guard = inner.child.lock().await;
            match guard.as_mut() {
                Some(child) => Some(child.wait().await),
                None => None,
            }
        };
        if let Some(status) = status {
            inner.connected.store(false, Ordering::SeqCst);
            debug!(server = %inner.name, ?status, "provider process exited");
            drain_pending(&inner, "provider process exited").await;
        }
    });
}

async fn drain_pending(inner: &Arc<Inner>, reason: &str) {
    let mut pending = inner.pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(reason.to_string()));
    }
}

#[derive(serde::Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

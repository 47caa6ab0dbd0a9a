// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod tool_executor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use taskloom_core::{
    decompose, generate_execution_plan, priority, ChatMessage, ChatRole, EngineEvent,
    ExecutionEngine, ExecutionOptions, Session, SessionStore, Task,
};
use taskloom_mcp::McpManager;
use taskloom_mcp_client::ToolDefinition;
use taskloom_memory::{InProcessMemoryStore, MemoryStore};
use taskloom_runtime::{discover_presets, find_project_root, recommend_agent, AgentPreset};
use taskloom_scheduler::Scheduler;
use taskloom_tools::{
    DeleteFileTool, EditFileTool, FindFileTool, GlobTool, GrepTool, ListDirTool, ReadFileTool, ShellTool, ToolRegistry,
    WriteTool,
};

use cli::{Cli, Commands, SessionAction};
use tool_executor::{CompositeExecutor, ATTENDED_APPROVAL, DEFAULT_MAX_PARALLEL, HEADLESS_APPROVAL};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    cli.silent = cli.silent || std::env::var("AGENTS_SILENT").is_ok();
    init_tracing(cli.silent);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "taskloom failed");
            1
        }
    };
    std::process::exit(code);
}

// Keeps the non-blocking file writer alive for the process lifetime when
// `AGENTS_LOG_DIR` is set; otherwise unused.
static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

fn init_tracing(silent: bool) {
    let filter = || {
        EnvFilter::try_from_env("AGENTS_LOG_LEVEL")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(if silent { "warn" } else { "info" }))
    };

    match std::env::var_os("AGENTS_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "taskloom.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn project_root() -> PathBuf {
    find_project_root().unwrap_or_else(|_| std::env::current_dir().unwrap_or_default())
}

fn sessions_root(root: &Path) -> PathBuf {
    root.join(".agents").join("sessions")
}

fn agents_dir(root: &Path) -> PathBuf {
    root.join(".agents").join("agents")
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Task { description, max_iterations } => cmd_task(&cli, description, max_iterations).await,
        Commands::Auto { prompt, max_parallel } => cmd_auto(&cli, prompt, max_parallel).await,
        Commands::Repl => cmd_repl(&cli).await,
        Commands::Watch { path } => cmd_watch(&cli, path).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Session { action } => cmd_session(action).await,
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(0)
        }
        Commands::ShowConfig => {
            let config = taskloom_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(0)
        }
    }
}

// ─── init ─────────────────────────────────────────────────────────────────

async fn cmd_init() -> anyhow::Result<i32> {
    let root = project_root();
    tokio::fs::create_dir_all(sessions_root(&root)).await.context("creating .agents/sessions")?;
    tokio::fs::create_dir_all(agents_dir(&root)).await.context("creating .agents/agents")?;

    let config_path = root.join(".agents.yaml");
    if !config_path.is_file() {
        let example = taskloom_config::Config::default();
        tokio::fs::write(&config_path, serde_yaml::to_string(&example)?).await?;
        info!(path = %config_path.display(), "wrote example config");
    }

    let preset_path = agents_dir(&root).join("general-purpose.md");
    if !preset_path.is_file() {
        let body = "---\nname: general-purpose\ndescription: Handles any task with no specialized preset match.\n---\nYou are a careful, autonomous coding agent. Work step by step and verify your changes.\n";
        tokio::fs::write(&preset_path, body).await?;
    }

    println!("initialized {}", root.display());
    Ok(0)
}

// ─── composition helpers ─────────────────────────────────────────────────

struct Runtime {
    engine: Arc<ExecutionEngine>,
    catalog: Vec<ToolDefinition>,
    presets: Vec<AgentPreset>,
    max_tokens: usize,
    sessions_root: PathBuf,
}

async fn build_runtime(cli: &Cli, approval: taskloom_scheduler::ApprovalMode, max_parallel: usize) -> anyhow::Result<Runtime> {
    let root = project_root();
    let config = taskloom_config::load(cli.config.as_deref())?;

    let model_cfg = match &cli.model {
        Some(m) => taskloom_model::resolve_model_from_config(&config, m),
        None => config.model.clone(),
    };
    let provider: Arc<dyn taskloom_model::ModelProvider> = Arc::from(taskloom_model::from_config(&model_cfg)?);
    let max_tokens = provider.catalog_context_window().map(|w| w as usize).unwrap_or(128_000);

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(EditFileTool);
    registry.register(DeleteFileTool);
    registry.register(ListDirTool);
    registry.register(FindFileTool);
    registry.register(GlobTool);
    registry.register(GrepTool);
    registry.register(ShellTool { timeout_secs: config.tools.timeout_secs });
    let registry = Arc::new(registry);

    let (mcp_manager, _mcp_events) = McpManager::new(config.mcp.default_server.clone());
    if std::env::var_os("AGENTS_DISABLE_MCP").is_none() {
        mcp_manager.initialize(&config.mcp.servers).await;
    } else {
        info!("AGENTS_DISABLE_MCP set; skipping MCP server startup");
    }

    let mcp_tools = mcp_manager.list_tools().await;
    let mut catalog: Vec<ToolDefinition> = registry
        .schemas()
        .into_iter()
        .map(|s| ToolDefinition { name: s.name, description: s.description, parameters: s.parameters })
        .collect();
    let local_names: std::collections::HashSet<String> = catalog.iter().map(|t| t.name.clone()).collect();
    catalog.extend(mcp_tools.into_iter().filter(|t| !local_names.contains(&t.name)));

    let executor: Arc<dyn taskloom_scheduler::ToolExecutor> = Arc::new(CompositeExecutor::new(registry.clone(), mcp_manager));
    let (scheduler, mut scheduler_events) = Scheduler::new(executor, max_parallel, approval);
    tokio::spawn(async move { while scheduler_events.recv().await.is_some() {} });

    let memory: Arc<dyn MemoryStore> = match &config.tools.memory.memory_file {
        Some(path) => Arc::new(InProcessMemoryStore::open(path.clone()).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to open memory store, starting fresh");
            InProcessMemoryStore::new()
        })),
        None => Arc::new(InProcessMemoryStore::new()),
    };

    let engine = Arc::new(ExecutionEngine::new(provider, memory, scheduler, approval));
    let presets = discover_presets(Some(root.as_path()), None);

    Ok(Runtime { engine, catalog, presets, max_tokens, sessions_root: sessions_root(&root) })
}

async fn persist_turn(store: &SessionStore, prompt: &str, result: &str) {
    store.append_message(ChatMessage::new(ChatRole::User, prompt, chrono::Utc::now())).await;
    store.append_message(ChatMessage::new(ChatRole::Assistant, result, chrono::Utc::now())).await;
    if let Err(e) = store.save().await {
        warn!(error = %e, "failed to persist session");
    }
}

fn spawn_event_logger(mut rx: tokio::sync::mpsc::UnboundedReceiver<EngineEvent>, silent: bool) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if silent {
                continue;
            }
            match event {
                EngineEvent::IterationStarted { iteration } => info!(iteration, "turn started"),
                EngineEvent::TextDelta(text) => println!("{text}"),
                EngineEvent::ToolCallsScheduled { count } => info!(count, "tool calls scheduled"),
                EngineEvent::ToolCallCompleted { tool_name, is_error, .. } => {
                    info!(tool = %tool_name, is_error, "tool call completed")
                }
                EngineEvent::ContextCompacted { tokens_before, tokens_after } => {
                    info!(tokens_before, tokens_after, "context compacted")
                }
                EngineEvent::TokenUsage { input, output } => info!(input, output, "token usage"),
                EngineEvent::IterationComplete { iteration } => info!(iteration, "turn complete"),
                EngineEvent::Completion { reason } => info!(?reason, "run complete"),
            }
        }
    });
}

// ─── task ─────────────────────────────────────────────────────────────────

async fn cmd_task(cli: &Cli, description: String, max_iterations: u32) -> anyhow::Result<i32> {
    let rt = build_runtime(cli, ATTENDED_APPROVAL, DEFAULT_MAX_PARALLEL).await?;
    let mut session = Session::new(rt.max_tokens);
    let store = SessionStore::new(&rt.sessions_root, session.id.clone());

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    spawn_event_logger(rx, cli.silent);

    let mut opts = ExecutionOptions::default();
    if max_iterations > 0 {
        opts.max_iterations = max_iterations;
    }
    opts.require_human_approval = false;

    let outcome = rt
        .engine
        .execute_until_complete(&mut session, &description, &rt.catalog, opts, tokio_util::sync::CancellationToken::new(), tx)
        .await;

    persist_turn(&store, &description, &outcome.final_result).await;
    println!("{}", outcome.final_result);
    Ok(exit_code_for(outcome.completion_reason))
}

fn exit_code_for(reason: taskloom_core::CompletionReason) -> i32 {
    match reason {
        taskloom_core::CompletionReason::Completed => 0,
        taskloom_core::CompletionReason::IterationCap | taskloom_core::CompletionReason::Cancelled => 1,
    }
}

// ─── auto ─────────────────────────────────────────────────────────────────

async fn cmd_auto(cli: &Cli, prompt: String, max_parallel: usize) -> anyhow::Result<i32> {
    let rt = build_runtime(cli, HEADLESS_APPROVAL, max_parallel).await?;
    let store = SessionStore::new(&rt.sessions_root, uuid::Uuid::new_v4().to_string());

    let descriptions = decompose(&prompt);
    let tasks: Vec<Task> = descriptions
        .iter()
        .enumerate()
        .map(|(i, desc)| Task { id: i as u64 + 1, description: desc.clone(), priority: priority(desc), dependencies: vec![] })
        .collect();

    let plan = generate_execution_plan(&tasks, &rt.presets);
    info!(groups = plan.groups.len(), total_agents = plan.total_agents, "execution plan generated");
    for task in &tasks {
        let m = recommend_agent(&task.description, &rt.presets);
        info!(task = task.id, agent = %m.agent_name, confidence = m.confidence, "agent matched");
    }

    let mut worst = taskloom_core::CompletionReason::Completed;
    let mut combined = String::new();

    for group in &plan.groups {
        let results = if group.can_run_in_parallel {
            let futures = group.tasks.iter().map(|task| run_one_task(&rt, task, cli.silent));
            futures::future::join_all(futures).await
        } else {
            let mut seq = Vec::with_capacity(group.tasks.len());
            for task in &group.tasks {
                seq.push(run_one_task(&rt, task, cli.silent).await);
            }
            seq
        };

        for (task, (reason, text)) in group.tasks.iter().zip(results.into_iter()) {
            combined.push_str(&format!("## {}\n{}\n\n", task.description, text));
            if !matches!(reason, taskloom_core::CompletionReason::Completed) {
                worst = reason;
            }
        }
    }

    persist_turn(&store, &prompt, &combined).await;
    println!("{combined}");
    Ok(exit_code_for(worst))
}

async fn run_one_task(rt: &Runtime, task: &Task, silent: bool) -> (taskloom_core::CompletionReason, String) {
    let mut session = Session::new(rt.max_tokens);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    spawn_event_logger(rx, silent);
    let outcome = rt
        .engine
        .execute_until_complete(
            &mut session,
            &task.description,
            &rt.catalog,
            ExecutionOptions::default(),
            tokio_util::sync::CancellationToken::new(),
            tx,
        )
        .await;
    (outcome.completion_reason, outcome.final_result)
}

// ─── repl ─────────────────────────────────────────────────────────────────

async fn cmd_repl(cli: &Cli) -> anyhow::Result<i32> {
    let rt = build_runtime(cli, ATTENDED_APPROVAL, DEFAULT_MAX_PARALLEL).await?;
    let store = SessionStore::new(&rt.sessions_root, uuid::Uuid::new_v4().to_string());
    let mut session = Session::new(rt.max_tokens);

    println!("taskloom repl — type a task, or 'exit' to quit.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        use std::io::Write as _;
        std::io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_event_logger(rx, cli.silent);
        let outcome = rt
            .engine
            .execute_until_complete(
                &mut session,
                line,
                &rt.catalog,
                ExecutionOptions::default(),
                tokio_util::sync::CancellationToken::new(),
                tx,
            )
            .await;
        persist_turn(&store, line, &outcome.final_result).await;
        println!("{}", outcome.final_result);
    }
    Ok(0)
}

// ─── watch ────────────────────────────────────────────────────────────────

async fn cmd_watch(cli: &Cli, path: Option<PathBuf>) -> anyhow::Result<i32> {
    use notify::{RecursiveMode, Watcher};

    let watch_path = path.unwrap_or_else(project_root);
    let rt = build_runtime(cli, HEADLESS_APPROVAL, DEFAULT_MAX_PARALLEL).await?;
    let store = SessionStore::new(&rt.sessions_root, uuid::Uuid::new_v4().to_string());

    let (change_tx, mut change_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let thread_path = watch_path.clone();
    std::thread::spawn(move || {
        let (fs_tx, fs_rx) = std::sync::mpsc::channel();
        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = fs_tx.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to start file watcher");
                return;
            }
        };
        if let Err(e) = watcher.watch(&thread_path, RecursiveMode::Recursive) {
            error!(error = %e, path = %thread_path.display(), "failed to watch path");
            return;
        }
        for res in fs_rx {
            if res.is_ok() && change_tx.send(()).is_err() {
                break;
            }
        }
    });

    info!(path = %watch_path.display(), "watching for changes; Ctrl-C to stop");
    let task_description = "Review the files that changed and fix any obvious issues.".to_string();

    while change_rx.recv().await.is_some() {
        info!("change detected, re-running task");
        let mut session = Session::new(rt.max_tokens);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_event_logger(rx, cli.silent);
        let outcome = rt
            .engine
            .execute_until_complete(
                &mut session,
                &task_description,
                &rt.catalog,
                ExecutionOptions::default(),
                tokio_util::sync::CancellationToken::new(),
                tx,
            )
            .await;
        persist_turn(&store, &task_description, &outcome.final_result).await;
    }
    Ok(0)
}

// ─── status ───────────────────────────────────────────────────────────────

async fn cmd_status(cli: &Cli) -> anyhow::Result<i32> {
    let config = taskloom_config::load(cli.config.as_deref())?;
    println!("model provider: {}", config.model.provider);
    println!("model name: {}", config.model.name);
    println!("mcp servers configured: {}", config.mcp.servers.len());

    let root = project_root();
    let sessions = sessions_root(&root);
    let mut count = 0usize;
    if sessions.is_dir() {
        let mut entries = tokio::fs::read_dir(&sessions).await?;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
    }
    println!("sessions recorded: {count}");
    Ok(0)
}

// ─── session ──────────────────────────────────────────────────────────────

async fn cmd_session(action: SessionAction) -> anyhow::Result<i32> {
    let root = project_root();
    let sessions = sessions_root(&root);

    match action {
        SessionAction::List => {
            if !sessions.is_dir() {
                println!("no sessions recorded");
                return Ok(0);
            }
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&sessions).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
            }
            names.sort();
            for name in names {
                println!("{name}");
            }
            Ok(0)
        }
        SessionAction::View { session_id } => {
            let dir = resolve_session_dir(&sessions, &session_id).await?;
            let store = SessionStore::open(dir).await.context("opening session")?;
            for msg in store.load_history().await {
                println!("[{:?}] {}", msg.role, msg.content);
            }
            Ok(0)
        }
        SessionAction::Restore { session_id } => {
            let dir = resolve_session_dir(&sessions, &session_id).await?;
            let marker = sessions.join("current");
            tokio::fs::write(&marker, dir.to_string_lossy().as_bytes()).await?;
            println!("restored {}", dir.display());
            Ok(0)
        }
        SessionAction::Current => {
            let marker = sessions.join("current");
            match tokio::fs::read_to_string(&marker).await {
                Ok(path) => println!("{path}"),
                Err(_) => println!("no current session"),
            }
            Ok(0)
        }
    }
}

async fn resolve_session_dir(sessions_root: &Path, session_id: &str) -> anyhow::Result<PathBuf> {
    let direct = sessions_root.join(session_id);
    if direct.is_dir() {
        return Ok(direct);
    }
    let mut entries = tokio::fs::read_dir(sessions_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(session_id) {
            return Ok(entry.path());
        }
    }
    anyhow::bail!("no session matching {session_id:?} found under {}", sessions_root.display())
}

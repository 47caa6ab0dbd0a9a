// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Command-line surface: `init`, `task`, `auto`, `repl`, `watch`,
//! `status`, `session {list,view,restore,current}`, plus the ambient
//! `completions` / `show-config` commands.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(name = "taskloom", about = "Autonomous coding-agent orchestration runtime", version)]
pub struct Cli {
    /// Explicit config file, merged on top of the discovered layers.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured model (`provider/name`, a bare provider id,
    /// or a bare model name — see `taskloom_model::resolve_model_from_config`).
    #[arg(long, short = 'm', global = true, env = "AGENTS_MODEL")]
    pub model: Option<String>,

    /// Suppress progress output; only the final result and exit code matter.
    /// Also honored via the `AGENTS_SILENT` environment variable.
    #[arg(long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold `.agents/` (sessions dir, default agent presets, example config).
    Init,

    /// Decompose one task description and run it to completion.
    Task {
        /// Natural-language description of the task.
        description: String,
        /// Cap on engine iterations before giving up (0 = engine default).
        #[arg(long, default_value_t = 0)]
        max_iterations: u32,
    },

    /// Run the full decompose → match → plan → execute pipeline over a prompt
    /// that may describe several independent pieces of work.
    Auto {
        /// Natural-language prompt, possibly naming multiple sub-tasks.
        prompt: String,
        /// Upper bound on tool calls running at once, across all groups.
        #[arg(long, default_value_t = 4)]
        max_parallel: usize,
    },

    /// Interactive read-eval-print loop over the same engine used by `task`.
    Repl,

    /// Watch the workspace for file changes and re-run the last task on each change.
    Watch {
        /// Directory to watch; defaults to the current project root.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Print a one-shot snapshot of configured providers, MCP servers, and
    /// the most recent session.
    Status,

    /// Inspect and manage persisted sessions under `.agents/sessions/`.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the fully merged configuration as YAML.
    ShowConfig,
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// List every persisted session under the sessions root, newest first.
    List,
    /// Print one session's full message history.
    View {
        /// Session directory name (`<date>_<sessionId>`) or bare session id.
        session_id: String,
    },
    /// Resume a prior session as the active one for the next `task`/`repl` run.
    Restore { session_id: String },
    /// Print the id of the session that would be resumed by default.
    Current,
}

impl Cli {
    pub fn command() -> clap::Command {
        <Self as CommandFactory>::command()
    }
}

/// Render `shell`'s completion script for this binary to stdout.
pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

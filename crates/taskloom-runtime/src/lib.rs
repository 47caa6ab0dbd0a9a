// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-preset registry and project-root discovery.
//!
//! `find_project_root` is the one piece of environment detection the
//! orchestration core actually consumes — presets and sessions are rooted
//! under it (`./.agents/agents`, `./.agents/sessions`). Git/CI context
//! collection and workspace-tooling discovery belong to an interactive
//! front end, not to this headless core.

use std::path::PathBuf;

use anyhow::Result;

mod agents;
mod shared;

pub use agents::{discover_presets, recommend_agent, AgentPreset, SharedAgents, TaskAgentMatch, GENERAL_PURPOSE};
pub use shared::Shared;

/// Walk up the directory tree from the current working directory until a
/// `.git` directory is found.  Returns the canonicalized path to that
/// directory.  If no `.git` is found, returns `canonicalize(current_dir())`.
pub fn find_project_root() -> Result<PathBuf> {
    let start = std::env::current_dir()?;
    let mut current = start.as_path();

    loop {
        if current.join(".git").exists() {
            return Ok(std::fs::canonicalize(current)?);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    Ok(std::fs::canonicalize(&start)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_project_root_returns_a_directory() {
        let root = find_project_root().expect("find_project_root should not fail");
        assert!(root.is_dir(), "project root should be a directory");
    }
}

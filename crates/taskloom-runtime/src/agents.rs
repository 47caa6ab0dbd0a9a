// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-preset discovery and matching.
//!
//! A preset is a specialized agent persona defined as a markdown file with
//! YAML frontmatter: a name, a description used for task matching, an
//! optional model override, and an optional comma-separated tool allowlist.
//!
//! ## File locations (lowest → highest precedence)
//!
//! ```text
//! <install>/presets/*.md      built-in presets shipped with the binary
//! ./.agents/agents/*.md       project-local overrides
//! ~/.agents/agents/*.md       user-global overrides
//! ```
//!
//! Each directory is scanned non-recursively (one level of `*.md`); a later
//! source overrides an earlier one on name collision. A `general-purpose`
//! preset is always present — if none of the three sources define one, a
//! built-in fallback is synthesised so `recommend_agent` always has a preset
//! to fall back to.
//!
//! ## File format
//!
//! ```markdown
//! ---
//! name: backend-architect
//! description: Design RESTful APIs, service boundaries, and data models.
//! model: inherit
//! tools: read_file, write_file, run_command
//! ---
//!
//! You are a backend architect...
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::shared::Shared;

/// Name of the mandatory fallback preset returned when nothing else matches.
pub const GENERAL_PURPOSE: &str = "general-purpose";

/// Size cap matched to the skill/knowledge loaders' oversized-file guard.
const MAX_PRESET_FILE_BYTES: u64 = 256 * 1024;

// ── Public types ──────────────────────────────────────────────────────────────

/// A discovered agent preset.
#[derive(Clone, Debug)]
pub struct AgentPreset {
    /// Unique name, matched against direct mentions in a task description.
    pub name: String,
    /// Scored against task text by keyword overlap in [`recommend_agent`].
    pub description: String,
    /// Model override: `None` or `"inherit"` means "use the current model".
    pub model: Option<String>,
    /// Tool names this preset is restricted to, `None` means unrestricted.
    pub tools: Option<Vec<String>>,
    /// System prompt body (everything after the closing `---` fence).
    pub content: String,
    /// Absolute path to the preset markdown file.
    pub preset_md_path: PathBuf,
}

/// A shared, live-refreshable collection of discovered presets.
pub type SharedAgents = Shared<AgentPreset>;

impl Shared<AgentPreset> {
    /// Re-run preset discovery and atomically replace the list.
    pub fn refresh(&self, project_root: Option<&Path>, install_dir: Option<&Path>) {
        self.set(discover_presets(project_root, install_dir));
    }
}

/// Result of matching a task description against the preset registry.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskAgentMatch {
    pub agent_name: String,
    pub confidence: f64,
    pub reasoning: String,
}

// ── Frontmatter schema ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PresetFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tools: Option<String>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

fn parse_preset_file(raw: &str, stem: &str, path: &Path) -> Option<AgentPreset> {
    let rest = raw.trim_start_matches('\n');

    let (fm, content) = if let Some(after_open) = rest.strip_prefix("---") {
        let close = after_open.find("\n---")?;
        let yaml_block = &after_open[..close];
        let body = after_open[close + 4..].trim_start_matches('\n').to_string();

        let fm: PresetFrontmatter = match serde_yaml::from_str(yaml_block) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse preset frontmatter — skipping");
                return None;
            }
        };
        (fm, body)
    } else {
        (PresetFrontmatter { name: None, description: None, model: None, tools: None }, rest.to_string())
    };

    let description = fm.description.filter(|d| !d.trim().is_empty()).unwrap_or_else(|| {
        content.lines().find(|l| !l.trim().is_empty()).unwrap_or(stem).trim_start_matches('#').trim().to_string()
    });
    if description.trim().is_empty() {
        return None;
    }

    let name = fm.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| stem.to_string());
    let model = fm.model.filter(|m| !m.trim().is_empty() && m.trim() != "inherit");
    let tools = fm.tools.map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect());

    Some(AgentPreset { name, description, model, tools, content, preset_md_path: path.to_path_buf() })
}

fn try_load_preset(path: &Path, source: &str) -> Option<AgentPreset> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_PRESET_FILE_BYTES {
        warn!(source, path = %path.display(), size, max = MAX_PRESET_FILE_BYTES, "skipping oversized preset file");
        return None;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("preset");

    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(source, path = %path.display(), error = %e, "failed to read preset file");
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }

    parse_preset_file(&raw, stem, path)
}

/// Non-recursive: one level of `*.md` files directly inside `dir`.
fn scan_presets_dir(dir: &Path, source: &str) -> Vec<(String, AgentPreset)> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("md")).unwrap_or(false))
        .filter_map(|path| {
            let key = path.file_stem().and_then(|s| s.to_str())?.to_string();
            try_load_preset(&path, source).map(|p| (key, p))
        })
        .collect()
}

fn builtin_general_purpose() -> AgentPreset {
    AgentPreset {
        name: GENERAL_PURPOSE.to_string(),
        description: "General-purpose agent for tasks that do not match a specialized preset."
            .to_string(),
        model: None,
        tools: None,
        content: "You are a capable general-purpose assistant. Handle the task directly using \
                  whatever tools are available."
            .to_string(),
        preset_md_path: PathBuf::from("<builtin>/general-purpose.md"),
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Discover agent presets from the three precedence sources: built-in,
/// project-local, then user-level, each overriding the last on a name clash.
///
/// `install_dir` is the directory containing the shipped `presets/` folder;
/// when `None`, built-in presets are skipped (only the synthesised
/// `general-purpose` fallback and any project/user overrides apply).
#[must_use]
pub fn discover_presets(project_root: Option<&Path>, install_dir: Option<&Path>) -> Vec<AgentPreset> {
    let mut map: HashMap<String, AgentPreset> = HashMap::new();

    if let Some(install) = install_dir {
        for (key, preset) in scan_presets_dir(&install.join("presets"), "builtin") {
            map.insert(key, preset);
        }
    }

    let project_dir = project_root.map(PathBuf::from).unwrap_or_else(|| {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    });
    for (key, preset) in scan_presets_dir(&project_dir.join(".agents").join("agents"), "project") {
        map.insert(key, preset);
    }

    if let Some(home) = dirs::home_dir() {
        for (key, preset) in scan_presets_dir(&home.join(".agents").join("agents"), "user") {
            map.insert(key, preset);
        }
    }

    map.entry(GENERAL_PURPOSE.to_string()).or_insert_with(builtin_general_purpose);

    let mut result: Vec<AgentPreset> = map.into_values().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

/// Lowercase, punctuation-stripped, deduplicated word tokens.
///
/// Shared tokenizer shape with the task decomposer and the memory store's
/// own scorer, so all three components agree on what "overlap" means.
fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Match one task description against the preset registry.
///
/// Direct mention of a preset's name in `task_description` forces selection
/// of that preset with confidence `1.0`. Otherwise each preset is scored by
/// keyword overlap between the task description and the preset's
/// description; the highest scorer wins. A max score of `0` falls back to
/// `general-purpose` with reasoning `"No specific match found"`.
#[must_use]
pub fn recommend_agent(task_description: &str, presets: &[AgentPreset]) -> TaskAgentMatch {
    let lower_task = task_description.to_lowercase();
    for preset in presets {
        if preset.name != GENERAL_PURPOSE && lower_task.contains(&preset.name.to_lowercase()) {
            return TaskAgentMatch {
                agent_name: preset.name.clone(),
                confidence: 1.0,
                reasoning: format!("Task directly mentions \"{}\"", preset.name),
            };
        }
    }

    let task_tokens = tokenize(task_description);

    let mut best: Option<(&AgentPreset, usize, usize)> = None;
    for preset in presets {
        let desc_tokens = tokenize(&preset.description);
        let matched = task_tokens.intersection(&desc_tokens).count();
        if matched > 0 && best.as_ref().map(|(_, m, _)| matched > *m).unwrap_or(true) {
            best = Some((preset, matched, desc_tokens.len()));
        }
    }

    match best {
        Some((preset, matched, desc_token_count)) => TaskAgentMatch {
            agent_name: preset.name.clone(),
            confidence: matched as f64 / desc_token_count.max(1) as f64,
            reasoning: format!("Matched {matched} keyword(s) against \"{}\"", preset.name),
        },
        None => TaskAgentMatch {
            agent_name: GENERAL_PURPOSE.to_string(),
            confidence: 0.0,
            reasoning: "No specific match found".to_string(),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

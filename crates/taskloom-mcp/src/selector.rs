// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Narrows the aggregated MCP catalog to a provider-sized subset for a
//! single turn.

use std::collections::HashSet;

use taskloom_mcp_client::ToolDefinition;

/// Tools in this set are always kept up to [`DynamicToolSelector::essential_quota`],
/// ahead of anything scored by relevance to the turn.
const ESSENTIAL_CATEGORY: &[&str] = &[
    "read_file", "write", "edit_file", "delete_file", "list_dir", "find_file", "glob", "grep", "shell",
    "recall", "store_success_pattern", "store_error_pattern",
];

/// Known per-provider tool-count limits, consulted before the heuristic default.
fn provider_limit(provider: &str) -> usize {
    match provider {
        "anthropic" => 64,
        "openai" => 128,
        _ => 40,
    }
}

/// Substrings observed in provider error messages that indicate the tools
/// payload itself was rejected as too large.
const TOOL_LIMIT_ERROR_PATTERNS: &[&str] =
    &["too many tools", "tool limit", "exceeds the maximum number of tools", "too many functions"];

pub fn is_tool_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    TOOL_LIMIT_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Lowercase, split on non-alphanumeric runs. Shared with the Task Decomposer
/// and Agent Matcher so all three components tokenize identically.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct DynamicToolSelector {
    /// How many essential-category tools are kept regardless of scoring.
    essential_quota: usize,
    /// How many categories to shrink by on each `isToolLimitError` retry.
    shrink_step: usize,
}

impl Default for DynamicToolSelector {
    fn default() -> Self {
        Self { essential_quota: ESSENTIAL_CATEGORY.len(), shrink_step: 1 }
    }
}

impl DynamicToolSelector {
    pub fn essential_quota(&self) -> usize {
        self.essential_quota
    }

    /// Select a subset of `catalog` obeying `provider`'s known (or default)
    /// tool-count limit, biased toward the essential category and toward
    /// tools whose name/description overlaps the turn text.
    pub fn select(&self, catalog: &[ToolDefinition], turn_text: &str, provider: &str) -> Vec<ToolDefinition> {
        self.select_with_limit(catalog, turn_text, provider_limit(provider))
    }

    /// Same as [`select`](Self::select) but shrunk by `self.shrink_step`
    /// categories — used when the provider rejects the tools payload as too
    /// large. Called at most once per turn by the execution engine.
    pub fn select_shrunk(&self, catalog: &[ToolDefinition], turn_text: &str, provider: &str) -> Vec<ToolDefinition> {
        let limit = provider_limit(provider).saturating_sub(self.shrink_step * 10).max(self.essential_quota);
        self.select_with_limit(catalog, turn_text, limit)
    }

    fn select_with_limit(&self, catalog: &[ToolDefinition], turn_text: &str, limit: usize) -> Vec<ToolDefinition> {
        if catalog.len() <= limit {
            return catalog.to_vec();
        }

        let turn_tokens = tokenize(turn_text);

        let (essential, rest): (Vec<_>, Vec<_>) =
            catalog.iter().cloned().partition(|t| ESSENTIAL_CATEGORY.contains(&t.name.as_str()));

        let mut selected: Vec<ToolDefinition> = essential.into_iter().take(self.essential_quota.min(limit)).collect();
        let remaining_budget = limit.saturating_sub(selected.len());

        let mut scored: Vec<(i64, usize, ToolDefinition)> = rest
            .into_iter()
            .enumerate()
            .map(|(idx, t)| {
                let haystack = tokenize(&format!("{} {}", t.name, t.description));
                let overlap = turn_tokens.intersection(&haystack).count() as i64;
                (overlap, idx, t)
            })
            .collect();

        // Highest overlap first; ties broken by original catalog order (category
        // priority is already encoded by essential/rest partitioning above).
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        selected.extend(scored.into_iter().take(remaining_budget).map(|(_, _, t)| t));
        selected
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::scoring::{overlap_score, tokenize};
use crate::types::{ErrorSolution, MemoryEntry, MemoryKind, MemoryStatistics};

/// Consumed contract: the engine reads memory before tool calls (error-
/// solution lookup) and writes after each tool call (success/failure
/// pattern). Only a minimal in-process reference implementation lives here
/// — a full vector/associative memory subsystem is out of scope.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store_success_pattern(&self, task: &str, steps: &[String], meta: Value) -> Result<String>;
    async fn store_error_pattern(&self, error_msg: &str, solution: &str, meta: Value) -> Result<String>;
    async fn find_error_solution(&self, error_text: &str, ctx_tags: &[String]) -> Option<ErrorSolution>;
    async fn recall(&self, query: &str, ctx_tags: &[String]) -> Vec<MemoryEntry>;
    async fn statistics(&self) -> MemoryStatistics;
}

/// Confidence threshold above which the engine prepends a recalled error
/// solution as a system hint before retrying.
pub const HIGH_CONFIDENCE: f64 = 0.5;

/// Maximum entries returned by a single `recall` call.
const RECALL_LIMIT: usize = 10;

/// Thread-safe, optionally file-persisted `MemoryStore`.
///
/// Persistence mirrors the session store's rename-after-write discipline: a
/// `save()` writes to a `.tmp` sibling then renames over the target, so a
/// crash mid-write never corrupts the prior good state.
pub struct InProcessMemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    path: Option<PathBuf>,
}

impl InProcessMemoryStore {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), path: None }
    }

    /// Load from `path` if it exists (a missing file is not an error — the
    /// store simply starts empty, matching this codebase's config-loading
    /// convention of "no file found ⇒ default").
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read memory store, starting empty");
                HashMap::new()
            }
        };
        Ok(Self { entries: RwLock::new(entries), path: Some(path) })
    }

    /// Persist all entries to disk via write-tmp-then-rename.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let entries = self.entries.read().await;
        let bytes = serde_json::to_vec_pretty(&*entries)?;
        drop(entries);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn insert(&self, kind: MemoryKind, content: Value, tags: impl IntoIterator<Item = String>, success_rate: f64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let entry = MemoryEntry {
            id: id.clone(),
            content,
            kind,
            tags: tags.into_iter().collect(),
            access_count: 0,
            success_rate,
            last_accessed: now,
            created_at: now,
        };
        self.entries.write().await.insert(id.clone(), entry);
        id
    }
}

impl Default for InProcessMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InProcessMemoryStore {
    async fn store_success_pattern(&self, task: &str, steps: &[String], meta: Value) -> Result<String> {
        let content = serde_json::json!({ "task": task, "steps": steps, "meta": meta });
        let tags = tokenize(task);
        Ok(self.insert(MemoryKind::SuccessPattern, content, tags, 1.0).await)
    }

    async fn store_error_pattern(&self, error_msg: &str, solution: &str, meta: Value) -> Result<String> {
        let content = serde_json::json!({ "error": error_msg, "solution": solution, "meta": meta });
        let tags = tokenize(error_msg);
        Ok(self.insert(MemoryKind::ErrorSolution, content, tags, 0.0).await)
    }

    async fn find_error_solution(&self, error_text: &str, ctx_tags: &[String]) -> Option<ErrorSolution> {
        let query = tokenize(error_text);
        let ctx: std::collections::BTreeSet<String> = ctx_tags.iter().map(|t| t.to_lowercase()).collect();

        let mut entries = self.entries.write().await;
        let mut best: Option<(String, f64, String)> = None;

        for entry in entries.values_mut() {
            if entry.kind != MemoryKind::ErrorSolution {
                continue;
            }
            let target = tokenize(&entry.content.to_string());
            let mut score = overlap_score(&query, &target);
            if !ctx.is_empty() {
                let tag_overlap = overlap_score(&ctx, &entry.tags.iter().cloned().collect());
                score = (score + tag_overlap) / 2.0;
            }
            // No floor here: a freshly stored error pattern has success_rate
            // 0.0 and must not surface until a later recall reinforces it.
            score *= entry.success_rate;

            if score > 0.0 && best.as_ref().map(|(_, s, _)| score > *s).unwrap_or(true) {
                let solution = entry
                    .content
                    .get("solution")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                best = Some((entry.id.clone(), score, solution));
            }
        }

        if let Some((id, score, solution)) = best.clone() {
            if let Some(e) = entries.get_mut(&id) {
                e.access_count += 1;
                e.last_accessed = Utc::now();
            }
            return Some(ErrorSolution { solution, confidence: score.min(1.0) });
        }
        None
    }

    async fn recall(&self, query: &str, ctx_tags: &[String]) -> Vec<MemoryEntry> {
        let q = tokenize(query);
        let ctx: std::collections::BTreeSet<String> = ctx_tags.iter().map(|t| t.to_lowercase()).collect();

        let mut entries = self.entries.write().await;
        let mut scored: Vec<(f64, String)> = entries
            .values()
            .map(|e| {
                let content_score = overlap_score(&q, &tokenize(&e.content.to_string()));
                let tag_score = if ctx.is_empty() { 0.0 } else { overlap_score(&ctx, &e.tags.iter().cloned().collect()) };
                (content_score.max(tag_score), e.id.clone())
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(RECALL_LIMIT);

        let now = Utc::now();
        let mut result = Vec::with_capacity(scored.len());
        for (_, id) in scored {
            if let Some(e) = entries.get_mut(&id) {
                e.access_count += 1;
                e.last_accessed = now;
                result.push(e.clone());
            }
        }
        result
    }

    async fn statistics(&self) -> MemoryStatistics {
        let entries = self.entries.read().await;
        let total_memories = entries.len();
        let average_success_rate = if total_memories == 0 {
            0.0
        } else {
            entries.values().map(|e| e.success_rate).sum::<f64>() / total_memories as f64
        };
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for e in entries.values() {
            *by_kind.entry(format!("{:?}", e.kind)).or_insert(0) += 1;
        }
        MemoryStatistics { total_memories, average_success_rate, by_kind }
    }
}

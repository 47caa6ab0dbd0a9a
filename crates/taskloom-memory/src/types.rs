// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four memory categories the engine writes and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ErrorSolution,
    SuccessPattern,
    Discovery,
    General,
}

/// One stored memory. `success_rate` starts at `1.0` for a freshly stored
/// success pattern and `0.0` for a freshly stored error pattern — both are
/// nudged by [`crate::MemoryStore::recall`] feedback over time via
/// `reinforce`/`penalize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: Value,
    pub kind: MemoryKind,
    pub tags: BTreeSet<String>,
    pub access_count: u64,
    pub success_rate: f64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Result of [`crate::MemoryStore::find_error_solution`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSolution {
    pub solution: String,
    pub confidence: f64,
}

/// Summary statistics exposed to callers (e.g. a `status` CLI command).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub total_memories: usize,
    pub average_success_rate: f64,
    pub by_kind: HashMap<String, usize>,
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Task Decomposer: split one free-form task description into subtasks by
//! linguistic cues, and classify complexity/priority for the Planner.

/// Connectives checked in priority order. `" and "` wins over the CJK comma
/// `、`, which wins over `;` — only the first matching connective is used as
/// the split point, so a description never gets double-split.
const AND_CONNECTIVE: &str = " and ";
const CJK_COMMA: &str = "、";
const SEMICOLON: &str = ";";

/// Split `text` into subtask descriptions.
///
/// Checks connectives in a fixed order and splits on the first one found;
/// falls back to returning `text` unsplit. Each piece is trimmed; empty
/// pieces (e.g. from a trailing separator) are dropped.
pub fn decompose(text: &str) -> Vec<String> {
    let parts: Vec<&str> = if text.contains(AND_CONNECTIVE) {
        text.split(AND_CONNECTIVE).collect()
    } else if text.contains(CJK_COMMA) {
        text.split(CJK_COMMA).collect()
    } else if text.contains(SEMICOLON) {
        text.split(SEMICOLON).collect()
    } else {
        return vec![text.to_string()];
    };

    let pieces: Vec<String> = parts.iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
    if pieces.is_empty() {
        vec![text.to_string()]
    } else {
        pieces
    }
}

/// True iff any connective is present, or the text is long enough that it
/// likely bundles multiple steps.
pub fn is_complex(text: &str) -> bool {
    text.contains(AND_CONNECTIVE) || text.contains(CJK_COMMA) || text.contains(SEMICOLON) || text.len() > 100
}

/// 5 for an urgent task, 4 for an important one, 3 otherwise.
///
/// Matching is case-insensitive substring search on the keyword, not a
/// tokenized word-boundary check — "urgently" and "Urgent!" both count.
pub fn priority(text: &str) -> u8 {
    let lower = text.to_lowercase();
    if lower.contains("urgent") {
        5
    } else if lower.contains("important") {
        4
    } else {
        3
    }
}

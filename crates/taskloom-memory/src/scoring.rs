// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeSet;

/// Lower-case, punctuation-stripped word tokens, deduplicated.
///
/// Shared by `find_error_solution` and `recall` so both use the same
/// keyword-overlap notion of "similar" — there is no embedding model
/// here, only this reference store's keyword matching.
pub(crate) fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Fraction of `query` tokens also present in `target`, in `[0, 1]`.
pub(crate) fn overlap_score(query: &BTreeSet<String>, target: &BTreeSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let matched = query.intersection(target).count();
    matched as f64 / query.len() as f64
}

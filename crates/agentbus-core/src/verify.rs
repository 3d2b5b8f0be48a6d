// SPDX-License-Identifier: MIT OR Apache-2.0
//! Verification of a stored receipt chain against a freshly rebuilt one.

use crate::chain::{self, ChainLink};
use crate::Receipt;

/// Result of verifying a stored receipt chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainVerification {
    /// Number of links whose hash matched the freshly rebuilt chain.
    pub valid_count: usize,
    /// Task ids whose link hash did not match.
    pub invalid_task_ids: Vec<String>,
    /// `true` when every link matched.
    pub is_valid: bool,
}

/// Verify that `stored` (the chain persisted alongside the receipts, in
/// closure order) matches a chain rebuilt fresh from `receipts` (in the
/// same order).
#[must_use]
pub fn verify_chain(receipts: &[Receipt], stored: &[ChainLink]) -> ChainVerification {
    let rebuilt = chain::rebuild(receipts);
    let mut valid_count = 0;
    let mut invalid_task_ids = Vec::new();

    for (expected, actual) in rebuilt.iter().zip(stored.iter()) {
        if expected == actual {
            valid_count += 1;
        } else {
            invalid_task_ids.push(actual.task_id.clone());
        }
    }
    // Any length mismatch means a receipt was removed or appended out of
    // band; every stored link beyond the rebuilt length is also invalid.
    if stored.len() > rebuilt.len() {
        for extra in &stored[rebuilt.len()..] {
            invalid_task_ids.push(extra.task_id.clone());
        }
    }

    let is_valid = invalid_task_ids.is_empty() && stored.len() == rebuilt.len();
    ChainVerification {
        valid_count,
        invalid_task_ids,
        is_valid,
    }
}

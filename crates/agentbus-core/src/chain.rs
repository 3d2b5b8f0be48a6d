// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt hash chaining.
//!
//! Each agent's receipt store maintains a rolling chain: every receipt's
//! link hash covers its own content hash plus the previous link, so a
//! reordered or edited receipts directory is detectable (SPEC_FULL §B).
//! This is defense-in-depth over the idempotence laws in spec §8, not a
//! new externally visible behavior — nothing reads the chain to decide
//! whether a closure is valid.

use crate::{receipt_hash, Receipt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One link in a receipt chain: a receipt's own hash plus the hash of the
/// chain up to and including it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// `(agent, task_id)` the link covers.
    pub task_id: String,
    /// [`receipt_hash`] of the receipt at this position.
    pub receipt_hash: String,
    /// Hash of `previous_link_hash || receipt_hash`, or just `receipt_hash`
    /// for the first link in the chain.
    pub link_hash: String,
}

/// Append `receipt` to a chain, given the previous link (`None` if this is
/// the first receipt for the agent).
#[must_use]
pub fn append(previous: Option<&ChainLink>, receipt: &Receipt) -> ChainLink {
    let rhash = receipt_hash(receipt);
    let mut hasher = Sha256::new();
    if let Some(prev) = previous {
        hasher.update(prev.link_hash.as_bytes());
    }
    hasher.update(rhash.as_bytes());
    let link_hash = format!("{:x}", hasher.finalize());
    ChainLink {
        task_id: receipt.task_id.clone(),
        receipt_hash: rhash,
        link_hash,
    }
}

/// Recompute a full chain from a receipt sequence in closure order, and
/// return the links. Does not consult any previously stored chain — use
/// [`crate::verify::verify_chain`] to compare against one.
#[must_use]
pub fn rebuild(receipts: &[Receipt]) -> Vec<ChainLink> {
    let mut links = Vec::with_capacity(receipts.len());
    let mut previous: Option<ChainLink> = None;
    for receipt in receipts {
        let link = append(previous.as_ref(), receipt);
        previous = Some(link.clone());
        links.push(link);
    }
    links
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural validation of [`crate::PacketHeader`] values.
//!
//! This module checks *shape* only (safe-id format, non-empty recipients,
//! no self-targeting, no duplicate recipients). Delivery-time concerns
//! (roster membership, suspicious-content scanning) live in the codec and
//! delivery crates, which call back into [`validate_header`] first.

use crate::error::{BusError, BusErrorCode};
use crate::PacketHeader;
use std::collections::HashSet;

/// Returns `true` if `id` matches the safe-id pattern
/// `^[A-Za-z0-9][A-Za-z0-9._-]{0,200}$` (spec §3).
#[must_use]
pub fn is_safe_id(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    if id.len() > 201 {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Validate a header's structural shape.
///
/// Does **not** check roster membership — callers that have a [`crate::Roster`]
/// in scope should additionally reject recipients the roster does not know.
///
/// # Errors
///
/// Returns a [`BusError`] with a [`BusErrorCode`] describing the first
/// violation found.
pub fn validate_header(header: &PacketHeader) -> Result<(), BusError> {
    if !is_safe_id(&header.id) {
        return Err(BusError::new(
            BusErrorCode::InvalidPacketId,
            format!("packet id '{}' does not match the safe-id pattern", header.id),
        ));
    }
    if header.to.is_empty() {
        return Err(BusError::new(
            BusErrorCode::InvalidRecipients,
            "packet must have at least one recipient",
        ));
    }
    let mut seen = HashSet::new();
    for recipient in &header.to {
        if !seen.insert(recipient.as_str()) {
            return Err(BusError::new(
                BusErrorCode::InvalidRecipients,
                format!("duplicate recipient '{recipient}'"),
            ));
        }
        if recipient == &header.from {
            return Err(BusError::new(
                BusErrorCode::SelfTargetingRejected,
                format!("packet from '{}' cannot target itself", header.from),
            ));
        }
    }
    if header.title.trim().is_empty() {
        return Err(BusError::new(
            BusErrorCode::MalformedHeader,
            "title must not be empty",
        ));
    }
    Ok(())
}

/// Validate that every recipient in `header.to` is known to `known_agents`.
///
/// # Errors
///
/// Returns [`BusErrorCode::InvalidRecipients`] naming the first unknown
/// recipient.
pub fn validate_recipients_known(
    header: &PacketHeader,
    known_agents: &[String],
) -> Result<(), BusError> {
    for recipient in &header.to {
        if !known_agents.iter().any(|n| n == recipient) {
            return Err(BusError::new(
                BusErrorCode::InvalidRecipients,
                format!("unknown recipient '{recipient}'"),
            ));
        }
    }
    Ok(())
}

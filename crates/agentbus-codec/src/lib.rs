// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentbus-codec
//!
//! Parses and renders the packet text format (spec §6): a header delimiter
//! line (`---`), a JSON object spanning one or more lines, a closing
//! delimiter line, then the free-form body. Also hosts the suspicious-content
//! scanner that delivery runs before a packet is written to an inbox.

/// The suspicious-content scanner (spec §4.1).
pub mod suspicious;

use agentbus_core::error::{BusError, BusErrorCode};
use agentbus_core::{validate, Packet, PacketHeader};

const DELIMITER: &str = "---";

/// Parse a raw packet document into its header and body.
///
/// The sentinel for "this is not a packet" is a missing header delimiter at
/// the very start of the document (after trimming leading whitespace), per
/// spec §4.1.
///
/// # Errors
///
/// Returns [`BusErrorCode::MalformedHeader`] if the delimiter pair is
/// missing or the header is not a valid JSON object.
pub fn parse(raw: &str) -> Result<Packet, BusError> {
    let trimmed_start = raw.trim_start();
    if !trimmed_start.starts_with(DELIMITER) {
        return Err(BusError::new(
            BusErrorCode::MalformedHeader,
            "document does not begin with a header delimiter",
        ));
    }
    let after_open = &trimmed_start[DELIMITER.len()..];
    let close_idx = find_closing_delimiter(after_open).ok_or_else(|| {
        BusError::new(
            BusErrorCode::MalformedHeader,
            "no closing header delimiter found",
        )
    })?;

    let header_json = after_open[..close_idx].trim();
    let rest = &after_open[close_idx + DELIMITER.len()..];
    let body = rest.strip_prefix('\n').unwrap_or(rest);

    let header: PacketHeader = serde_json::from_str(header_json).map_err(|e| {
        BusError::new(
            BusErrorCode::MalformedHeader,
            format!("header is not valid JSON: {e}"),
        )
    })?;

    let mut body = body.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }

    Ok(Packet { header, body })
}

/// Find the index (within `s`) of the next line that is exactly `---`.
fn find_closing_delimiter(s: &str) -> Option<usize> {
    let mut offset = 0usize;
    for line in s.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim() == DELIMITER {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Validate a header's structural shape. Thin re-export wired through the
/// codec so callers only need one crate for "is this packet well-formed".
///
/// # Errors
///
/// See [`agentbus_core::validate::validate_header`].
pub fn validate_header(header: &PacketHeader) -> Result<(), BusError> {
    validate::validate_header(header)
}

/// Canonically render a header and body back into the packet text format.
///
/// The body is normalized to always end with exactly one trailing newline.
/// `render(parse(x)) == x` up to that normalization (spec §8).
#[must_use]
pub fn render(header: &PacketHeader, body: &str) -> String {
    let header_json =
        serde_json::to_string_pretty(header).expect("PacketHeader serialization is infallible");
    let mut normalized_body = body.to_string();
    if !normalized_body.ends_with('\n') {
        normalized_body.push('\n');
    }
    format!("{DELIMITER}\n{header_json}\n{DELIMITER}\n{normalized_body}")
}

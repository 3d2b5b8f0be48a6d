// SPDX-License-Identifier: MIT OR Apache-2.0
//! Suspicious-content scanner run on a rendered packet before delivery
//! (spec §4.1).
//!
//! This is a pattern scan, not a sandbox: it looks for a small, specific
//! set of destructive-command shapes in the rendered text and reports them.
//! What happens with a hit is entirely up to [`SuspiciousPolicy`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What to do when the scanner finds a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SuspiciousPolicy {
    /// Refuse delivery; the caller gets a classified error.
    #[default]
    Block,
    /// Deliver anyway, but report the hits to the caller.
    Warn,
    /// Ignore hits entirely.
    Allow,
}

impl std::str::FromStr for SuspiciousPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "warn" => Ok(Self::Warn),
            "allow" => Ok(Self::Allow),
            other => Err(format!("unknown suspicious-content policy '{other}'")),
        }
    }
}

/// One category of destructive pattern the scanner recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousKind {
    /// `rm -rf /` and close variants.
    RecursiveRootDelete,
    /// `mkfs.*`, `format C:` and similar.
    FilesystemFormat,
    /// `dd` writing directly to a block device.
    RawDeviceWrite,
    /// A classic `:(){ :|:& };:` style fork bomb.
    ForkBomb,
    /// `shutdown`/`reboot`/`halt` invocations.
    ShutdownOrReboot,
}

impl SuspiciousKind {
    /// Short human label used in reported hits.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::RecursiveRootDelete => "recursive root delete",
            Self::FilesystemFormat => "filesystem format command",
            Self::RawDeviceWrite => "raw device write",
            Self::ForkBomb => "fork bomb",
            Self::ShutdownOrReboot => "shutdown/reboot command",
        }
    }
}

/// A single match found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousHit {
    /// What category of pattern matched.
    pub kind: SuspiciousKind,
    /// The literal substring that matched.
    pub matched_text: String,
}

const PATTERNS: &[(SuspiciousKind, &[&str])] = &[
    (
        SuspiciousKind::RecursiveRootDelete,
        &["rm -rf /", "rm -rf /*", "rm -fr /", "rm --recursive --force /"],
    ),
    (
        SuspiciousKind::FilesystemFormat,
        &["mkfs.", "mkfs ", "format c:", "format d:"],
    ),
    (SuspiciousKind::RawDeviceWrite, &["dd if=", "of=/dev/sd", "of=/dev/nvme"]),
    (SuspiciousKind::ForkBomb, &[":(){ :|:& };:", ":(){:|:&};:"]),
    (
        SuspiciousKind::ShutdownOrReboot,
        &["shutdown -h", "shutdown now", "reboot -f", "systemctl poweroff", "halt -f"],
    ),
];

/// Scan `text` for destructive patterns.
///
/// Case-insensitive, substring-based. Intended to be run on the fully
/// rendered packet (header + body) before delivery.
#[must_use]
pub fn scan(text: &str) -> Vec<SuspiciousHit> {
    let lower = text.to_ascii_lowercase();
    let mut hits = Vec::new();
    for (kind, needles) in PATTERNS {
        for needle in *needles {
            if lower.contains(needle) {
                hits.push(SuspiciousHit {
                    kind: *kind,
                    matched_text: (*needle).to_string(),
                });
            }
        }
    }
    hits
}

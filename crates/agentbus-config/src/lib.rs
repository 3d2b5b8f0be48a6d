// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered configuration loading, validation, and merging for AgentBus.
//!
//! [`BusSettings`] is the top-level runtime configuration, resolved in
//! priority order: CLI flags > environment variables > an optional TOML
//! file > [`BusSettings::default`] (SPEC_FULL §A.3).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use agentbus_codec::suspicious::SuspiciousPolicy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent startup (SPEC_FULL §A.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated field was used in the configuration.
    DeprecatedField {
        /// Name of the deprecated field.
        field: String,
        /// Suggested replacement, if any.
        suggestion: Option<String>,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// The watchdog timeout is unusually large.
    LargeWatchdogTimeout {
        /// Configured timeout in seconds.
        secs: u64,
    },
    /// `suspicious_content_policy` is set to `allow`, disabling a safety net.
    SuspiciousContentPolicyIsAllow,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => {
                write!(f, "deprecated field '{field}'")?;
                if let Some(s) = suggestion {
                    write!(f, " — use '{s}' instead")?;
                }
                Ok(())
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeWatchdogTimeout { secs } => {
                write!(f, "watchdog timeout is unusually large ({secs}s)")
            }
            ConfigWarning::SuspiciousContentPolicyIsAllow => {
                write!(f, "suspicious_content_policy=allow disables the destructive-command safety net")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for AgentBus (SPEC_FULL §A.3).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct BusSettings {
    /// Root directory of the bus filesystem tree.
    pub bus_root: String,
    /// Path to the roster JSON file. `None` falls back to convention/bundled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster_path: Option<String>,
    /// What delivery does when the suspicious-content scanner finds a hit.
    pub suspicious_content_policy: SuspiciousPolicy,
    /// Number of concurrent worker slots in the global semaphore.
    pub semaphore_slots: u32,
    /// Seconds after which a semaphore slot with a dead pid is reclaimed.
    pub semaphore_stale_after_secs: u64,
    /// Seconds after which a worker lock with a dead pid is reclaimed.
    pub lock_stale_after_secs: u64,
    /// Seconds an engine attempt may run before the watchdog intervenes.
    pub watchdog_timeout_secs: u64,
    /// Seconds given to an engine process between SIGTERM and SIGKILL.
    pub watchdog_grace_secs: u64,
    /// Maximum retry attempts for a retryable engine error.
    pub max_retry_attempts: u32,
    /// Base backoff delay in seconds (full-jitter exponential).
    pub retry_base_delay_secs: u64,
    /// Maximum backoff delay in seconds.
    pub retry_max_delay_secs: u64,
    /// Maximum follow-up packets a single closure may dispatch (spec §4.11).
    pub follow_up_cap: u32,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            bus_root: "./bus".into(),
            roster_path: None,
            suspicious_content_policy: SuspiciousPolicy::Block,
            semaphore_slots: 4,
            semaphore_stale_after_secs: 300,
            lock_stale_after_secs: 300,
            watchdog_timeout_secs: 1800,
            watchdog_grace_secs: 10,
            max_retry_attempts: 3,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 300,
            follow_up_cap: 5,
        }
    }
}

const LARGE_WATCHDOG_THRESHOLD_SECS: u64 = 3 * 3600;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load [`BusSettings`] from an optional TOML file path, then apply
/// environment overrides, then CLI overrides — in that priority order
/// (CLI wins, since it is applied last).
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] or [`ConfigError::ParseError`].
pub fn load(
    toml_path: Option<&Path>,
    cli_overrides: CliOverrides,
) -> Result<BusSettings, ConfigError> {
    let mut settings = match toml_path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => BusSettings::default(),
    };
    apply_env_overrides(&mut settings);
    cli_overrides.apply(&mut settings);
    Ok(settings)
}

/// Parse a TOML string into [`BusSettings`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] on malformed TOML or wrong field types.
pub fn parse_toml(content: &str) -> Result<BusSettings, ConfigError> {
    toml::from_str::<BusSettings>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Command-line overrides, applied last (highest priority). Every field is
/// optional; `None` leaves the underlying setting untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Override for [`BusSettings::bus_root`].
    pub bus_root: Option<String>,
    /// Override for [`BusSettings::roster_path`].
    pub roster_path: Option<String>,
    /// Override for [`BusSettings::suspicious_content_policy`].
    pub suspicious_content_policy: Option<SuspiciousPolicy>,
}

impl CliOverrides {
    fn apply(self, settings: &mut BusSettings) {
        if let Some(v) = self.bus_root {
            settings.bus_root = v;
        }
        if let Some(v) = self.roster_path {
            settings.roster_path = Some(v);
        }
        if let Some(v) = self.suspicious_content_policy {
            settings.suspicious_content_policy = v;
        }
    }
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables: `AGENTBUS_ROOT`, `AGENTBUS_ROSTER_PATH`,
/// `AGENTBUS_SUSPICIOUS_CONTENT_POLICY`, `AGENTBUS_SEMAPHORE_SLOTS`,
/// `AGENTBUS_WATCHDOG_TIMEOUT_SECS`, `AGENTBUS_FOLLOW_UP_CAP`.
pub fn apply_env_overrides(settings: &mut BusSettings) {
    if let Ok(val) = std::env::var("AGENTBUS_ROOT") {
        settings.bus_root = val;
    }
    if let Ok(val) = std::env::var("AGENTBUS_ROSTER_PATH") {
        settings.roster_path = Some(val);
    }
    if let Ok(val) = std::env::var("AGENTBUS_SUSPICIOUS_CONTENT_POLICY") {
        if let Ok(policy) = val.parse() {
            settings.suspicious_content_policy = policy;
        }
    }
    if let Ok(val) = std::env::var("AGENTBUS_SEMAPHORE_SLOTS") {
        if let Ok(n) = val.parse() {
            settings.semaphore_slots = n;
        }
    }
    if let Ok(val) = std::env::var("AGENTBUS_WATCHDOG_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            settings.watchdog_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("AGENTBUS_FOLLOW_UP_CAP") {
        if let Ok(n) = val.parse() {
            settings.follow_up_cap = n;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a resolved [`BusSettings`], returning advisory warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for any out-of-range numeric
/// field (zero slots, zero cap, a watchdog grace longer than the timeout).
pub fn validate(settings: &BusSettings) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if settings.bus_root.trim().is_empty() {
        errors.push("bus_root must not be empty".to_string());
    }
    if settings.semaphore_slots == 0 {
        errors.push("semaphore_slots must be at least 1".to_string());
    }
    if settings.follow_up_cap == 0 {
        errors.push("follow_up_cap must be at least 1".to_string());
    }
    if settings.watchdog_grace_secs >= settings.watchdog_timeout_secs {
        errors.push("watchdog_grace_secs must be less than watchdog_timeout_secs".to_string());
    }
    if settings.retry_base_delay_secs > settings.retry_max_delay_secs {
        errors.push("retry_base_delay_secs must not exceed retry_max_delay_secs".to_string());
    }

    if settings.roster_path.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "roster_path".into(),
            hint: "falling back to ./agentbus-roster.json or the bundled roster".into(),
        });
    }
    if settings.watchdog_timeout_secs > LARGE_WATCHDOG_THRESHOLD_SECS {
        warnings.push(ConfigWarning::LargeWatchdogTimeout {
            secs: settings.watchdog_timeout_secs,
        });
    }
    if settings.suspicious_content_policy == SuspiciousPolicy::Allow {
        warnings.push(ConfigWarning::SuspiciousContentPolicyIsAllow);
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate_with_advisory_warnings() {
        let settings = BusSettings::default();
        let warnings = validate(&settings).expect("defaults should validate");
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::MissingOptionalField { field, .. } if field == "roster_path"))
        );
    }

    #[test]
    fn parse_valid_toml() {
        let toml = r#"
            bus_root = "/srv/bus"
            suspicious_content_policy = "warn"
            semaphore_slots = 8
        "#;
        let settings = parse_toml(toml).unwrap();
        assert_eq!(settings.bus_root, "/srv/bus");
        assert_eq!(settings.suspicious_content_policy, SuspiciousPolicy::Warn);
        assert_eq!(settings.semaphore_slots, 8);
        // Fields absent from the TOML fall back to Default via #[serde(default)].
        assert_eq!(settings.follow_up_cap, 5);
    }

    #[test]
    fn parse_invalid_toml_is_a_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn zero_semaphore_slots_is_rejected() {
        let settings = BusSettings {
            semaphore_slots: 0,
            ..Default::default()
        };
        let err = validate(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn grace_must_be_shorter_than_timeout() {
        let settings = BusSettings {
            watchdog_timeout_secs: 10,
            watchdog_grace_secs: 10,
            ..Default::default()
        };
        let err = validate(&settings).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("watchdog_grace_secs")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn large_watchdog_timeout_produces_warning() {
        let settings = BusSettings {
            roster_path: Some("./r.json".into()),
            watchdog_timeout_secs: LARGE_WATCHDOG_THRESHOLD_SECS + 1,
            ..Default::default()
        };
        let warnings = validate(&settings).unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::LargeWatchdogTimeout { .. }))
        );
    }

    #[test]
    fn cli_overrides_win_over_env_and_file() {
        let mut settings = BusSettings::default();
        let overrides = CliOverrides {
            bus_root: Some("/cli/root".into()),
            ..Default::default()
        };
        overrides.apply(&mut settings);
        assert_eq!(settings.bus_root, "/cli/root");
    }

    #[test]
    fn env_override_parses_suspicious_content_policy() {
        // SAFETY-equivalent: single-threaded test process, no concurrent env mutation.
        std::env::set_var("AGENTBUS_SUSPICIOUS_CONTENT_POLICY", "warn");
        let mut settings = BusSettings::default();
        apply_env_overrides(&mut settings);
        std::env::remove_var("AGENTBUS_SUSPICIOUS_CONTENT_POLICY");
        assert_eq!(settings.suspicious_content_policy, SuspiciousPolicy::Warn);
    }
}

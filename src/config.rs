//! Detector configuration.

use serde::{Deserialize, Serialize};

use crate::error::{LeakError, LeakResult};

/// Environment variable toggling stack capture (`1`/`0`, `true`/`false`, `on`/`off`).
pub const ENV_CAPTURE_STACKS: &str = "SUBLEAK_CAPTURE_STACKS";

/// Environment variable setting the stack depth captured per tracked call.
pub const ENV_STACK_DEPTH: &str = "SUBLEAK_STACK_DEPTH";

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Label used in reports, log events and forked context names.
    pub name: String,
    /// Capture a stack trace for each tracked subscribe call.
    pub capture_stacks: bool,
    /// Frames kept per captured trace.
    pub stack_depth: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            name: "subleak".to_string(),
            capture_stacks: true,
            stack_depth: 64,
        }
    }
}

impl DetectorConfig {
    /// Defaults overlaid with `SUBLEAK_*` environment variables.
    pub fn from_env() -> LeakResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> LeakResult<Self> {
        serde_json::from_str(json).map_err(|e| LeakError::Config {
            reason: format!("invalid config json: {e}"),
        })
    }

    /// Applies overrides looked up by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> LeakResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = non_empty(lookup(ENV_CAPTURE_STACKS)) {
            self.capture_stacks = parse_flag(ENV_CAPTURE_STACKS, &raw)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_STACK_DEPTH)) {
            self.stack_depth = raw.parse().map_err(|_| LeakError::Config {
                reason: format!("{ENV_STACK_DEPTH} must be a non-negative integer, got '{raw}'"),
            })?;
        }
        Ok(self)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_flag(key: &str, raw: &str) -> LeakResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(LeakError::Config {
            reason: format!("{key} must be a boolean flag, got '{raw}'"),
        }),
    }
}

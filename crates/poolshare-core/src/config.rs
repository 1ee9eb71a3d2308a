//! Registry configuration.
//!
//! Fixed limits live on constant-holder structs; per-instance knobs live on
//! [`RegistryConfig`], which a host can embed in its own config file.

use serde::{Deserialize, Serialize};

/// Limits applied when parsing keys.
pub struct KeyLimits;

impl KeyLimits {
    /// Longest accepted key, in bytes.
    pub const MAX_KEY_LEN: usize = 4096;
    /// Marker substituted for URL passwords in log output.
    pub const REDACTED: &'static str = "***";
}

/// Per-registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Label used in log lines and snapshots.
    pub name: String,
    /// Longest accepted key, in bytes.
    pub max_key_len: usize,
    /// Log releases without a matching acquire at `warn` instead of `debug`.
    pub strict_release: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_key_len: KeyLimits::MAX_KEY_LEN,
            strict_release: false,
        }
    }
}

impl RegistryConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = max_key_len;
        self
    }

    pub fn with_strict_release(mut self, strict: bool) -> Self {
        self.strict_release = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.name, "default");
        assert_eq!(config.max_key_len, KeyLimits::MAX_KEY_LEN);
        assert!(!config.strict_release);
    }

    #[test]
    fn test_builder_methods() {
        let config = RegistryConfig::default()
            .with_name("analytics")
            .with_max_key_len(64)
            .with_strict_release(true);
        assert_eq!(config.name, "analytics");
        assert_eq!(config.max_key_len, 64);
        assert!(config.strict_release);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{"name": "etl"}"#).unwrap();
        assert_eq!(config.name, "etl");
        assert_eq!(config.max_key_len, KeyLimits::MAX_KEY_LEN);
        assert!(!config.strict_release);
    }
}

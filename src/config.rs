//! Configuration module for the payload capture filter
//!
//! CRITICAL: Configuration is loaded from Envoy plugin configuration,
//! NOT from external files. This avoids file I/O in the Wasm sandbox.

use serde::{Deserialize, Serialize};

/// Which layer the filter is attached at
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// HTTP filter: Envoy parses HTTP, bodies arrive de-chunked
    #[default]
    Http,
    /// Network filter: raw HTTP/1.x bytes off the connection
    Tcp,
}

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub capture_mode: CaptureMode,

    /// Capture request bodies
    #[serde(default = "default_true")]
    pub capture_request_body: bool,

    /// Capture response bodies
    #[serde(default = "default_true")]
    pub capture_response_body: bool,

    /// Maximum body bytes kept per direction (prevent OOM)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Maximum length of an exported attribute value, in bytes
    #[serde(default = "default_max_attribute_length")]
    pub max_attribute_length: usize,

    /// Path substrings whose traffic is never captured
    #[serde(default = "default_excluded_endpoints")]
    pub excluded_endpoints: Vec<String>,

    /// Key substrings whose JSON values are masked
    #[serde(default = "default_secret_key_patterns")]
    pub secret_key_patterns: Vec<String>,

    /// Replace every captured body with the mask
    #[serde(default)]
    pub mask_all_bodies: bool,

    /// Reassemble every chunk of chunked wire bodies, not only the first
    #[serde(default)]
    pub reassemble_all_chunks: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_attribute_length() -> usize {
    2048
}

fn default_excluded_endpoints() -> Vec<String> {
    vec!["/health".to_string(), "/actuator".to_string()]
}

fn default_secret_key_patterns() -> Vec<String> {
    vec![
        "pass".to_string(),
        "key".to_string(),
        "secret".to_string(),
        "credential".to_string(),
        "token".to_string(),
        "signature".to_string(),
        "authorization".to_string(),
    ]
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_mode: CaptureMode::default(),
            capture_request_body: default_true(),
            capture_response_body: default_true(),
            max_body_size: default_max_body_size(),
            max_attribute_length: default_max_attribute_length(),
            excluded_endpoints: default_excluded_endpoints(),
            secret_key_patterns: default_secret_key_patterns(),
            mask_all_bodies: false,
            reassemble_all_chunks: false,
        }
    }
}

impl CaptureConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        let config: Self = serde_json::from_str(config_str)
            .map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_size == 0 {
            return Err(ConfigError::InvalidValue("max_body_size must be positive"));
        }
        if self.max_attribute_length == 0 {
            return Err(ConfigError::InvalidValue(
                "max_attribute_length must be positive",
            ));
        }
        Ok(())
    }

    /// Whether any direction is captured at all
    pub fn captures_anything(&self) -> bool {
        self.capture_request_body || self.capture_response_body
    }
}

/// Configuration parsing errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidUtf8(String),
    InvalidJson(String),
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            ConfigError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.capture_mode, CaptureMode::Http);
        assert!(config.captures_anything());
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert_eq!(config.max_attribute_length, 2048);
        assert!(!config.secret_key_patterns.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let json = r#"{"capture_mode": "tcp", "max_body_size": 1024, "excluded_endpoints": []}"#;
        let config = CaptureConfig::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(config.capture_mode, CaptureMode::Tcp);
        assert_eq!(config.max_body_size, 1024);
        assert!(config.excluded_endpoints.is_empty());
        // Unspecified fields keep their defaults
        assert!(config.capture_response_body);
        assert_eq!(config.secret_key_patterns, default_secret_key_patterns());
    }

    #[test]
    fn test_empty_object_is_default() {
        let config = CaptureConfig::from_bytes(b"{}").unwrap();
        assert_eq!(config.excluded_endpoints, default_excluded_endpoints());
        assert!(!config.reassemble_all_chunks);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            CaptureConfig::from_bytes(&[0xff, 0xfe]),
            Err(ConfigError::InvalidUtf8(_))
        ));
        assert!(matches!(
            CaptureConfig::from_bytes(br#"{"capture_mode": "udp"}"#),
            Err(ConfigError::InvalidJson(_))
        ));
        assert!(matches!(
            CaptureConfig::from_bytes(br#"{"max_body_size": 0}"#),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}

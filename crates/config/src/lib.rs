use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_NAME: &str = "payscan";
const KEYCHAIN_SERVICE: &str = "payscan.credentials";

pub const SESSION_TOKEN_KEY: &str = "session_token";
pub const SESSION_TOKEN_ENV: &str = "PAYSCAN_SESSION_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub triage: TriageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: String, // "mock" | "http"
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            preferred_device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    pub audit_log: Option<PathBuf>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            audit_log: None,
        }
    }
}

fn default_backend_kind() -> String {
    "mock".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_sample_interval_ms() -> u64 {
    250
}

fn default_refresh_interval_ms() -> u64 {
    5_000
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn config_path() -> Result<PathBuf> {
    confy::get_configuration_file_path(APP_NAME, None).context("Failed to resolve config path")
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

/// Session credential: env var first, then keychain. `None` means anonymous.
pub fn session_token() -> Option<String> {
    std::env::var(SESSION_TOKEN_ENV)
        .ok()
        .filter(|t| !t.is_empty())
        .or_else(|| get_secret(SESSION_TOKEN_KEY).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"backend":{"kind":"http"}}"#).unwrap();
        assert_eq!(cfg.backend.kind, "http");
        assert_eq!(cfg.backend.base_url, "http://localhost:8080");
        assert_eq!(cfg.capture.sample_interval_ms, 250);
        assert_eq!(cfg.triage.refresh_interval_ms, 5_000);
        assert!(cfg.triage.audit_log.is_none());
    }

    #[test]
    fn default_config_uses_mock_backend() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.backend.kind, "mock");
        assert_eq!(cfg.backend.timeout_ms, 10_000);
    }
}

//! Daemon configuration.
//!
//! Loaded from an optional TOML file; `ALERTD_DIRECTORY` and
//! `ALERTD_WEBHOOK_URL` override whatever the file says, and CLI flags
//! override both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use escalation::EngineConfig;
use serde::{Deserialize, Serialize};

/// How dispatches leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    /// Write each dispatch to the log.
    #[default]
    Log,
    /// POST each dispatch as JSON to `webhook.url`.
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("ALERTD_WEBHOOK_URL").ok(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory seed (people, homes, assignments, tier wait times)
    pub directory: PathBuf,
    pub notifier: NotifierKind,
    pub webhook: WebhookConfig,
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            directory: std::env::var("ALERTD_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("fixtures/directory.json")),
            notifier: NotifierKind::default(),
            webhook: WebhookConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("notifier = \"webhook\" requires webhook.url (or ALERTD_WEBHOOK_URL)")]
    MissingWebhookUrl,

    #[error("webhook.timeout_secs must be positive")]
    ZeroTimeout,
}

impl DaemonConfig {
    /// Read `path` if given, else start from defaults; then apply the
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(directory) = std::env::var("ALERTD_DIRECTORY") {
            self.directory = PathBuf::from(directory);
        }
        if let Ok(url) = std::env::var("ALERTD_WEBHOOK_URL") {
            self.webhook.url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notifier == NotifierKind::Webhook && self.webhook.url.is_none() {
            return Err(ConfigError::MissingWebhookUrl);
        }
        if self.webhook.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
            directory = "/srv/alertd/directory.json"
            notifier = "webhook"

            [webhook]
            url = "http://hooks.local/notify"

            [engine]
            reminder_offset_secs = 15

            [engine.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.directory, PathBuf::from("/srv/alertd/directory.json"));
        assert_eq!(config.notifier, NotifierKind::Webhook);
        assert_eq!(config.webhook.url.as_deref(), Some("http://hooks.local/notify"));
        assert_eq!(config.webhook.timeout_secs, 10);
        assert_eq!(config.engine.reminder_offset_secs, 15);
        assert_eq!(config.engine.retry.max_attempts, 5);
        assert_eq!(config.engine.retry.initial_backoff_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_webhook_without_url_rejected() {
        let mut config = DaemonConfig::from_toml(r#"notifier = "webhook""#).unwrap();
        config.webhook.url = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingWebhookUrl));
    }

    #[test]
    fn test_unknown_notifier_rejected() {
        assert!(DaemonConfig::from_toml(r#"notifier = "carrier-pigeon""#).is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "notifier = [").unwrap();
        let err = DaemonConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid config"));

        let missing = DaemonConfig::from_file(Path::new("/nonexistent/alertd.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config"));
    }
}

//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.talkform/config.json`).
//! Plugin-level notification settings act as fallbacks for per-form
//! settings; spam settings apply to every form.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Spam protection settings.
    #[serde(default)]
    pub spam: SpamConfig,

    /// Plugin-level notification fallbacks.
    #[serde(default)]
    pub notifications: NotifySettings,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 15180).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15180
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Spam gate settings: honeypot/timing/token checks and the per-IP rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamConfig {
    /// When false, no checks run and every submission passes the gate.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Submissions faster than this many seconds after open are rejected.
    #[serde(default = "default_min_submission_seconds")]
    pub min_submission_seconds: u64,

    /// Submissions older than this many seconds are rejected as expired.
    #[serde(default = "default_max_submission_seconds")]
    pub max_submission_seconds: u64,

    /// Accepted submissions per IP per window before rejection.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max_submissions: u64,

    /// Rate-limit window in seconds, fixed from the first submission.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_submission_seconds() -> u64 {
    2
}

fn default_max_submission_seconds() -> u64 {
    1800
}

fn default_rate_limit_max() -> u64 {
    3
}

fn default_rate_limit_window() -> u64 {
    600
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_submission_seconds: default_min_submission_seconds(),
            max_submission_seconds: default_max_submission_seconds(),
            rate_limit_max_submissions: default_rate_limit_max(),
            rate_limit_window_seconds: default_rate_limit_window(),
        }
    }
}

/// Plugin-level notification settings, used when a form has no channel
/// config of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifySettings {
    /// Default recipient, always first in the plugin-level list when set.
    #[serde(default)]
    pub default_notification_email: String,

    /// Comma-separated extra recipients.
    #[serde(default)]
    pub notification_emails: String,

    #[serde(default = "default_true")]
    pub enable_email_notifications: bool,

    #[serde(default)]
    pub enable_slack: bool,
    #[serde(default)]
    pub slack_webhook_url: String,

    #[serde(default)]
    pub enable_teams: bool,
    #[serde(default)]
    pub teams_webhook_url: String,

    #[serde(default)]
    pub enable_webhooks: bool,
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            default_notification_email: String::new(),
            notification_emails: String::new(),
            enable_email_notifications: true,
            enable_slack: false,
            slack_webhook_url: String::new(),
            enable_teams: false,
            teams_webhook_url: String::new(),
            enable_webhooks: false,
            webhook_url: String::new(),
        }
    }
}

impl NotifySettings {
    /// Plugin-level recipient list: the default address (when set) followed
    /// by the comma-separated extras; trimmed, empties dropped, deduplicated.
    pub fn notification_emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        let default = self.default_notification_email.trim();
        if !default.is_empty() {
            emails.push(default.to_string());
        }
        for part in self.notification_emails.split(',') {
            let email = part.trim();
            if !email.is_empty() && !emails.iter().any(|e| e == email) {
                emails.push(email.to_string());
            }
        }
        emails
    }
}

/// Resolve config path from env or default (`~/.talkform/config.json`).
pub fn default_config_path() -> PathBuf {
    std::env::var("TALKFORM_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".talkform").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Default forms file: `forms.json` next to the config file.
pub fn default_forms_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("forms.json")
}

/// Load config from the default path (or TALKFORM_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the forms file).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

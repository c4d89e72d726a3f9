use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use crate::execution::types::Decision;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub source_host: SourceHostConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub dry_run: bool,
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub refresh_on_start: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            refresh_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationChannel {
    Console,
    Telegram,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_channel")]
    pub channel: ConfirmationChannel,
    /// Answer given by the fixed channel
    #[serde(default = "default_decision")]
    pub fixed_decision: Decision,
    #[serde(default = "default_telegram_poll")]
    pub telegram_poll_secs: u64,
    #[serde(default = "default_telegram_timeout")]
    pub telegram_timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            fixed_decision: default_decision(),
            telegram_poll_secs: default_telegram_poll(),
            telegram_timeout_secs: default_telegram_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_url")]
    pub api_url: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Recorded against each queued creation request
    #[serde(default = "default_creation_cost")]
    pub creation_cost: i64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_platform_url(),
            timeout_secs: default_request_timeout(),
            creation_cost: default_creation_cost(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceHostConfig {
    #[serde(default = "default_source_host_url")]
    pub api_url: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceHostConfig {
    fn default() -> Self {
        Self {
            api_url: default_source_host_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_path")]
    pub csv_log_path: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            csv_logging: false,
            csv_log_path: default_csv_path(),
        }
    }
}

fn default_poll_interval() -> u64 { 300 }
fn default_channel() -> ConfirmationChannel { ConfirmationChannel::Console }
fn default_decision() -> Decision { Decision::Skip }
fn default_telegram_poll() -> u64 { 5 }
fn default_telegram_timeout() -> u64 { 3600 }
fn default_platform_url() -> String { "https://api.manifold.markets".to_string() }
fn default_source_host_url() -> String { "https://api.github.com".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_creation_cost() -> i64 { 50 }
fn default_csv_path() -> String { "resolutions.csv".to_string() }

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub manifold_api_key: String,
    pub github_username: Option<String>,
    pub github_token: Option<String>,
    pub telegram_api_key: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            manifold_api_key: std::env::var("MANIFOLD_API_KEY")
                .context("MANIFOLD_API_KEY not set")?,
            github_username: std::env::var("GITHUB_USERNAME").ok(),
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            telegram_api_key: std::env::var("TELEGRAM_API_KEY").ok(),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
        })
    }

    /// Both Telegram settings, or an error naming the missing one
    pub fn telegram(&self) -> Result<(String, String)> {
        let key = self.telegram_api_key.clone().context("TELEGRAM_API_KEY not set")?;
        let chat = self.telegram_chat_id.clone().context("TELEGRAM_CHAT_ID not set")?;
        Ok((key, chat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [system]
            dry_run = true
            database_path = "markets.db"
            "#,
        )
        .unwrap();

        assert!(config.system.dry_run);
        assert_eq!(config.polling.interval_secs, 300);
        assert_eq!(config.confirmation.channel, ConfirmationChannel::Console);
        assert_eq!(config.platform.api_url, "https://api.manifold.markets");
        assert!(!config.monitoring.csv_logging);
    }

    #[test]
    fn test_fixed_confirmation() {
        let config: Config = toml::from_str(
            r#"
            [system]
            dry_run = false
            database_path = "markets.db"

            [confirmation]
            channel = "fixed"
            fixed_decision = "resolve"
            "#,
        )
        .unwrap();

        assert_eq!(config.confirmation.channel, ConfirmationChannel::Fixed);
        assert_eq!(config.confirmation.fixed_decision, Decision::Resolve);
        assert_eq!(config.confirmation.telegram_poll_secs, 5);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Config::load("/nonexistent/config.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config.toml"));
    }
}

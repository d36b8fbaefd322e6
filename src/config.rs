//! Settings loaded from `payclose.toml`.
//!
//! Missing keys fall back to defaults; a missing file means all defaults.
//! `PAYCLOSE_API_TOKEN` takes precedence over the file's `api_token`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::incidence::AttachmentPolicy;
use crate::jobs::PollConfig;

pub const DEFAULT_CONFIG_FILE: &str = "payclose.toml";
pub const TOKEN_ENV: &str = "PAYCLOSE_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct PayCloseConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token sent with every backend request.
    #[serde(default)]
    pub api_token: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs still pending after this long are reported as timed out.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

// 15 minutes.
fn default_poll_timeout_ms() -> u64 {
    900_000
}

fn default_max_attachment_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_log_filter() -> String {
    "payclose=info".to_string()
}

impl Default for PayCloseConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_attachment_bytes: default_max_attachment_bytes(),
            log_filter: default_log_filter(),
        }
    }
}

impl PayCloseConfig {
    /// Loads `path`, or `payclose.toml` in the working directory when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<PayCloseConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        Ok(config.with_token_override(std::env::var(TOKEN_ENV).ok()))
    }

    /// Replaces the token with `token` unless it is missing or empty.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token
            && !token.is_empty()
        {
            self.api_token = token;
        }
        self
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::from_millis(self.poll_interval_ms, self.poll_timeout_ms)
    }

    pub fn attachment_policy(&self) -> AttachmentPolicy {
        AttachmentPolicy {
            max_bytes: self.max_attachment_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn default_config_values() {
        let config = PayCloseConfig::default();
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.poll_timeout_ms, 900_000);
        assert_eq!(config.max_attachment_bytes, 10 * 1024 * 1024);
        assert_eq!(config.log_filter, "payclose=info");
        assert!(config.api_token.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_base_url = "https://nomina.example.com/api"
            poll_interval_ms = 500
        "#;
        let config: PayCloseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_base_url, "https://nomina.example.com/api");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.poll_timeout_ms, 900_000);
    }

    #[test]
    fn load_reads_given_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_token = \"from-file\"\npoll_timeout_ms = 60000").unwrap();

        let config = PayCloseConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.poll_timeout_ms, 60_000);
        assert_eq!(config.poll_config().timeout, Duration::from_secs(60));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PayCloseConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.poll_interval_ms, 2000);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = \"fast\"").unwrap();
        assert!(PayCloseConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn env_token_wins_unless_empty() {
        let config = PayCloseConfig {
            api_token: "from-file".into(),
            ..Default::default()
        };
        let kept = config.clone().with_token_override(Some(String::new()));
        assert_eq!(kept.api_token, "from-file");

        let replaced = config.with_token_override(Some("from-env".into()));
        assert_eq!(replaced.api_token, "from-env");
    }

    #[test]
    fn attachment_policy_follows_config() {
        let config = PayCloseConfig {
            max_attachment_bytes: 1024,
            ..Default::default()
        };
        assert_eq!(config.attachment_policy().max_bytes, 1024);
    }
}

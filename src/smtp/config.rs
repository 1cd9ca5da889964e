//! Server configuration

use crate::smtp::error::{SmtpError, SmtpLimits};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings consumed by the server and its connections
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Domain announced in the greeting and replies
    pub domain: String,
    /// Largest accepted message body, advertised as `SIZE`
    pub max_message_bytes: usize,
    /// Largest accepted number of body lines
    pub max_body_lines: usize,
    /// Longest accepted command line
    pub max_line_length: usize,
    /// Size of each socket read
    pub buffer_size: usize,
    /// Number of connection transcripts kept in the transaction log
    pub transaction_log_capacity: usize,
    /// Number of delivered messages kept in the mail store; oldest go first
    pub mail_store_capacity: usize,
    /// Accept EHLO and advertise extensions
    pub allow_extensions: bool,
    /// Socket read timeout; 0 disables it
    pub idle_timeout_secs: u64,
    /// Sleep between accept attempts when no connection is pending
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            max_message_bytes: 1_000_000,
            max_body_lines: 10_000,
            max_line_length: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            buffer_size: 4096,
            transaction_log_capacity: 64,
            mail_store_capacity: 1024,
            allow_extensions: true,
            idle_timeout_secs: 300,
            poll_interval_ms: 50,
        }
    }
}

impl ServerConfig {
    /// Default settings serving `domain`
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_owned(),
            ..Self::default()
        }
    }

    /// Parse settings from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, SmtpError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SmtpError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), SmtpError> {
        if self.domain.trim().is_empty() {
            return Err(SmtpError::Config("domain must not be empty".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(SmtpError::Config("buffer_size must be positive".to_string()));
        }
        if self.max_line_length == 0 {
            return Err(SmtpError::Config(
                "max_line_length must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("mx.test");
        assert_eq!(config.domain, "mx.test");
        assert_eq!(config.max_message_bytes, 1_000_000);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.mail_store_capacity, 1024);
        assert!(config.allow_extensions);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_from_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            domain = "mail.example"
            transaction_log_capacity = 2
            allow_extensions = false
            idle_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.domain, "mail.example");
        assert_eq!(config.transaction_log_capacity, 2);
        assert!(!config.allow_extensions);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.max_body_lines, 10_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = ServerConfig::from_toml_str("port = 25");
        assert!(matches!(result, Err(SmtpError::ConfigParse(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = ServerConfig::from_toml_str("domain = \"  \"");
        assert!(matches!(result, Err(SmtpError::Config(_))));

        let result = ServerConfig::from_toml_str("buffer_size = 0");
        assert!(matches!(result, Err(SmtpError::Config(_))));
    }
}

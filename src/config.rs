use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::diagnostics::REDACTED;
use crate::{Error, Result};

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 20;
pub const MIN_POLLING_INTERVAL_SECS: u64 = 5;

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

/// Settings binding one account to one installation.
#[derive(Debug, Deserialize)]
pub struct EntryConfig {
    pub username: String,
    pub password: SecretString,
    pub install_id: String,
    #[serde(default)]
    pub install_name: String,
    /// Seconds between poll cycles.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

impl EntryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EntryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(Error::InvalidConfig("username is required".into()));
        }
        if self.install_id.trim().is_empty() {
            return Err(Error::InvalidConfig("install_id is required".into()));
        }
        if self.polling_interval < MIN_POLLING_INTERVAL_SECS {
            return Err(Error::InvalidConfig(format!(
                "polling_interval must be at least {MIN_POLLING_INTERVAL_SECS} seconds, got {}",
                self.polling_interval
            )));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval.max(MIN_POLLING_INTERVAL_SECS))
    }

    /// The configuration as JSON with the password masked.
    pub fn redacted(&self) -> Value {
        json!({
            "username": self.username,
            "password": REDACTED,
            "install_id": self.install_id,
            "install_name": self.install_name,
            "polling_interval": self.polling_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn parses_with_defaults() {
        let config = EntryConfig::from_json(
            r#"{"username": "me@example.com", "password": "hunter2", "install_id": "ins-1"}"#,
        )
        .unwrap();
        assert_eq!(config.polling_interval(), Duration::from_secs(20));
        assert_eq!(config.password.expose_secret(), "hunter2");
        assert!(config.install_name.is_empty());
    }

    #[test]
    fn rejects_short_polling_interval() {
        let err = EntryConfig::from_json(
            r#"{"username": "me", "password": "pw", "install_id": "ins-1", "polling_interval": 2}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref m) if m.contains("at least 5")));
    }

    #[test]
    fn redacted_hides_password() {
        let config = EntryConfig::from_json(
            r#"{"username": "me", "password": "hunter2", "install_id": "ins-1", "polling_interval": 30}"#,
        )
        .unwrap();
        let redacted = config.redacted();
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["polling_interval"], 30);
        assert!(!redacted.to_string().contains("hunter2"));
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}

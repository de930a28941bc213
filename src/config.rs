//! Client configuration: one JSON file, optionally overridden from the environment.
//!
//! `EXCHANGE_CLIENT_CONFIG` names the file (default `client_config.json`).
//! `FAIRNESS_DELAY_US` overrides `fairness.delay_us`.

use crate::archive::ArchiveLocation;
use crate::channel::{ChannelLimits, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_RECORD_BYTES};
use crate::error::ClientError;
use crate::fairness::FairnessPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "EXCHANGE_CLIENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "client_config.json";
pub const FAIRNESS_DELAY_ENV: &str = "FAIRNESS_DELAY_US";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway address used for both order submission and subscriptions.
    pub gateway_address: String,
    pub client_id: String,
    pub client_token: String,
    pub project_id: String,
    #[serde(alias = "bigtable_id")]
    pub instance_id: String,
    pub table_id: String,
    pub fairness: FairnessPolicy,
    pub channel_capacity: usize,
    pub max_record_bytes: usize,
    /// Items kept per symbol for recent trade/book queries.
    pub recent_capacity: usize,
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_address: String::new(),
            client_id: String::new(),
            client_token: String::new(),
            project_id: String::new(),
            instance_id: String::new(),
            table_id: String::new(),
            fairness: FairnessPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            recent_capacity: 1024,
            poll_interval_ms: 10,
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    /// Loads the file named by `EXCHANGE_CLIENT_CONFIG` and applies overrides.
    pub fn from_env() -> Result<Self, ClientError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(path)?.with_env_overrides()
    }

    /// Applies `FAIRNESS_DELAY_US` when it is set.
    pub fn with_env_overrides(self) -> Result<Self, ClientError> {
        match std::env::var(FAIRNESS_DELAY_ENV) {
            Ok(raw) => self.with_fairness_delay(&raw),
            Err(_) => Ok(self),
        }
    }

    /// Sets `fairness.delay_us` from its textual form; anything that is not a
    /// positive integer is a config error.
    pub fn with_fairness_delay(mut self, raw: &str) -> Result<Self, ClientError> {
        self.fairness.delay_us = raw
            .trim()
            .parse()
            .map_err(|_| ClientError::Config(format!("{}={} is not a number", FAIRNESS_DELAY_ENV, raw)))?;
        if self.fairness.delay_us == 0 {
            return Err(ClientError::Config(format!("{} must be positive", FAIRNESS_DELAY_ENV)));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let required = [
            ("gateway_address", &self.gateway_address),
            ("client_id", &self.client_id),
            ("project_id", &self.project_id),
            ("instance_id", &self.instance_id),
            ("table_id", &self.table_id),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.is_empty()) {
            return Err(ClientError::Config(format!("{} must not be empty", name)));
        }
        if self.fairness.delay_us == 0 {
            return Err(ClientError::Config("fairness.delay_us must be positive".into()));
        }
        if self.channel_capacity == 0 || self.max_record_bytes == 0 || self.recent_capacity == 0 {
            return Err(ClientError::Config("capacities must be positive".into()));
        }
        Ok(())
    }

    pub fn archive_location(&self) -> ArchiveLocation {
        ArchiveLocation::new(&self.project_id, &self.instance_id, &self.table_id)
    }

    pub fn channel_limits(&self) -> ChannelLimits {
        ChannelLimits {
            capacity: self.channel_capacity,
            max_record_bytes: self.max_record_bytes,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "gateway_address": "gw",
        "client_id": "C1",
        "client_token": "t1",
        "project_id": "proj",
        "bigtable_id": "inst",
        "table_id": "market"
    }"#;

    #[test]
    fn minimal_file_gets_defaults() {
        let config = ClientConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.instance_id, "inst");
        assert_eq!(config.fairness, FairnessPolicy::default());
        assert_eq!(config.channel_limits(), ChannelLimits::default());
        assert_eq!(config.archive_location(), ArchiveLocation::new("proj", "inst", "market"));
    }

    #[test]
    fn nested_fairness_is_read() {
        let json = MINIMAL.replace(
            r#""table_id": "market""#,
            r#""table_id": "market", "fairness": {"delay_us": 250, "book_depth": 5}"#,
        );
        let config = ClientConfig::from_json(&json).unwrap();
        assert_eq!(config.fairness.delay_us, 250);
        assert_eq!(config.fairness.book_depth, 5);
    }

    #[test]
    fn fairness_delay_override_must_parse() {
        let config = ClientConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.clone().with_fairness_delay("250").unwrap().fairness.delay_us, 250);
        assert!(matches!(
            config.clone().with_fairness_delay("100ms"),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(config.with_fairness_delay("0"), Err(ClientError::Config(_))));
    }

    #[test]
    fn empty_ids_and_zero_limits_rejected() {
        assert!(matches!(ClientConfig::from_json("{}"), Err(ClientError::Config(_))));
        let mut config = ClientConfig::from_json(MINIMAL).unwrap();
        config.channel_capacity = 0;
        assert!(config.validate().is_err());
        let mut config = ClientConfig::from_json(MINIMAL).unwrap();
        config.fairness.delay_us = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        assert!(matches!(
            ClientConfig::from_file("/nonexistent/client_config.json"),
            Err(ClientError::Config(_))
        ));
    }
}

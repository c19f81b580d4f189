use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

use crate::job::JobConfig;
use crate::miner::MinerSettings;

pub const CONFIG_PATH_ENV: &str = "MINING_CLIENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/mining-client.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the base node's HTTP interface.
    pub base_node_url: String,
    /// Base URL of the wallet's HTTP interface.
    pub wallet_url: String,

    /// Where to serve /health, /stats and /jobs. Disabled when unset.
    pub status_addr: Option<String>,

    pub log_level: String,

    pub connect_timeout_ms: u64,
    pub template_timeout_ms: u64,
    pub coinbase_timeout_ms: u64,
    pub finalize_timeout_ms: u64,
    pub submit_timeout_ms: u64,

    pub coinbase_fee: u64,
    pub finalize_block: bool,

    pub job_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_jobs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_node_url: "http://127.0.0.1:18142".to_string(),
            wallet_url: "http://127.0.0.1:18142".to_string(),
            status_addr: None,
            log_level: "info".to_string(),
            connect_timeout_ms: 2_000,
            template_timeout_ms: 10_000,
            coinbase_timeout_ms: 10_000,
            finalize_timeout_ms: 10_000,
            submit_timeout_ms: 10_000,
            coinbase_fee: 0,
            finalize_block: true,
            job_interval_ms: 5_000,
            retry_delay_ms: 1_000,
            max_jobs: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: String) -> Result<T, ConfigError> {
    val.parse()
        .map_err(|_| ConfigError::InvalidEnvVar(key.to_string(), val))
}

impl ClientConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file failed: {}", path.display()))?;
        let cfg: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("config parse failed for {}", path.display()))?;
        Ok(cfg)
    }

    /// File (if present) first, then environment overrides, then validation.
    pub fn load() -> anyhow::Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut cfg = if Path::new(&path).exists() {
            Self::from_path(&path)?
        } else {
            ClientConfig::default()
        };

        cfg.apply_env_with(|key| std::env::var(key).ok())?;
        cfg.validate().context("config validation failed")?;
        Ok(cfg)
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("MINING_CLIENT_BASE_NODE_URL") {
            self.base_node_url = val;
        }
        if let Some(val) = lookup("MINING_CLIENT_WALLET_URL") {
            self.wallet_url = val;
        }
        if let Some(val) = lookup("MINING_CLIENT_STATUS_ADDR") {
            self.status_addr = if val.is_empty() { None } else { Some(val) };
        }
        if let Some(val) = lookup("MINING_CLIENT_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = lookup("MINING_CLIENT_MAX_JOBS") {
            self.max_jobs = Some(parse_env("MINING_CLIENT_MAX_JOBS", val)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("base_node_url", &self.base_node_url),
            ("wallet_url", &self.wallet_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }

        for (name, ms) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("template_timeout_ms", self.template_timeout_ms),
            ("coinbase_timeout_ms", self.coinbase_timeout_ms),
            ("finalize_timeout_ms", self.finalize_timeout_ms),
            ("submit_timeout_ms", self.submit_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.max_jobs == Some(0) {
            return Err(ConfigError::Validation(
                "max_jobs must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            template_timeout: Duration::from_millis(self.template_timeout_ms),
            coinbase_timeout: Duration::from_millis(self.coinbase_timeout_ms),
            finalize_timeout: Duration::from_millis(self.finalize_timeout_ms),
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            coinbase_fee: self.coinbase_fee,
            finalize_block: self.finalize_block,
        }
    }

    pub fn miner_settings(&self) -> MinerSettings {
        MinerSettings {
            job: self.job_config(),
            job_interval: Duration::from_millis(self.job_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_jobs: self.max_jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_sample_file_and_local_devnet() {
        let sample: ClientConfig =
            toml::from_str(include_str!("../../../config/mining-client.toml")).unwrap();
        let defaults = ClientConfig::default();
        assert_eq!(defaults.base_node_url, sample.base_node_url);
        assert_eq!(defaults.wallet_url, sample.wallet_url);

        let devnet = format!("http://{}", devnet_node::DevnetConfig::default().listen_addr);
        assert_eq!(defaults.base_node_url, devnet);
        assert_eq!(defaults.wallet_url, devnet);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: ClientConfig = toml::from_str(
            r#"
            base_node_url = "http://node:18142"
            template_timeout_ms = 250
            finalize_block = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.base_node_url, "http://node:18142");
        assert_eq!(cfg.wallet_url, "http://127.0.0.1:18142");
        assert!(!cfg.finalize_block);

        let job = cfg.job_config();
        assert_eq!(job.template_timeout, Duration::from_millis(250));
        assert_eq!(job.coinbase_timeout, Duration::from_secs(10));
        assert_eq!(job.coinbase_fee, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MINING_CLIENT_WALLET_URL", "http://wallet:9000"),
            ("MINING_CLIENT_STATUS_ADDR", "127.0.0.1:7070"),
            ("MINING_CLIENT_MAX_JOBS", "3"),
        ]);

        let mut cfg = ClientConfig::default();
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.wallet_url, "http://wallet:9000");
        assert_eq!(cfg.status_addr.as_deref(), Some("127.0.0.1:7070"));
        assert_eq!(cfg.miner_settings().max_jobs, Some(3));
    }

    #[test]
    fn bad_env_number_is_reported() {
        let mut cfg = ClientConfig::default();
        let err = cfg
            .apply_env_with(|k| (k == "MINING_CLIENT_MAX_JOBS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnvVar(key, val) if key == "MINING_CLIENT_MAX_JOBS" && val == "lots"
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let cfg = ClientConfig {
            submit_timeout_ms: 0,
            ..ClientConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("submit_timeout_ms"));
    }

    #[test]
    fn rejects_non_http_url() {
        let cfg = ClientConfig {
            base_node_url: "127.0.0.1:18142".to_string(),
            ..ClientConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

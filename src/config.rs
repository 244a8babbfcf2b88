use std::env;

use anyhow::{anyhow, Result};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

fn default_target_prefix() -> String {
    "decompressed".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_time_budget_ms() -> u64 {
    30_000
}

/// Process configuration, built once at entry and handed to the orchestrator.
/// Nothing below this layer reads the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Destination bucket; env `targetBucket`.
    #[serde(default)]
    pub target_bucket: String,
    /// Destination region; env `targetRegion`.
    #[serde(default)]
    pub target_region: String,
    #[serde(default = "default_target_prefix")]
    pub target_prefix: String,
    /// Credentials; env `secretId` / `secretKey`.
    #[serde(default, skip_serializing)]
    pub secret_id: String,
    #[serde(default, skip_serializing)]
    pub secret_key: String,
    /// Attempt budget per task, validation and pipeline included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock budget for the whole batch.
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,
    /// Endpoint override for S3-compatible stores (localstack/minio).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub structured_logging: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target_bucket: String::new(),
            target_region: String::new(),
            target_prefix: default_target_prefix(),
            secret_id: String::new(),
            secret_key: String::new(),
            max_attempts: default_max_attempts(),
            time_budget_ms: default_time_budget_ms(),
            endpoint: None,
            structured_logging: false,
        }
    }
}

impl RelayConfig {
    /// Loads the optional YAML file, then lets the event platform's
    /// environment variables override it, then validates.
    pub fn load(path: Option<&str>) -> Result<RelayConfig> {
        let mut config: RelayConfig = match path {
            Some(path) => {
                let config_str = std::fs::read_to_string(path)?;
                Figment::new().merge(Yaml::string(&config_str)).extract()?
            }
            None => RelayConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        for (var, field) in [
            ("targetBucket", &mut self.target_bucket),
            ("targetRegion", &mut self.target_region),
            ("secretId", &mut self.secret_id),
            ("secretKey", &mut self.secret_key),
        ] {
            if let Ok(value) = env::var(var) {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("targetBucket", &self.target_bucket),
            ("targetRegion", &self.target_region),
            ("secretId", &self.secret_id),
            ("secretKey", &self.secret_key),
        ] {
            if value.is_empty() {
                return Err(anyhow!("missing required configuration: {name}"));
            }
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be at least 1"));
        }
        if self.time_budget_ms == 0 {
            return Err(anyhow!("time_budget_ms must be non-zero"));
        }
        Ok(())
    }
}

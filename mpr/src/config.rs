use std::time::Duration;

use memo_key::PipelineMemospaceHandler;
use runner::RunnerConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid pipeline memospace handler pattern {pattern:?}: {message}")]
    InvalidMemospaceHandler { pattern: String, message: String },
    #[error(
        "lease_heartbeat_seconds ({heartbeat}) must be less than a third of lease_ttl_seconds ({ttl})"
    )]
    HeartbeatTooSlow { heartbeat: u64, ttl: i64 },
}

fn default_pipeline_id() -> String {
    "default".to_owned()
}

fn default_orchestrator_id() -> String {
    "mpr-orchestrator".to_owned()
}

fn default_lease_ttl_seconds() -> i64 {
    120
}

fn default_lease_heartbeat_seconds() -> u64 {
    30
}

fn default_wait_budget_seconds() -> u64 {
    600
}

fn default_deferred_concurrency() -> usize {
    deferred_work::DEFAULT_CONCURRENCY
}

fn default_shim_concurrency() -> usize {
    8
}

/// One override rule, as written in a config file: `apply_pipeline_memospace_handlers` is what
/// actually applies these once parsed into `memo_key::PipelineMemospaceHandler`.
#[derive(Clone, Debug, Deserialize)]
pub struct MemospaceHandlerConfig {
    pub pattern: String,
    pub replacement: String,
}

/// Process configuration for one `mpr` deployment: where results live, how leases behave, and how
/// many calls may be in flight at once. Loaded from a TOML file and then overridden by any `MPR_*`
/// environment variable that names one of its fields.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub blob_root: String,
    #[serde(default = "default_pipeline_id")]
    pub pipeline_id: String,
    #[serde(default = "default_orchestrator_id")]
    pub orchestrator_id: String,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: i64,
    #[serde(default = "default_lease_heartbeat_seconds")]
    pub lease_heartbeat_seconds: u64,
    #[serde(default = "default_wait_budget_seconds")]
    pub wait_budget_seconds: u64,
    #[serde(default)]
    pub require_all_results: bool,
    #[serde(default = "default_deferred_concurrency")]
    pub deferred_concurrency: usize,
    #[serde(default = "default_shim_concurrency")]
    pub shim_concurrency: usize,
    #[serde(default)]
    pub pipeline_memospace_handlers: Vec<MemospaceHandlerConfig>,
    #[serde(default)]
    pub summary_dir: Option<String>,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(s)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overrides any field with its `MPR_<FIELD_NAME>` environment variable, if set. Numeric and
    /// boolean fields that fail to parse are left at whatever the file (or default) supplied.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MPR_BLOB_ROOT") {
            self.blob_root = v;
        }
        if let Ok(v) = std::env::var("MPR_PIPELINE_ID") {
            self.pipeline_id = v;
        }
        if let Ok(v) = std::env::var("MPR_ORCHESTRATOR_ID") {
            self.orchestrator_id = v;
        }
        if let Some(v) = std::env::var("MPR_LEASE_TTL_SECONDS").ok().and_then(|s| s.parse().ok()) {
            self.lease_ttl_seconds = v;
        }
        if let Some(v) = std::env::var("MPR_LEASE_HEARTBEAT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.lease_heartbeat_seconds = v;
        }
        if let Some(v) = std::env::var("MPR_WAIT_BUDGET_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.wait_budget_seconds = v;
        }
        if let Some(v) = std::env::var("MPR_REQUIRE_ALL_RESULTS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.require_all_results = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_heartbeat_seconds.saturating_mul(3) as i64 >= self.lease_ttl_seconds {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat: self.lease_heartbeat_seconds,
                ttl: self.lease_ttl_seconds,
            });
        }
        Ok(())
    }

    /// Builds the `runner::RunnerConfig` this configuration describes, validating it first.
    pub fn to_runner_config(&self) -> Result<RunnerConfig, ConfigError> {
        self.validate()?;

        let mut handlers = Vec::with_capacity(self.pipeline_memospace_handlers.len());
        for h in &self.pipeline_memospace_handlers {
            let handler =
                PipelineMemospaceHandler::new(&h.pattern, &h.replacement).map_err(|message| {
                    ConfigError::InvalidMemospaceHandler {
                        pattern: h.pattern.clone(),
                        message,
                    }
                })?;
            handlers.push(handler);
        }

        let mut runner_config = RunnerConfig::new(self.blob_root.clone(), self.orchestrator_id.clone());
        runner_config.lease_ttl_seconds = self.lease_ttl_seconds;
        runner_config.lease_heartbeat = Duration::from_secs(self.lease_heartbeat_seconds);
        runner_config.wait_budget = Duration::from_secs(self.wait_budget_seconds);
        runner_config.require_all_results = self.require_all_results;
        runner_config.deferred_concurrency = self.deferred_concurrency;
        runner_config.pipeline_memospace_handlers = handlers;
        runner_config.summary_dir.clone_from(&self.summary_dir);
        Ok(runner_config)
    }
}

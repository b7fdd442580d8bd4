// SPDX-License-Identifier: MIT

//! Scheduler configuration
//!
//! Loaded from an optional YAML file, then overridden by `LAYERFLOW_*`
//! environment variables (a `.env` file is honoured via dotenv in `main`).

use crate::core::error::FlowError;
use crate::scheduler::flow::dag::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings for a scheduler process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Identifier stamped on every dag this scheduler starts
    pub scheduler_name: String,
    /// Behaviour after a layer finishes with a failed node
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrently running remote sends
    pub max_concurrent_dispatches: usize,
    /// Capacity of the node transition broadcast channel
    pub event_buffer: usize,
    /// Actuator base URLs, tried from last to first
    pub actuators: Vec<String>,
    /// Directory holding `<group>/<name>.yaml` flow definitions
    pub flows_dir: PathBuf,
    /// HTTP client timeout for actuator calls
    pub request_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "scheduler-0".to_string(),
            failure_policy: FailurePolicy::FailFast,
            max_concurrent_dispatches: 64,
            event_buffer: 1024,
            actuators: Vec::new(),
            flows_dir: PathBuf::from("flows"),
            request_timeout_secs: 300,
        }
    }
}

impl SchedulerConfig {
    /// Load from a YAML file; missing keys keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FlowError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, FlowError> {
        let config: SchedulerConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LAYERFLOW_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self, FlowError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("LAYERFLOW_SCHEDULER_NAME") {
            self.scheduler_name = name;
        }
        if let Some(policy) = lookup("LAYERFLOW_FAILURE_POLICY") {
            self.failure_policy = match policy.to_lowercase().as_str() {
                "fail_fast" | "fail-fast" => FailurePolicy::FailFast,
                "continue" => FailurePolicy::Continue,
                other => {
                    return Err(FlowError::config(format!(
                        "Unknown failure policy: {}",
                        other
                    )))
                }
            };
        }
        if let Some(max) = lookup("LAYERFLOW_MAX_CONCURRENT_DISPATCHES") {
            self.max_concurrent_dispatches = max.parse().map_err(|_| {
                FlowError::config(format!("Invalid LAYERFLOW_MAX_CONCURRENT_DISPATCHES: {}", max))
            })?;
        }
        if let Some(actuators) = lookup("LAYERFLOW_ACTUATORS") {
            self.actuators = actuators
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup("LAYERFLOW_FLOWS_DIR") {
            self.flows_dir = PathBuf::from(dir);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.max_concurrent_dispatches == 0 {
            return Err(FlowError::config("max_concurrent_dispatches must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(FlowError::config("event_buffer must be at least 1"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

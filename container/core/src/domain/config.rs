// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Container configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Buffered capacity of the container event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Concurrency bound of the default managed executor.
    #[serde(default = "default_executor_concurrency")]
    pub default_executor_concurrency: usize,

    #[serde(default)]
    pub passivation: PassivationConfig,
}

/// Capacity bound and sweep cadence of stateful-instance passivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassivationConfig {
    /// Active stateful instances beyond this bound are passivated in
    /// least-recently-used order.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// How often the background sweep runs.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// Active instances idle beyond this duration are passivated.
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
}

impl ContainerConfig {
    /// Validate the configuration structure and constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than zero".to_string());
        }
        if self.default_executor_concurrency == 0 {
            return Err("default_executor_concurrency must be greater than zero".to_string());
        }
        self.passivation.validate()
    }
}

impl PassivationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("passivation.capacity must be greater than zero".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("passivation.sweep_interval must be greater than zero".to_string());
        }
        if self.idle_timeout < self.sweep_interval {
            return Err(format!(
                "passivation.idle_timeout ({:?}) must not be shorter than sweep_interval ({:?})",
                self.idle_timeout, self.sweep_interval
            ));
        }
        Ok(())
    }
}

// Defaults
fn default_event_capacity() -> usize {
    1000
}
fn default_executor_concurrency() -> usize {
    32
}
fn default_capacity() -> usize {
    1000
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(600)
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            default_executor_concurrency: default_executor_concurrency(),
            passivation: PassivationConfig::default(),
        }
    }
}

impl Default for PassivationConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            sweep_interval: default_sweep_interval(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration and validation.

use serde::Deserialize;

use crate::constants;
use crate::error::ConfigError;
use crate::policy::Policy;

/// Configuration for the shipper, fixed for the lifetime of the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Target index for bulk writes.
    pub sink_target: String,

    /// Drain throttle window in milliseconds. Bursts of enqueues inside one
    /// window collapse into a single drain.
    #[serde(default = "default_flush_interval_millis")]
    pub flush_interval_millis: u64,

    /// Filtering policy applied to every event and composite.
    #[serde(default)]
    pub policy: Policy,
}

fn default_flush_interval_millis() -> u64 {
    constants::DEFAULT_FLUSH_INTERVAL_MILLIS
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sink_target: "logs".to_string(),
            flush_interval_millis: constants::DEFAULT_FLUSH_INTERVAL_MILLIS,
            policy: Policy::default(),
        }
    }
}

impl Config {
    /// Parse and validate a configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Fails fast, before any event is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink_target.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sinkTarget cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Service configuration.
//!
//! Loaded from YAML. Every section and every key is optional:
//!
//! ```yaml
//! system_id: autorest-srv
//! backend_path: ./configs/backends
//! mqtt:
//!   client_prefix: autorest
//!   keep_alive_secs: 5
//! retry:
//!   initial_delay_ms: 500
//!   max_delay_ms: 30000
//! background:
//!   period_secs: 86400
//!   delete_orphaned_files: false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AutorestError, Result};
use crate::reaper::ReaperPolicy;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Identifier of this service instance, stamped on routes it creates.
    #[serde(default = "default_system_id")]
    pub system_id: String,

    /// Directory scanned for backend definition files at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_path: Option<PathBuf>,

    #[serde(default)]
    pub mqtt: MqttSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub background: BackgroundSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Client ids are `<client_prefix>.<backend>.<datasource>`.
    #[serde(default = "default_client_prefix")]
    pub client_prefix: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Capacity of the rumqttc request channel and of each datasource's
    /// message queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Attempts per backend registration sub-step.
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSettings {
    /// Orphaned-file sweep period. `0` disables the sweep.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Delete orphans instead of only listing them.
    #[serde(default)]
    pub delete_orphaned_files: bool,

    /// Blobs younger than this are never considered orphaned.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Upper bound for a single storage or transformation call made while
    /// processing a message.
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_system_id() -> String {
    "autorest-srv".to_string()
}

fn default_client_prefix() -> String {
    "autorest".to_string()
}

fn default_keep_alive_secs() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    100
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_registration_attempts() -> u32 {
    3
}

fn default_period_secs() -> u64 {
    24 * 60 * 60
}

fn default_grace_period_secs() -> u64 {
    60 * 60
}

fn default_storage_timeout_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            system_id: default_system_id(),
            backend_path: None,
            mqtt: MqttSettings::default(),
            retry: RetrySettings::default(),
            background: BackgroundSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            client_prefix: default_client_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            registration_attempts: default_registration_attempts(),
        }
    }
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            delete_orphaned_files: false,
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AutorestError::config(format!("malformed service config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AutorestError::config(format!("can't read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.client_prefix.is_empty() {
            return Err(AutorestError::config("mqtt.client_prefix cannot be empty"));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(AutorestError::config("mqtt.keep_alive_secs cannot be 0"));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(AutorestError::config("mqtt.channel_capacity cannot be 0"));
        }
        if self.retry.initial_delay_ms == 0 {
            return Err(AutorestError::config("retry.initial_delay_ms cannot be 0"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(AutorestError::config(format!(
                "retry.initial_delay_ms ({}) cannot be greater than retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.retry.registration_attempts == 0 {
            return Err(AutorestError::config("retry.registration_attempts cannot be 0"));
        }
        if self.storage.timeout_secs == 0 {
            return Err(AutorestError::config("storage.timeout_secs cannot be 0"));
        }
        Ok(())
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.background.grace_period_secs)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.background.period_secs)
    }

    pub fn reaper_policy(&self) -> ReaperPolicy {
        ReaperPolicy {
            delete_orphans: self.background.delete_orphaned_files,
            grace_period: self.grace_period(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry.initial_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = ServiceConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.mqtt.client_prefix, "autorest");
        assert_eq!(config.storage_timeout(), Duration::from_secs(60));
        assert_eq!(config.grace_period(), Duration::from_secs(3600));
        assert!(!config.background.delete_orphaned_files);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
system_id: edge-01
backend_path: ./backends
mqtt:
  client_prefix: edge
background:
  delete_orphaned_files: true
  period_secs: 60
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.system_id, "edge-01");
        assert_eq!(config.backend_path, Some(PathBuf::from("./backends")));
        assert_eq!(config.mqtt.client_prefix, "edge");
        assert_eq!(config.mqtt.keep_alive_secs, 5);
        assert!(config.background.delete_orphaned_files);
        assert_eq!(config.background.period_secs, 60);
        assert_eq!(config.background.grace_period_secs, 3600);

        let policy = config.reaper_policy();
        assert!(policy.delete_orphans);
        assert_eq!(policy.grace_period, Duration::from_secs(3600));
        assert_eq!(config.sweep_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_inverted_retry_bounds() {
        let yaml = "retry:\n  initial_delay_ms: 5000\n  max_delay_ms: 100\n";
        let err = ServiceConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, AutorestError::Config { .. }));
        assert!(err.to_string().contains("initial_delay_ms"));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = ServiceConfig::default();
        config.mqtt.keep_alive_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.retry.registration_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.storage.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(ServiceConfig::from_yaml("mqtt: [1, 2").is_err());
    }
}

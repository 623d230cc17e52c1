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

//! Configuration types for the MQTT destination processor.

use std::time::Duration;

use rumqttc::MqttOptions;
use serde::Deserialize;

use autorest_core::config::MqttSettings;
use autorest_core::model::MqttConfig;
use autorest_core::Result;

/// Connection settings of one MQTT destination.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttPublisherConfig {
    /// `<backend>.<destination>`, used as log prefix.
    pub id: String,
    /// MQTT broker hostname or IP.
    pub broker_host: String,
    /// MQTT broker port (default: 1883).
    pub port: u16,
    /// Topic template, rendered against each document (e.g. `alerts/{{room}}`).
    pub topic: String,
    /// Defaults to `"autorest.processor.{id}"`.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub channel_capacity: usize,
}

impl MqttPublisherConfig {
    /// Start building a new config with required fields.
    pub fn builder(
        id: impl Into<String>,
        broker_host: impl Into<String>,
        topic: impl Into<String>,
    ) -> MqttPublisherConfigBuilder {
        let id = id.into();
        let defaults = MqttSettings::default();
        MqttPublisherConfigBuilder {
            client_id: format!("{}.processor.{id}", defaults.client_prefix),
            id,
            broker_host: broker_host.into(),
            topic: topic.into(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_secs: defaults.keep_alive_secs,
            channel_capacity: defaults.channel_capacity,
        }
    }

    /// Config for destination `destination` of `backend`.
    pub fn for_destination(
        settings: &MqttSettings,
        backend: &str,
        destination: &str,
        config: &MqttConfig,
    ) -> Result<Self> {
        let (host, port) = config.broker_address()?;
        let id = format!("{backend}.{destination}");
        let mut builder = Self::builder(&id, host, &config.topic)
            .port(port)
            .client_id(format!("{}.processor.{id}", settings.client_prefix))
            .keep_alive_secs(settings.keep_alive_secs)
            .channel_capacity(settings.channel_capacity);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.username(username);
            if let Some(password) = &config.password {
                builder = builder.password(password);
            }
        }
        Ok(builder.build())
    }

    pub fn broker(&self) -> String {
        format!("{}:{}", self.broker_host, self.port)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker_host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Builder for [`MqttPublisherConfig`].
pub struct MqttPublisherConfigBuilder {
    id: String,
    broker_host: String,
    topic: String,
    port: u16,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    keep_alive_secs: u64,
    channel_capacity: usize,
}

impl MqttPublisherConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> MqttPublisherConfig {
        MqttPublisherConfig {
            id: self.id,
            broker_host: self.broker_host,
            port: self.port,
            topic: self.topic,
            client_id: self.client_id,
            username: self.username,
            password: self.password,
            keep_alive_secs: self.keep_alive_secs,
            channel_capacity: self.channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = MqttPublisherConfig::builder("sensors.alerts", "localhost", "alerts").build();
        assert_eq!(config.client_id, "autorest.processor.sensors.alerts");
        assert_eq!(config.port, 1883);
        assert!(config.username.is_none());
    }

    #[test]
    fn test_for_destination() {
        let mqtt = MqttConfig {
            broker: "mqtt://10.0.0.5:1884".into(),
            topic: "alerts/{{room}}".into(),
            username: Some("ops".into()),
            ..Default::default()
        };
        let config =
            MqttPublisherConfig::for_destination(&MqttSettings::default(), "sensors", "alertSink", &mqtt)
                .unwrap();
        assert_eq!(config.id, "sensors.alertSink");
        assert_eq!(config.broker(), "10.0.0.5:1884");
        assert_eq!(config.client_id, "autorest.processor.sensors.alertSink");
        assert_eq!(config.username.as_deref(), Some("ops"));
        assert!(config.password.is_none());
        assert_eq!(config.mqtt_options().client_id(), "autorest.processor.sensors.alertSink");
    }
}

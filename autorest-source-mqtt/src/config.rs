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

//! Client settings for one MQTT datasource connection.

use std::time::Duration;

use rumqttc::MqttOptions;
use serde::Deserialize;

use autorest_core::config::MqttSettings;
use autorest_core::model::MqttConfig;
use autorest_core::Result;

/// Connection settings of a datasource client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttClientSettings {
    /// `<prefix>.<backend>.<datasource>`
    pub client_id: String,
    pub broker_host: String,
    pub port: u16,
    /// Topic filter to subscribe to (supports wildcards like `sensors/#`).
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub channel_capacity: usize,
}

impl MqttClientSettings {
    /// Start building settings with the required fields.
    pub fn builder(
        client_id: impl Into<String>,
        broker_host: impl Into<String>,
        topic: impl Into<String>,
    ) -> MqttClientSettingsBuilder {
        let defaults = MqttSettings::default();
        MqttClientSettingsBuilder {
            client_id: client_id.into(),
            broker_host: broker_host.into(),
            topic: topic.into(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_secs: defaults.keep_alive_secs,
            channel_capacity: defaults.channel_capacity,
        }
    }

    /// Settings for datasource `datasource` of `backend`.
    pub fn for_datasource(
        settings: &MqttSettings,
        backend: &str,
        datasource: &str,
        config: &MqttConfig,
    ) -> Result<Self> {
        let (host, port) = config.broker_address()?;
        let client_id = format!("{}.{backend}.{datasource}", settings.client_prefix);
        let mut builder = Self::builder(client_id, host, &config.topic)
            .port(port)
            .keep_alive_secs(settings.keep_alive_secs)
            .channel_capacity(settings.channel_capacity);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(username, config.password.clone().unwrap_or_default());
        }
        Ok(builder.build())
    }

    pub fn broker(&self) -> String {
        format!("{}:{}", self.broker_host, self.port)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker_host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        options.set_clean_session(true);
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options
    }
}

pub struct MqttClientSettingsBuilder {
    client_id: String,
    broker_host: String,
    topic: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    keep_alive_secs: u64,
    channel_capacity: usize,
}

impl MqttClientSettingsBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
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

    pub fn build(self) -> MqttClientSettings {
        MqttClientSettings {
            client_id: self.client_id,
            broker_host: self.broker_host,
            port: self.port,
            topic: self.topic,
            username: self.username,
            password: self.password,
            keep_alive_secs: self.keep_alive_secs,
            channel_capacity: self.channel_capacity,
        }
    }
}

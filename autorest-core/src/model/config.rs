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

//! Typed datasource and destination configuration.
//!
//! Backend definitions carry their `config` blocks as untyped JSON. They are
//! decoded exactly once, when the backend is prepared, into the enums below.

use serde::{Deserialize, Serialize};

use crate::error::{AutorestError, Result};
use crate::model::backend::{Backend, DataSource, Destination};

pub const DATASOURCE_TYPE_MQTT: &str = "mqtt";
pub const DATASOURCE_TYPE_REST: &str = "rest";
pub const DESTINATION_TYPE_MQTT: &str = "mqtt";
pub const DESTINATION_TYPE_NULL: &str = "null";

pub const PAYLOAD_JSON: &str = "application/json";
pub const PAYLOAD_SIMPLE: &str = "application/x.simple";

const DEFAULT_MQTT_PORT: u16 = 1883;

/// MQTT connection settings shared by datasources and destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    /// Broker URI, e.g. `tcp://broker.local:1883`.
    pub broker: String,
    /// Topic filter (datasource) or topic template (destination).
    pub topic: String,
    /// Accepted for compatibility; subscriptions and publishes use QoS 0.
    #[serde(default)]
    pub qos: u8,
    /// Payload content type of inbound messages.
    #[serde(default)]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Document attribute that receives the inbound topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_topic_as_attribute: Option<String>,
    /// Document attribute that receives a simple (scalar) payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_value_attribute: Option<String>,
    /// Field type the simple payload is coerced to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_value_attribute_type: Option<String>,
}

impl MqttConfig {
    /// Split the broker URI into host and port.
    ///
    /// Accepts `tcp://host:port`, `mqtt://host:port` or a bare `host[:port]`.
    pub fn broker_address(&self) -> Result<(String, u16)> {
        let rest = match self.broker.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = scheme.to_ascii_lowercase();
                if scheme != "tcp" && scheme != "mqtt" {
                    return Err(AutorestError::config(format!(
                        "unsupported broker scheme '{scheme}' in '{}'",
                        self.broker
                    )));
                }
                rest
            }
            None => self.broker.as_str(),
        };
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(AutorestError::config("broker address cannot be empty"));
        }

        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    AutorestError::config(format!("invalid broker port in '{}'", self.broker))
                })?;
                Ok((host.to_string(), port))
            }
            None => Ok((rest.to_string(), DEFAULT_MQTT_PORT)),
        }
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if self.topic.is_empty() {
            return Err(AutorestError::config(format!("{owner}: mqtt topic cannot be empty")));
        }
        self.broker_address()
            .map_err(|e| AutorestError::config(format!("{owner}: {e}")))?;
        Ok(())
    }
}

/// Config of a `rest` datasource. Documents are pushed by the HTTP layer, so
/// there is nothing to connect to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestConfig {}

#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceConfig {
    Mqtt(MqttConfig),
    Rest(RestConfig),
}

impl DataSourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataSourceConfig::Mqtt(_) => DATASOURCE_TYPE_MQTT,
            DataSourceConfig::Rest(_) => DATASOURCE_TYPE_REST,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DestinationConfig {
    Mqtt(MqttConfig),
    Null,
}

impl DestinationConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            DestinationConfig::Mqtt(_) => DESTINATION_TYPE_MQTT,
            DestinationConfig::Null => DESTINATION_TYPE_NULL,
        }
    }
}

/// A datasource whose config has been decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDataSource {
    pub name: String,
    pub destinations: Vec<String>,
    pub rule: Option<String>,
    pub config: DataSourceConfig,
}

impl PreparedDataSource {
    pub fn from_definition(backend: &str, datasource: &DataSource) -> Result<Self> {
        let owner = format!("backend: {backend}, datasource: {}", datasource.name);
        let config = match datasource.kind.as_str() {
            DATASOURCE_TYPE_MQTT => {
                let config: MqttConfig = decode(&datasource.config, &owner)?;
                config.validate(&owner)?;
                DataSourceConfig::Mqtt(config)
            }
            DATASOURCE_TYPE_REST => DataSourceConfig::Rest(decode(&datasource.config, &owner)?),
            other => {
                return Err(AutorestError::config(format!(
                    "{owner}, unknown datasource type: '{other}'"
                )))
            }
        };
        Ok(Self {
            name: datasource.name.clone(),
            destinations: datasource.destinations.clone(),
            rule: datasource.rule.clone().filter(|r| !r.is_empty()),
            config,
        })
    }
}

/// A destination whose config has been decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDestination {
    pub name: String,
    pub config: DestinationConfig,
}

impl PreparedDestination {
    pub fn from_definition(backend: &str, destination: &Destination) -> Result<Self> {
        let owner = format!("backend: {backend}, destination: {}", destination.name);
        let config = match destination.kind.as_str() {
            DESTINATION_TYPE_MQTT => {
                let config: MqttConfig = decode(&destination.config, &owner)?;
                config.validate(&owner)?;
                DestinationConfig::Mqtt(config)
            }
            DESTINATION_TYPE_NULL => DestinationConfig::Null,
            other => {
                return Err(AutorestError::config(format!(
                    "{owner}, unknown destination type: '{other}'"
                )))
            }
        };
        Ok(Self {
            name: destination.name.clone(),
            config,
        })
    }
}

/// A backend definition together with its decoded datasource and destination
/// configs, ready for registration.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBackend {
    pub definition: Backend,
    pub datasources: Vec<PreparedDataSource>,
    pub destinations: Vec<PreparedDestination>,
}

impl PreparedBackend {
    pub fn name(&self) -> &str {
        &self.definition.backendname
    }

    pub fn datasource(&self, name: &str) -> Option<&PreparedDataSource> {
        self.datasources.iter().find(|d| d.name == name)
    }
}

fn decode<T: serde::de::DeserializeOwned + Default>(
    value: &serde_json::Value,
    owner: &str,
) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| AutorestError::config(format!("{owner}, malformed config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mqtt_datasource(config: serde_json::Value) -> DataSource {
        DataSource {
            name: "temperature".into(),
            kind: "mqtt".into(),
            destinations: vec!["$model.reading".into()],
            rule: Some(String::new()),
            config,
        }
    }

    #[test]
    fn test_broker_address_variants() {
        let mut config = MqttConfig {
            broker: "tcp://broker.local:1884".into(),
            ..Default::default()
        };
        assert_eq!(config.broker_address().unwrap(), ("broker.local".into(), 1884));

        config.broker = "broker.local".into();
        assert_eq!(config.broker_address().unwrap(), ("broker.local".into(), 1883));

        config.broker = "ssl://broker.local:8883".into();
        assert!(config.broker_address().is_err());

        config.broker = "tcp://broker.local:notaport".into();
        assert!(config.broker_address().is_err());
    }

    #[test]
    fn test_prepare_mqtt_datasource() {
        let ds = mqtt_datasource(json!({
            "broker": "tcp://127.0.0.1:1883",
            "topic": "home/temp",
            "payload": "application/x.simple",
            "simpleValueAttribute": "value",
            "simpleValueAttributeType": "float",
            "addTopicAsAttribute": "topic"
        }));
        let prepared = PreparedDataSource::from_definition("sensors", &ds).unwrap();
        // an empty rule name means "no rule"
        assert!(prepared.rule.is_none());
        match prepared.config {
            DataSourceConfig::Mqtt(config) => {
                assert_eq!(config.topic, "home/temp");
                assert_eq!(config.simple_value_attribute.as_deref(), Some("value"));
                assert_eq!(config.add_topic_as_attribute.as_deref(), Some("topic"));
            }
            other => panic!("Expected mqtt config, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_rejects_unknown_type() {
        let mut ds = mqtt_datasource(json!({}));
        ds.kind = "kafka".into();
        let err = PreparedDataSource::from_definition("sensors", &ds).unwrap_err();
        assert!(matches!(err, AutorestError::Config { .. }));
        assert!(err.to_string().contains("unknown datasource type"));

        let dest = Destination {
            name: "sink".into(),
            kind: "smtp".into(),
            config: json!({}),
        };
        assert!(PreparedDestination::from_definition("sensors", &dest).is_err());
    }

    #[test]
    fn test_prepare_rejects_mqtt_without_topic() {
        let ds = mqtt_datasource(json!({"broker": "tcp://127.0.0.1:1883"}));
        let err = PreparedDataSource::from_definition("sensors", &ds).unwrap_err();
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_prepare_rest_and_null() {
        let ds = DataSource {
            name: "upload".into(),
            kind: "rest".into(),
            destinations: vec![],
            rule: None,
            config: serde_json::Value::Null,
        };
        let prepared = PreparedDataSource::from_definition("sensors", &ds).unwrap();
        assert_eq!(prepared.config.type_name(), "rest");

        let dest = Destination {
            name: "void".into(),
            kind: "null".into(),
            config: serde_json::Value::Null,
        };
        let prepared = PreparedDestination::from_definition("sensors", &dest).unwrap();
        assert_eq!(prepared.config, DestinationConfig::Null);
    }
}

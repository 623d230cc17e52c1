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

//! Backend definition types, as read from YAML files or posted by operators.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved index name for the full-text index over all model fields.
pub const FULLTEXT_INDEX_NAME: &str = "fulltext";

/// Destination reference prefix meaning "persist as a document of this model".
pub const MODEL_DESTINATION_PREFIX: &str = "$model.";

/// A named, independently (de)registrable set of models, datasources, rules
/// and destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub backendname: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub datasources: Vec<DataSource>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

impl Backend {
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn datasource(&self, name: &str) -> Option<&DataSource> {
        self.datasources.iter().find(|d| d.name == name)
    }

    pub fn destination(&self, name: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.name == name)
    }
}

/// A typed document schema within a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Model {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Declared type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Time,
    Bool,
    Map,
    File,
}

impl FieldType {
    /// Parse the lowercase type name used in backend definitions.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(FieldType::String),
            "int" => Some(FieldType::Int),
            "float" => Some(FieldType::Float),
            "time" => Some(FieldType::Time),
            "bool" => Some(FieldType::Bool),
            "map" => Some(FieldType::Map),
            "file" => Some(FieldType::File),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Time => "time",
            FieldType::Bool => "bool",
            FieldType::Map => "map",
            FieldType::File => "file",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub collection: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mandatory: false,
            collection: false,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Index {
    pub fn is_fulltext(&self) -> bool {
        self.name == FULLTEXT_INDEX_NAME
    }
}

/// An inbound data feed. `config` stays untyped until the backend is prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default)]
    pub config: Value,
}

/// A named outbound sink. `config` stays untyped until the backend is prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub transform: Value,
}

/// Where a datasource hands a decoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationRef {
    /// `$model.<name>`: store as a document of that model in the same backend.
    Model(String),
    /// A destination registered with the destination router.
    Named(String),
}

impl DestinationRef {
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix(MODEL_DESTINATION_PREFIX) {
            Some(model) => DestinationRef::Model(model.to_string()),
            None => DestinationRef::Named(reference.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENSORS_YAML: &str = r#"
backendname: sensors
description: home sensors
models:
  - name: reading
    fields:
      - name: value
        type: float
        mandatory: true
      - name: ts
        type: time
    indexes:
      - name: byValue
        fields: [value]
datasources:
  - name: temperature
    type: mqtt
    destinations: ["$model.reading"]
    config:
      broker: tcp://127.0.0.1:1883
      topic: home/temp
      payload: application/x.simple
      simpleValueAttribute: value
      simpleValueAttributeType: float
"#;

    #[test]
    fn test_backend_from_yaml() {
        let backend: Backend = serde_yaml::from_str(SENSORS_YAML).unwrap();
        assert_eq!(backend.backendname, "sensors");
        let model = backend.model("reading").unwrap();
        assert_eq!(model.field("value").unwrap().field_type, FieldType::Float);
        assert!(model.field("value").unwrap().mandatory);
        assert!(!model.field("ts").unwrap().collection);
        assert_eq!(model.field_names(), vec!["value", "ts"]);
        assert!(model.index("byValue").is_some());

        let ds = backend.datasource("temperature").unwrap();
        assert_eq!(ds.kind, "mqtt");
        assert!(ds.rule.is_none());
        assert_eq!(ds.config["topic"], "home/temp");
        assert!(backend.rules.is_empty());
        assert!(backend.destinations.is_empty());
    }

    #[test]
    fn test_unknown_field_type_is_rejected() {
        let yaml = "name: broken\ntype: decimal\n";
        assert!(serde_yaml::from_str::<Field>(yaml).is_err());
        assert_eq!(FieldType::parse("Float"), Some(FieldType::Float));
        assert_eq!(FieldType::parse("decimal"), None);
    }

    #[test]
    fn test_destination_ref_parse() {
        assert_eq!(
            DestinationRef::parse("$model.readings"),
            DestinationRef::Model("readings".into())
        );
        assert_eq!(
            DestinationRef::parse("alertSink"),
            DestinationRef::Named("alertSink".into())
        );
    }
}

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

//! Decoding of inbound MQTT payloads into documents.

use serde_json::Value;

use autorest_core::model::{Document, FieldType, MqttConfig, PAYLOAD_JSON, PAYLOAD_SIMPLE};
use autorest_core::schema::coerce_scalar;
use autorest_core::{AutorestError, Result};

/// Turns a raw payload received on `topic` into a document.
///
/// * `application/json` - the payload must be a JSON object.
/// * `application/x.simple` - the payload is a scalar, coerced to
///   `simpleValueAttributeType` and stored under `simpleValueAttribute`.
///
/// With `addTopicAsAttribute` set, the topic the message arrived on is added
/// to the document under that name.
pub fn decode_payload(config: &MqttConfig, topic: &str, payload: &[u8]) -> Result<Document> {
    let payload_type = config.payload.trim().to_ascii_lowercase();
    let mut document = match payload_type.as_str() {
        PAYLOAD_JSON => match serde_json::from_slice::<Value>(payload)
            .map_err(|e| AutorestError::validation(format!("invalid json payload: {e}")))?
        {
            Value::Object(map) => map,
            other => {
                return Err(AutorestError::validation(format!(
                    "json payload must be an object, got: {other}"
                )))
            }
        },
        PAYLOAD_SIMPLE => {
            let attribute = config
                .simple_value_attribute
                .as_deref()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| {
                    AutorestError::config("simple payload needs a simpleValueAttribute")
                })?;
            let field_type = config
                .simple_value_attribute_type
                .as_deref()
                .and_then(FieldType::parse)
                .unwrap_or(FieldType::String);
            let raw = String::from_utf8_lossy(payload);
            let mut document = Document::new();
            document.insert(attribute.to_string(), coerce_scalar(field_type, &raw));
            document
        }
        other => {
            return Err(AutorestError::validation(format!(
                "unsupported payload type: '{other}'"
            )))
        }
    };

    if let Some(attribute) = config.add_topic_as_attribute.as_deref().filter(|a| !a.is_empty()) {
        document.insert(attribute.to_string(), Value::String(topic.to_string()));
    }
    Ok(document)
}

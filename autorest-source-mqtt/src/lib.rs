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

//! MQTT datasource plugin for AutoRest.
//!
//! Subscribes to the topic of every `mqtt` datasource, decodes JSON or simple
//! scalar payloads into documents and feeds them into the ingest pipeline.
//!
//! # Example
//!
//! ```ignore
//! use autorest_source_mqtt::MqttDatasourceManager;
//!
//! let connector = Arc::new(MqttDatasourceManager::from_config(service.config()));
//! service.register_connector(connector).await;
//! ```

pub mod config;
pub mod decoder;
pub mod source;

pub use config::{MqttClientSettings, MqttClientSettingsBuilder};
pub use decoder::decode_payload;
pub use source::MqttDatasourceManager;

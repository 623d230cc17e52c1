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

//! MQTT destination plugin for AutoRest.
//!
//! Publishes routed documents as JSON to an MQTT topic. The topic may be a
//! Handlebars template rendered against each document.
//!
//! # Example
//!
//! ```ignore
//! use autorest_destination_mqtt::MqttProcessorFactory;
//!
//! let factory = Arc::new(MqttProcessorFactory::from_config(service.config()));
//! service.register_processor_factory(factory).await;
//! ```

pub mod config;
pub mod processor;
pub mod publisher;

pub use config::{MqttPublisherConfig, MqttPublisherConfigBuilder};
pub use processor::{MqttDestinationProcessor, MqttProcessorFactory};

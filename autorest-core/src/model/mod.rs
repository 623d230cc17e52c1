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

//! Data model: backend definitions, typed configs, routes and tasks.

pub mod backend;
pub mod config;
pub mod route;
pub mod task;

pub use backend::{
    Backend, DataSource, Destination, DestinationRef, Field, FieldType, Index, Model, Rule,
    FULLTEXT_INDEX_NAME, MODEL_DESTINATION_PREFIX,
};
pub use config::{
    DataSourceConfig, DestinationConfig, MqttConfig, PreparedBackend, PreparedDataSource,
    PreparedDestination, RestConfig, DATASOURCE_TYPE_MQTT, DATASOURCE_TYPE_REST,
    DESTINATION_TYPE_MQTT, DESTINATION_TYPE_NULL, PAYLOAD_JSON, PAYLOAD_SIMPLE,
};
pub use route::Route;
pub use task::{FileInfo, Task, TaskStatus, TASK_ORPHANED_FILES_REPORT};

/// A schemaless JSON document, keyed by attribute name.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// System attribute names maintained on every stored document.
pub const ATTRIBUTE_ID: &str = "_id";
pub const ATTRIBUTE_OWNER: &str = "_owner";
pub const ATTRIBUTE_CREATED: &str = "_created";
pub const ATTRIBUTE_MODIFIED: &str = "_modified";

/// Backend namespace reserved for the service's own records.
pub const SYSTEM_BACKEND: &str = "_system";
pub const BACKENDS_MODEL: &str = "backends";
pub const TASKS_MODEL: &str = "tasks";

pub fn backends_route() -> Route {
    Route::new(SYSTEM_BACKEND, BACKENDS_MODEL)
}

pub fn tasks_route() -> Route {
    Route::new(SYSTEM_BACKEND, TASKS_MODEL)
}

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

//! # AutoRest core
//!
//! Schema-driven, multi-tenant ingestion and routing. Operators declare
//! backends: typed models, datasources, transformation rules and
//! destinations. Inbound documents are validated against their model,
//! optionally transformed by a rule and fanned out to destinations.
//!
//! The inbound and outbound transports live in their own crates and plug in
//! through [`DatasourceConnector`] and [`ProcessorFactory`]. Storage is
//! abstracted by [`StorageRouter`].
//!
//! ```ignore
//! let storage = Arc::new(MemoryStorage::new());
//! let service = Arc::new(BackendService::new(ServiceConfig::default(), storage));
//! service.create_backend(serde_yaml::from_str(SENSORS_YAML)?).await?;
//! ```

pub mod config;
pub mod destinations;
pub mod documents;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod reaper;
pub mod registry;
pub mod retry;
pub mod rules;
pub mod schema;
pub mod storage;

pub use config::ServiceConfig;
pub use destinations::{DestinationProcessor, DestinationRouter, ProcessorFactory};
pub use documents::DocumentService;
pub use error::{AutorestError, Result};
pub use orchestrator::BackendService;
pub use pipeline::{ConnectionState, DatasourceConnector, DatasourceStatus, Delivery, IngestPipeline};
pub use reaper::{OrphanReaper, ReaperPolicy, SweepReport};
pub use registry::BackendRegistry;
pub use retry::{Backoff, RetryPolicy};
pub use rules::RuleEngine;
pub use storage::{MemoryStorage, StorageRouter};

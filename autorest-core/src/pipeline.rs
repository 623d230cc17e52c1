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

//! Ingestion pipeline shared by all datasource types, and the connector
//! trait implemented by the inbound plugins.
//!
//! A decoded document runs through the datasource's rule (if any) and is
//! then delivered to every listed destination. `$model.<name>` persists it
//! as a document of that model, any other name is a destination of the
//! backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, error};
use serde::Serialize;

use crate::destinations::DestinationRouter;
use crate::documents::DocumentService;
use crate::error::{AutorestError, Result};
use crate::model::{Document, DestinationRef, PreparedDataSource, Route, ATTRIBUTE_ID};
use crate::rules::RuleEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Lost,
}

/// Live state of one datasource, for admin introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasourceStatus {
    /// `<backend>.<datasource>`
    pub name: String,
    pub state: ConnectionState,
}

/// Inbound plugin owning the connections of one datasource type.
#[async_trait]
pub trait DatasourceConnector: Send + Sync {
    fn type_name(&self) -> &str;

    /// Start feeding `datasource` into `pipeline`, replacing a running
    /// datasource of the same name. Must not wait for the remote side.
    async fn start(
        &self,
        backend: &str,
        datasource: &PreparedDataSource,
        pipeline: Arc<IngestPipeline>,
    ) -> Result<()>;

    async fn stop(&self, backend: &str, datasource: &str);

    async fn states(&self) -> Vec<DatasourceStatus>;

    async fn stop_all(&self);
}

/// Outcome of delivering a document to one destination.
#[derive(Debug)]
pub struct Delivery {
    pub destination: String,
    pub outcome: Result<String>,
}

pub struct IngestPipeline {
    rules: Arc<RuleEngine>,
    documents: Arc<DocumentService>,
    destinations: Arc<DestinationRouter>,
    call_timeout: Duration,
    system_id: String,
}

impl IngestPipeline {
    pub fn new(
        rules: Arc<RuleEngine>,
        documents: Arc<DocumentService>,
        destinations: Arc<DestinationRouter>,
        call_timeout: Duration,
        system_id: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            documents,
            destinations,
            call_timeout,
            system_id: system_id.into(),
        }
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AutorestError::Internal(anyhow!(
                "{what} timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Apply the datasource rule and fan the result out.
    ///
    /// Fails only if the rule fails. Delivery failures are logged and
    /// reported per destination.
    pub async fn process(
        &self,
        backend: &str,
        datasource: &PreparedDataSource,
        document: Document,
    ) -> Result<Vec<Delivery>> {
        let id = format!("{backend}.{}", datasource.name);

        let document = match &datasource.rule {
            Some(rule) => self
                .bounded(
                    "transformation",
                    self.rules.transform_document(backend, rule, document),
                )
                .await
                .map_err(|e| {
                    error!("[{id}] Transformation with rule '{rule}' failed: {e}");
                    e
                })?,
            None => document,
        };

        let mut deliveries = Vec::with_capacity(datasource.destinations.len());
        for destination in &datasource.destinations {
            let outcome = self.deliver(backend, destination, &document).await;
            match &outcome {
                Ok(reference) => debug!("[{id}] Delivered to {destination}: {reference}"),
                Err(e) => error!("[{id}] Delivery to {destination} failed: {e}"),
            }
            deliveries.push(Delivery {
                destination: destination.clone(),
                outcome,
            });
        }
        Ok(deliveries)
    }

    async fn deliver(&self, backend: &str, destination: &str, document: &Document) -> Result<String> {
        match DestinationRef::parse(destination) {
            DestinationRef::Model(model) => {
                let mut route = Route::new(backend, model);
                route.system_id = self.system_id.clone();
                let stored = self
                    .bounded("store", self.documents.store(&route, document.clone()))
                    .await?;
                Ok(stored
                    .get(ATTRIBUTE_ID)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string())
            }
            DestinationRef::Named(name) => {
                self.bounded("destination", self.destinations.store(backend, &name, document))
                    .await
            }
        }
    }
}

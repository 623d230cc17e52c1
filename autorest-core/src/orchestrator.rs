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

//! Backend lifecycle: validate, prepare, register, deregister and persist
//! backend definitions.
//!
//! [`BackendService`] owns every runtime registry and wires them together.
//! Registration order is indexes, rules, destinations, registry entry and
//! finally datasources, so the first inbound message already finds its rule
//! and destinations.
//!
//! Lifecycle operations on the service are serialized, so concurrent
//! registrations of one name end with a single registry entry and a single
//! persisted definition.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::ServiceConfig;
use crate::destinations::{DestinationRouter, ProcessorFactory};
use crate::documents::DocumentService;
use crate::error::{AutorestError, Result};
use crate::model::config::{
    DATASOURCE_TYPE_MQTT, DATASOURCE_TYPE_REST, DESTINATION_TYPE_MQTT, DESTINATION_TYPE_NULL,
};
use crate::model::{
    backends_route, Backend, DataSourceConfig, DestinationRef, Document, Index, Model,
    PreparedBackend, PreparedDataSource, PreparedDestination, Route, ATTRIBUTE_CREATED,
    ATTRIBUTE_ID, ATTRIBUTE_MODIFIED, ATTRIBUTE_OWNER, FULLTEXT_INDEX_NAME, SYSTEM_BACKEND,
};
use crate::pipeline::{DatasourceConnector, DatasourceStatus, Delivery, IngestPipeline};
use crate::registry::BackendRegistry;
use crate::retry::{retry_transient, RetryPolicy};
use crate::rules::{CompiledRule, RuleEngine};
use crate::storage::StorageRouter;

pub struct BackendService {
    config: ServiceConfig,
    storage: Arc<dyn StorageRouter>,
    registry: Arc<BackendRegistry>,
    rules: Arc<RuleEngine>,
    destinations: Arc<DestinationRouter>,
    documents: Arc<DocumentService>,
    pipeline: Arc<IngestPipeline>,
    connectors: RwLock<HashMap<String, Arc<dyn DatasourceConnector>>>,
    prepared: RwLock<HashMap<String, Arc<PreparedBackend>>>,
    lifecycle: Mutex<()>,
    retry: RetryPolicy,
}

impl BackendService {
    pub fn new(config: ServiceConfig, storage: Arc<dyn StorageRouter>) -> Self {
        let registry = Arc::new(BackendRegistry::new());
        let rules = Arc::new(RuleEngine::new());
        let destinations = Arc::new(DestinationRouter::new());
        let documents = Arc::new(DocumentService::new(storage.clone(), registry.clone()));
        let pipeline = Arc::new(IngestPipeline::new(
            rules.clone(),
            documents.clone(),
            destinations.clone(),
            config.storage_timeout(),
            config.system_id.clone(),
        ));
        let retry = config.retry_policy();

        Self {
            config,
            storage,
            registry,
            rules,
            destinations,
            documents,
            pipeline,
            connectors: RwLock::new(HashMap::new()),
            prepared: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            retry,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn StorageRouter> {
        self.storage.clone()
    }

    pub fn registry(&self) -> Arc<BackendRegistry> {
        self.registry.clone()
    }

    pub fn documents(&self) -> Arc<DocumentService> {
        self.documents.clone()
    }

    pub fn pipeline(&self) -> Arc<IngestPipeline> {
        self.pipeline.clone()
    }

    /// Plug in the inbound connector for `connector.type_name()`.
    pub async fn register_connector(&self, connector: Arc<dyn DatasourceConnector>) {
        let type_name = connector.type_name().to_string();
        self.connectors.write().await.insert(type_name.clone(), connector);
        info!("Datasource connector '{type_name}' registered");
    }

    pub async fn register_processor_factory(&self, factory: Arc<dyn ProcessorFactory>) {
        self.destinations.register_factory(factory).await;
    }

    async fn connector(&self, type_name: &str) -> Option<Arc<dyn DatasourceConnector>> {
        self.connectors.read().await.get(type_name).cloned()
    }

    /// Check a backend definition before anything is activated.
    pub fn validate_backend(backend: &Backend) -> Result<()> {
        let name = &backend.backendname;
        validate_name("backend", name)?;

        ensure_unique(name, "model", backend.models.iter().map(|m| m.name.as_str()))?;
        ensure_unique(name, "datasource", backend.datasources.iter().map(|d| d.name.as_str()))?;
        ensure_unique(name, "rule", backend.rules.iter().map(|r| r.name.as_str()))?;
        ensure_unique(
            name,
            "destination",
            backend.destinations.iter().map(|d| d.name.as_str()),
        )?;

        for model in &backend.models {
            validate_model(name, model)?;
        }

        for rule in &backend.rules {
            CompiledRule::compile(&rule.transform).map_err(|e| {
                AutorestError::config(format!("backend: {name}, rule: {}: {e}", rule.name))
            })?;
        }

        for destination in &backend.destinations {
            if destination.kind != DESTINATION_TYPE_MQTT && destination.kind != DESTINATION_TYPE_NULL {
                return Err(AutorestError::config(format!(
                    "backend: {name}, destination: {}, unknown destination type: '{}'",
                    destination.name, destination.kind
                )));
            }
        }

        for datasource in &backend.datasources {
            let owner = format!("backend: {name}, datasource: {}", datasource.name);
            if datasource.kind != DATASOURCE_TYPE_MQTT && datasource.kind != DATASOURCE_TYPE_REST {
                return Err(AutorestError::config(format!(
                    "{owner}, unknown datasource type: '{}'",
                    datasource.kind
                )));
            }
            if let Some(rule) = datasource.rule.as_deref().filter(|r| !r.is_empty()) {
                if backend.rule(rule).is_none() {
                    return Err(AutorestError::config(format!("{owner}, unknown rule '{rule}'")));
                }
            }
            for destination in &datasource.destinations {
                let known = match DestinationRef::parse(destination) {
                    DestinationRef::Model(model) => backend.model(&model).is_some(),
                    DestinationRef::Named(dest) => backend.destination(&dest).is_some(),
                };
                if !known {
                    return Err(AutorestError::config(format!(
                        "{owner}, unknown destination '{destination}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Decode every datasource and destination config once.
    pub fn prepare_backend(backend: Backend) -> Result<PreparedBackend> {
        let name = backend.backendname.clone();
        let datasources = backend
            .datasources
            .iter()
            .map(|d| PreparedDataSource::from_definition(&name, d))
            .collect::<Result<Vec<_>>>()?;
        let destinations = backend
            .destinations
            .iter()
            .map(|d| PreparedDestination::from_definition(&name, d))
            .collect::<Result<Vec<_>>>()?;
        Ok(PreparedBackend {
            definition: backend,
            datasources,
            destinations,
        })
    }

    /// Activate a prepared backend, replacing a registered backend of the
    /// same name. Failing sub-steps are logged and skipped.
    pub async fn register_backend(&self, prepared: PreparedBackend) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.register(prepared).await
    }

    async fn register(&self, prepared: PreparedBackend) -> Result<()> {
        let name = prepared.name().to_string();
        if self.registry.contains(&name).await {
            info!("[{name}] Replacing registered backend");
            self.deregister(&name).await;
        }
        let attempts = self.config.retry.registration_attempts;

        for model in &prepared.definition.models {
            let label = format!("{name}.{}", model.name);
            if let Err(e) = retry_transient(&self.retry, attempts, &label, || {
                self.create_indexes(&name, model)
            })
            .await
            {
                error!("[{label}] Can't create indexes: {e}");
            }
        }

        for rule in &prepared.definition.rules {
            if let Err(e) = self.rules.register(&name, &rule.name, &rule.transform).await {
                error!("[{name}.{}] Can't register rule: {e}", rule.name);
            }
        }

        for destination in &prepared.destinations {
            self.destinations.register(&name, destination.clone()).await;
        }

        self.registry.add(prepared.definition.clone()).await;
        let prepared = Arc::new(prepared);
        self.prepared
            .write()
            .await
            .insert(name.clone(), prepared.clone());

        for datasource in &prepared.datasources {
            self.start_datasource(&name, datasource).await;
        }

        info!("[{name}] Backend registered");
        Ok(())
    }

    async fn start_datasource(&self, backend: &str, datasource: &PreparedDataSource) {
        let id = format!("{backend}.{}", datasource.name);
        if let DataSourceConfig::Rest(_) = datasource.config {
            debug!("[{id}] REST datasource, nothing to connect");
            return;
        }
        let type_name = datasource.config.type_name();
        let Some(connector) = self.connector(type_name).await else {
            warn!("[{id}] No connector for datasource type '{type_name}', datasource stays idle");
            return;
        };
        let attempts = self.config.retry.registration_attempts;
        let result = retry_transient(&self.retry, attempts, &id, || {
            connector.start(backend, datasource, self.pipeline.clone())
        })
        .await;
        if let Err(e) = result {
            error!("[{id}] Can't start datasource: {e}");
        }
    }

    /// Model indexes: the declared ones, an automatic full-text index over
    /// all fields and one index per field unless an index of that name is
    /// declared. Stale indexes are removed.
    async fn create_indexes(&self, backend: &str, model: &Model) -> Result<()> {
        let route = Route::new(backend, &model.name);
        let mut indexes = model.indexes.clone();
        if model.index(FULLTEXT_INDEX_NAME).is_none() {
            indexes.push(Index {
                name: FULLTEXT_INDEX_NAME.to_string(),
                unique: false,
                fields: model.field_names(),
            });
        }
        for field in &model.fields {
            if model.index(&field.name).is_none() {
                indexes.push(Index {
                    name: field.name.clone(),
                    unique: false,
                    fields: vec![field.name.clone()],
                });
            }
        }

        for existing in self.storage.get_index_names(&route).await? {
            if !indexes.iter().any(|i| i.name == existing) {
                self.storage.delete_index(&route, &existing).await?;
                debug!("[{route}] Stale index {existing} removed");
            }
        }
        for index in &indexes {
            self.storage.update_index(&route, index).await?;
        }
        Ok(())
    }

    /// Stop datasources, drop rules and destinations and remove the registry
    /// entry. No data is deleted. Returns false if the backend was not
    /// registered.
    pub async fn deregister_backend(&self, name: &str) -> bool {
        let _guard = self.lifecycle.lock().await;
        self.deregister(name).await
    }

    async fn deregister(&self, name: &str) -> bool {
        let Some(backend) = self.registry.get(name).await else {
            return false;
        };

        for datasource in &backend.datasources {
            if let Some(connector) = self.connector(&datasource.kind).await {
                connector.stop(name, &datasource.name).await;
            }
        }
        for rule in &backend.rules {
            self.rules.deregister(name, &rule.name).await;
        }
        for destination in &backend.destinations {
            self.destinations.deregister(name, &destination.name).await;
        }
        self.registry.remove(name).await;
        self.prepared.write().await.remove(name);
        info!("[{name}] Backend deregistered");
        true
    }

    fn system_route(&self) -> Route {
        let mut route = backends_route();
        route.system_id = self.config.system_id.clone();
        route
    }

    async fn stored_backend_id(&self, name: &str) -> Result<Option<String>> {
        let mut filter = Document::new();
        filter.insert("backendname".to_string(), Value::String(name.to_string()));
        let (_, documents) = self
            .storage
            .query_model(&self.system_route(), &filter, 0, usize::MAX)
            .await?;
        // string filters match substrings
        Ok(documents
            .iter()
            .find(|d| d.get("backendname").and_then(Value::as_str) == Some(name))
            .and_then(|d| d.get(ATTRIBUTE_ID).and_then(Value::as_str))
            .map(str::to_string))
    }

    /// Persist the definition in `_system.backends`, updating a stored one.
    pub async fn store_backend(&self, backend: &Backend) -> Result<String> {
        let _guard = self.lifecycle.lock().await;
        self.persist(backend).await
    }

    async fn persist(&self, backend: &Backend) -> Result<String> {
        let Value::Object(document) = serde_json::to_value(backend)? else {
            return Err(AutorestError::Internal(anyhow::anyhow!(
                "backend did not serialize to an object"
            )));
        };
        let route = self.system_route();
        match self.stored_backend_id(&backend.backendname).await? {
            Some(id) => {
                self.storage
                    .update_model(&route.with_identity(&id), document)
                    .await?;
                info!("[{}] Backend definition updated: {id}", backend.backendname);
                Ok(id)
            }
            None => {
                let id = self.storage.create_model(&route, document).await?;
                info!("[{}] Backend definition created: {id}", backend.backendname);
                Ok(id)
            }
        }
    }

    /// Remove the persisted definition. Data is untouched.
    pub async fn delete_backend_definition(&self, name: &str) -> Result<()> {
        if let Some(id) = self.stored_backend_id(name).await? {
            self.storage
                .delete_model(&self.system_route().with_identity(&id))
                .await?;
            info!("[{name}] Backend definition deleted: {id}");
        }
        Ok(())
    }

    /// Drop every collection and blob of a backend.
    pub async fn drop_backend_data(&self, name: &str) -> Result<()> {
        if name == SYSTEM_BACKEND {
            return Err(AutorestError::validation("the system backend can't be dropped"));
        }
        self.storage.drop_backend(name).await
    }

    /// Validate, prepare, register and persist a posted backend definition.
    pub async fn create_backend(&self, backend: Backend) -> Result<String> {
        Self::validate_backend(&backend)?;
        let prepared = Self::prepare_backend(backend)?;
        let definition = prepared.definition.clone();
        let _guard = self.lifecycle.lock().await;
        self.register(prepared).await?;
        self.persist(&definition).await?;
        Ok(definition.backendname)
    }

    /// Deregister a backend and remove its definition, optionally dropping
    /// all of its data.
    pub async fn delete_backend(&self, name: &str, drop_data: bool) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.deregister(name).await {
            return Err(AutorestError::not_found("backend", name));
        }
        self.delete_backend_definition(name).await?;
        if drop_data {
            self.drop_backend_data(name).await?;
        }
        Ok(())
    }

    /// Load every `*.yaml`/`*.yml` backend definition in `dir`.
    ///
    /// A file that can't be parsed aborts startup. A definition that parses
    /// but fails validation is logged and skipped.
    pub async fn load_backends(&self, dir: &Path) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            AutorestError::config(format!("can't read backend path {}: {e}", dir.display()))
        })?;
        let mut files: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            })
            .collect();
        files.sort();

        let mut loaded = Vec::new();
        let _guard = self.lifecycle.lock().await;
        for path in files {
            let yaml = std::fs::read_to_string(&path).map_err(|e| {
                AutorestError::config(format!("can't read {}: {e}", path.display()))
            })?;
            let backend: Backend = serde_yaml::from_str(&yaml).map_err(|e| {
                AutorestError::config(format!("can't parse backend {}: {e}", path.display()))
            })?;
            info!("Backend {} loaded from {}", backend.backendname, path.display());
            if let Some(name) = self.activate(backend).await {
                loaded.push(name);
            }
        }
        Ok(loaded)
    }

    /// Register every definition persisted in `_system.backends` that is not
    /// registered yet.
    pub async fn restore_backends(&self) -> Result<Vec<String>> {
        let (_, documents) = self
            .storage
            .query_model(&self.system_route(), &Document::new(), 0, usize::MAX)
            .await?;

        let mut restored = Vec::new();
        let _guard = self.lifecycle.lock().await;
        for mut document in documents {
            for attribute in [ATTRIBUTE_ID, ATTRIBUTE_OWNER, ATTRIBUTE_CREATED, ATTRIBUTE_MODIFIED] {
                document.remove(attribute);
            }
            let backend: Backend = serde_json::from_value(Value::Object(document)).map_err(|e| {
                AutorestError::config(format!("can't parse persisted backend: {e}"))
            })?;
            if self.registry.contains(&backend.backendname).await {
                debug!("[{}] Already registered, not restoring", backend.backendname);
                continue;
            }
            if let Some(name) = self.activate(backend).await {
                restored.push(name);
            }
        }
        Ok(restored)
    }

    /// Callers hold the lifecycle lock.
    async fn activate(&self, backend: Backend) -> Option<String> {
        let name = backend.backendname.clone();
        let prepared = match Self::validate_backend(&backend).and_then(|_| Self::prepare_backend(backend)) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("[{name}] Invalid backend definition, skipping: {e}");
                return None;
            }
        };
        let definition = prepared.definition.clone();
        if let Err(e) = self.register(prepared).await {
            error!("[{name}] Can't register backend: {e}");
            return None;
        }
        if let Err(e) = self.persist(&definition).await {
            error!("[{name}] Can't persist backend definition: {e}");
        }
        Some(name)
    }

    /// Apply a registered rule to a JSON document.
    pub async fn test_rule(&self, backend: &str, rule: &str, json: &[u8]) -> Result<Vec<u8>> {
        self.rules.transform_json(backend, rule, json).await
    }

    /// Apply an inline transform spec without registering it.
    pub fn dry_run_rule(&self, spec: &Value, json: &[u8]) -> Result<Vec<u8>> {
        RuleEngine::dry_run(spec, json)
    }

    /// Feed a document posted by the HTTP layer through a `rest` datasource.
    pub async fn ingest(
        &self,
        backend: &str,
        datasource: &str,
        document: Document,
    ) -> Result<Vec<Delivery>> {
        let prepared = self
            .prepared
            .read()
            .await
            .get(backend)
            .cloned()
            .ok_or_else(|| AutorestError::not_found("backend", backend))?;
        let source = prepared
            .datasource(datasource)
            .ok_or_else(|| AutorestError::not_found("datasource", format!("{backend}.{datasource}")))?;
        if !matches!(source.config, DataSourceConfig::Rest(_)) {
            return Err(AutorestError::validation(format!(
                "datasource '{backend}.{datasource}' does not accept posted documents"
            )));
        }
        self.pipeline.process(backend, source, document).await
    }

    pub async fn backend_names(&self) -> Vec<String> {
        self.registry.names().await
    }

    pub async fn rule_names(&self) -> Vec<String> {
        self.rules.rule_names().await
    }

    pub async fn destination_names(&self) -> Vec<String> {
        self.destinations.names().await
    }

    /// State of every connected datasource, sorted by name.
    pub async fn datasource_states(&self) -> Vec<DatasourceStatus> {
        let connectors: Vec<Arc<dyn DatasourceConnector>> =
            self.connectors.read().await.values().cloned().collect();
        let mut states = Vec::new();
        for connector in connectors {
            states.extend(connector.states().await);
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    /// Stop every connection and destroy every destination processor.
    pub async fn shutdown(&self) {
        let connectors: Vec<Arc<dyn DatasourceConnector>> =
            self.connectors.read().await.values().cloned().collect();
        for connector in connectors {
            connector.stop_all().await;
        }
        self.destinations.shutdown().await;
        info!("Backend service stopped");
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AutorestError::config(format!(
            "invalid {kind} name '{name}': must start with a letter and contain only letters, digits, '_' or '-'"
        )))
    }
}

fn ensure_unique<'a>(owner: &str, kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(AutorestError::config(format!("{owner}: {kind} without a name")));
        }
        if !seen.insert(name) {
            return Err(AutorestError::config(format!(
                "{owner}: duplicate {kind} name '{name}'"
            )));
        }
    }
    Ok(())
}

fn validate_model(backend: &str, model: &Model) -> Result<()> {
    let owner = format!("{backend}.{}", model.name);
    ensure_unique(&owner, "field", model.fields.iter().map(|f| f.name.as_str()))?;
    ensure_unique(&owner, "index", model.indexes.iter().map(|i| i.name.as_str()))?;
    for index in &model.indexes {
        if index.fields.is_empty() && !index.is_fulltext() {
            return Err(AutorestError::config(format!(
                "{owner}: index '{}' has no fields",
                index.name
            )));
        }
        if let Some(field) = index.fields.iter().find(|f| model.field(f).is_none()) {
            return Err(AutorestError::config(format!(
                "{owner}: index '{}' references unknown field '{field}'",
                index.name
            )));
        }
    }
    Ok(())
}

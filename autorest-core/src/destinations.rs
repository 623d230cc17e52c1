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

//! Named outbound sinks of registered backends.
//!
//! Each destination owns a processor that is built by the factory registered
//! for its type on the first `store`, and destroyed when the destination is
//! replaced or deregistered. A processor still initialising when its entry
//! is retired is destroyed as soon as it is built.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{OnceCell, RwLock};

use crate::error::{AutorestError, Result};
use crate::model::config::DESTINATION_TYPE_NULL;
use crate::model::{Document, PreparedDestination};

/// Reference returned by the null processor.
pub const NULL_REFERENCE: &str = "noId";

pub fn destination_ns_name(backend: &str, destination: &str) -> String {
    format!("{backend}.{destination}")
}

/// Sink-specific delivery of documents.
#[async_trait]
pub trait DestinationProcessor: Send + Sync {
    /// Bind the processor to its destination. Called once before the first
    /// `store`.
    async fn initialise(&self, backend: &str, destination: &PreparedDestination) -> Result<()>;

    /// Deliver one document, returning a sink-specific reference.
    async fn store(&self, document: &Document) -> Result<String>;

    /// Release every resource held by the processor.
    async fn destroy(&self) -> Result<()>;
}

/// Builds processors for one destination type.
pub trait ProcessorFactory: Send + Sync {
    fn type_name(&self) -> &str;

    fn create(&self) -> Arc<dyn DestinationProcessor>;
}

/// Accepts and discards every document.
#[derive(Default)]
pub struct NullProcessor;

#[async_trait]
impl DestinationProcessor for NullProcessor {
    async fn initialise(&self, backend: &str, destination: &PreparedDestination) -> Result<()> {
        debug!(
            "[{}] Null destination initialised",
            destination_ns_name(backend, &destination.name)
        );
        Ok(())
    }

    async fn store(&self, _document: &Document) -> Result<String> {
        Ok(NULL_REFERENCE.to_string())
    }

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NullProcessorFactory;

impl ProcessorFactory for NullProcessorFactory {
    fn type_name(&self) -> &str {
        DESTINATION_TYPE_NULL
    }

    fn create(&self) -> Arc<dyn DestinationProcessor> {
        Arc::new(NullProcessor)
    }
}

struct DestinationEntry {
    backend: String,
    definition: PreparedDestination,
    processor: OnceCell<Arc<dyn DestinationProcessor>>,
    retired: AtomicBool,
    destroyed: AtomicBool,
}

impl DestinationEntry {
    fn new(backend: &str, definition: PreparedDestination) -> Self {
        Self {
            backend: backend.to_string(),
            definition,
            processor: OnceCell::new(),
            retired: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    fn id(&self) -> String {
        destination_ns_name(&self.backend, &self.definition.name)
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Retire the entry. A processor built later is torn down by `store`.
    async fn destroy(&self) {
        self.retired.store(true, Ordering::SeqCst);
        if let Some(processor) = self.processor.get() {
            self.teardown(processor).await;
        }
    }

    async fn teardown(&self, processor: &Arc<dyn DestinationProcessor>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = processor.destroy().await {
            error!("[{}] Failed to destroy destination processor: {e}", self.id());
        }
    }
}

/// Registry of destinations keyed `<backend>.<destination>`.
pub struct DestinationRouter {
    destinations: RwLock<HashMap<String, Arc<DestinationEntry>>>,
    factories: RwLock<HashMap<String, Arc<dyn ProcessorFactory>>>,
}

impl Default for DestinationRouter {
    fn default() -> Self {
        let mut factories: HashMap<String, Arc<dyn ProcessorFactory>> = HashMap::new();
        factories.insert(DESTINATION_TYPE_NULL.to_string(), Arc::new(NullProcessorFactory));
        Self {
            destinations: RwLock::new(HashMap::new()),
            factories: RwLock::new(factories),
        }
    }
}

impl DestinationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make processors of `factory.type_name()` available.
    pub async fn register_factory(&self, factory: Arc<dyn ProcessorFactory>) {
        let type_name = factory.type_name().to_string();
        self.factories.write().await.insert(type_name.clone(), factory);
        info!("Destination processor factory '{type_name}' registered");
    }

    /// Add a destination, destroying the processor of a replaced entry.
    pub async fn register(&self, backend: &str, destination: PreparedDestination) {
        let key = destination_ns_name(backend, &destination.name);
        let entry = Arc::new(DestinationEntry::new(backend, destination));
        let previous = self.destinations.write().await.insert(key.clone(), entry);
        if let Some(previous) = previous {
            previous.destroy().await;
        }
        info!("[{key}] Destination registered");
    }

    pub async fn deregister(&self, backend: &str, name: &str) {
        let key = destination_ns_name(backend, name);
        let removed = self.destinations.write().await.remove(&key);
        if let Some(entry) = removed {
            entry.destroy().await;
            info!("[{key}] Destination deregistered");
        }
    }

    /// Deliver `document` to the named destination of `backend`.
    pub async fn store(&self, backend: &str, name: &str, document: &Document) -> Result<String> {
        let key = destination_ns_name(backend, name);
        let entry = self
            .destinations
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| AutorestError::not_found("destination", &key))?;

        let processor = entry
            .processor
            .get_or_try_init(|| self.build_processor(&entry))
            .await?;
        if entry.is_retired() {
            debug!("[{key}] Destination retired while its processor was built");
            entry.teardown(processor).await;
            return Err(AutorestError::not_found("destination", &key));
        }
        processor.store(document).await
    }

    async fn build_processor(&self, entry: &DestinationEntry) -> Result<Arc<dyn DestinationProcessor>> {
        let type_name = entry.definition.config.type_name();
        let factory = self.factories.read().await.get(type_name).cloned();
        let processor = match factory {
            Some(factory) => factory.create(),
            None => {
                warn!(
                    "[{}] No processor for destination type '{type_name}', discarding documents",
                    entry.id()
                );
                Arc::new(NullProcessor) as Arc<dyn DestinationProcessor>
            }
        };
        processor.initialise(&entry.backend, &entry.definition).await?;
        Ok(processor)
    }

    /// Sorted namespaced names of all registered destinations.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.destinations.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Destroy every processor and forget all destinations.
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<DestinationEntry>> =
            self.destinations.write().await.drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.destroy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationConfig, MqttConfig};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        init_delay: Duration,
        initialised: AtomicUsize,
        stored: AtomicUsize,
        destroyed: AtomicUsize,
    }

    struct CountingProcessor(Arc<Counters>);

    #[async_trait]
    impl DestinationProcessor for CountingProcessor {
        async fn initialise(&self, _: &str, _: &PreparedDestination) -> Result<()> {
            if !self.0.init_delay.is_zero() {
                tokio::time::sleep(self.0.init_delay).await;
            }
            self.0.initialised.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn store(&self, _: &Document) -> Result<String> {
            let n = self.0.stored.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ref-{n}"))
        }

        async fn destroy(&self) -> Result<()> {
            self.0.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingFactory(Arc<Counters>);

    impl ProcessorFactory for CountingFactory {
        fn type_name(&self) -> &str {
            "mqtt"
        }

        fn create(&self) -> Arc<dyn DestinationProcessor> {
            Arc::new(CountingProcessor(self.0.clone()))
        }
    }

    fn mqtt_destination(name: &str) -> PreparedDestination {
        PreparedDestination {
            name: name.into(),
            config: DestinationConfig::Mqtt(MqttConfig {
                broker: "tcp://127.0.0.1:1883".into(),
                topic: "alerts".into(),
                ..Default::default()
            }),
        }
    }

    fn document() -> Document {
        json!({"value": 1}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_processor_is_built_lazily_once() {
        let counters = Arc::new(Counters::default());
        let router = DestinationRouter::new();
        router
            .register_factory(Arc::new(CountingFactory(counters.clone())))
            .await;
        router.register("sensors", mqtt_destination("alertSink")).await;
        assert_eq!(counters.initialised.load(Ordering::SeqCst), 0);

        assert_eq!(router.store("sensors", "alertSink", &document()).await.unwrap(), "ref-0");
        assert_eq!(router.store("sensors", "alertSink", &document()).await.unwrap(), "ref-1");
        assert_eq!(counters.initialised.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replace_and_deregister_destroy_processor() {
        let counters = Arc::new(Counters::default());
        let router = DestinationRouter::new();
        router
            .register_factory(Arc::new(CountingFactory(counters.clone())))
            .await;

        router.register("sensors", mqtt_destination("alertSink")).await;
        router.store("sensors", "alertSink", &document()).await.unwrap();
        router.register("sensors", mqtt_destination("alertSink")).await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(router.names().await, vec!["sensors.alertSink"]);

        router.store("sensors", "alertSink", &document()).await.unwrap();
        router.deregister("sensors", "alertSink").await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert!(router.names().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_while_initialising_is_destroyed() {
        let counters = Arc::new(Counters {
            init_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let router = Arc::new(DestinationRouter::new());
        router
            .register_factory(Arc::new(CountingFactory(counters.clone())))
            .await;
        router.register("sensors", mqtt_destination("alertSink")).await;

        let pending = {
            let router = router.clone();
            tokio::spawn(async move { router.store("sensors", "alertSink", &document()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        router.register("sensors", mqtt_destination("alertSink")).await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 0);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(counters.initialised.load(Ordering::SeqCst), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stored.load(Ordering::SeqCst), 0);

        // the replacement builds its own processor
        router.store("sensors", "alertSink", &document()).await.unwrap();
        router.shutdown().await;
        assert_eq!(counters.initialised.load(Ordering::SeqCst), 2);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_destroy_runs_once() {
        let counters = Arc::new(Counters::default());
        let entry = DestinationEntry::new("sensors", mqtt_destination("alertSink"));
        let processor: Arc<dyn DestinationProcessor> = Arc::new(CountingProcessor(counters.clone()));
        assert!(entry.processor.set(processor.clone()).is_ok());

        entry.destroy().await;
        entry.teardown(&processor).await;
        entry.destroy().await;
        assert!(entry.is_retired());
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_destination_is_not_found() {
        let router = DestinationRouter::new();
        let err = router.store("sensors", "missing", &document()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "destination 'sensors.missing' not found");
    }

    #[tokio::test]
    async fn test_null_and_missing_factory() {
        let router = DestinationRouter::new();
        router
            .register(
                "sensors",
                PreparedDestination {
                    name: "void".into(),
                    config: DestinationConfig::Null,
                },
            )
            .await;
        assert_eq!(router.store("sensors", "void", &document()).await.unwrap(), NULL_REFERENCE);

        // no mqtt factory registered
        router.register("sensors", mqtt_destination("alertSink")).await;
        assert_eq!(
            router.store("sensors", "alertSink", &document()).await.unwrap(),
            NULL_REFERENCE
        );

        router.shutdown().await;
        assert!(router.names().await.is_empty());
    }
}

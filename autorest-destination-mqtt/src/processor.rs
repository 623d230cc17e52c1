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

//! MQTT implementation of the [`DestinationProcessor`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, QoS};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use autorest_core::config::MqttSettings;
use autorest_core::model::{Document, DestinationConfig, PreparedDestination, DESTINATION_TYPE_MQTT};
use autorest_core::{
    AutorestError, DestinationProcessor, ProcessorFactory, Result, RetryPolicy, ServiceConfig,
};

use crate::config::MqttPublisherConfig;
use crate::publisher;

struct Connection {
    client: AsyncClient,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Publishes every stored document as JSON to the destination's topic.
///
/// The broker connection is opened by the first `store`. Until the broker
/// accepts it, publishes are queued in the client's request channel.
pub struct MqttDestinationProcessor {
    settings: MqttSettings,
    retry: RetryPolicy,
    config: RwLock<Option<MqttPublisherConfig>>,
    connection: Mutex<Option<Connection>>,
    registry: Handlebars<'static>,
}

impl MqttDestinationProcessor {
    pub fn new(settings: MqttSettings, retry: RetryPolicy) -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        Self {
            settings,
            retry,
            config: RwLock::new(None),
            connection: Mutex::new(None),
            registry,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    async fn client(&self, config: &MqttPublisherConfig) -> AsyncClient {
        let mut connection = self.connection.lock().await;
        if let Some(connection) = connection.as_ref() {
            return connection.client.clone();
        }

        info!(
            "[{}] Connecting MQTT destination (broker={}, topic={})",
            config.id,
            config.broker(),
            config.topic
        );
        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(drive(
            config.id.clone(),
            config.broker(),
            self.retry,
            eventloop,
            shutdown_rx,
        ));
        *connection = Some(Connection {
            client: client.clone(),
            shutdown_tx,
            handle,
        });
        client
    }
}

/// Keeps the connection alive until shutdown, backing off between failed
/// attempts.
async fn drive(
    id: String,
    broker: String,
    retry: RetryPolicy,
    mut eventloop: EventLoop,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut backoff = retry.backoff();
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("[{id}] Shutdown signal received");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("[{id}] Connected to {broker}");
                    backoff.reset();
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = backoff.next_delay();
                    let error = AutorestError::connectivity(&broker, e.to_string());
                    warn!("[{id}] {error}, retrying in {delay:?}");
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            info!("[{id}] Shutdown signal received");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    debug!("[{id}] MQTT event loop finished");
}

#[async_trait]
impl DestinationProcessor for MqttDestinationProcessor {
    async fn initialise(&self, backend: &str, destination: &PreparedDestination) -> Result<()> {
        let DestinationConfig::Mqtt(mqtt) = &destination.config else {
            return Err(AutorestError::config(format!(
                "destination {backend}.{} is not an mqtt destination",
                destination.name
            )));
        };
        let config =
            MqttPublisherConfig::for_destination(&self.settings, backend, &destination.name, mqtt)?;
        debug!("[{}] MQTT destination initialised", config.id);
        *self.config.write().await = Some(config);
        Ok(())
    }

    async fn store(&self, document: &Document) -> Result<String> {
        let config = self
            .config
            .read()
            .await
            .clone()
            .ok_or_else(|| AutorestError::config("mqtt destination is not initialised"))?;

        let topic = publisher::render_topic(&self.registry, &config.topic, document)?;
        let payload = publisher::document_to_payload(document)?;
        let client = self.client(&config).await;
        client
            .try_publish(&topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| AutorestError::connectivity(config.broker(), e.to_string()))?;
        Ok(format!("brk: {}, tpc: {topic}", config.broker()))
    }

    async fn destroy(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        let id = self
            .config
            .read()
            .await
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_default();

        if let Err(e) = connection.client.try_disconnect() {
            debug!("[{id}] Disconnect request not queued: {e}");
        }
        let _ = connection.shutdown_tx.send(());
        if let Err(e) = connection.handle.await {
            warn!("[{id}] Event loop ended abnormally: {e}");
        }
        info!("[{id}] MQTT destination disconnected");
        Ok(())
    }
}

/// Builds [`MqttDestinationProcessor`]s for `mqtt` destinations.
pub struct MqttProcessorFactory {
    settings: MqttSettings,
    retry: RetryPolicy,
}

impl MqttProcessorFactory {
    pub fn new(settings: MqttSettings, retry: RetryPolicy) -> Self {
        Self { settings, retry }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.mqtt.clone(), config.retry_policy())
    }
}

impl ProcessorFactory for MqttProcessorFactory {
    fn type_name(&self) -> &str {
        DESTINATION_TYPE_MQTT
    }

    fn create(&self) -> Arc<dyn DestinationProcessor> {
        Arc::new(MqttDestinationProcessor::new(self.settings.clone(), self.retry))
    }
}

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

//! MQTT implementation of the [`DatasourceConnector`] trait.
//!
//! Every datasource gets its own client, supervised by a task that drives the
//! rumqttc event loop. The supervisor subscribes on every successful
//! connect and keeps retrying with backoff until the broker grants the
//! subscription. Publishes go to a worker over a bounded channel, and
//! messages arriving while the worker queue is full are dropped.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, Publish, QoS, SubAck, SubscribeReasonCode};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use autorest_core::config::MqttSettings;
use autorest_core::model::{DataSourceConfig, MqttConfig, PreparedDataSource, DATASOURCE_TYPE_MQTT};
use autorest_core::{
    AutorestError, Backoff, ConnectionState, DatasourceConnector, DatasourceStatus, IngestPipeline,
    Result, RetryPolicy, ServiceConfig,
};

use crate::config::MqttClientSettings;
use crate::decoder::decode_payload;

struct Supervisor {
    client: AsyncClient,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Owns the MQTT clients of all running datasources, keyed
/// `<backend>.<datasource>`.
pub struct MqttDatasourceManager {
    settings: MqttSettings,
    retry: RetryPolicy,
    supervisors: DashMap<String, Supervisor>,
}

impl MqttDatasourceManager {
    pub fn new(settings: MqttSettings, retry: RetryPolicy) -> Self {
        Self {
            settings,
            retry,
            supervisors: DashMap::new(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.mqtt.clone(), config.retry_policy())
    }

    pub async fn state(&self, backend: &str, datasource: &str) -> Option<ConnectionState> {
        let state = self
            .supervisors
            .get(&format!("{backend}.{datasource}"))
            .map(|s| s.state.clone())?;
        let current = *state.read().await;
        Some(current)
    }

    async fn shutdown(id: &str, supervisor: Supervisor) {
        let Supervisor {
            client,
            state,
            shutdown_tx,
            handle,
            worker,
        } = supervisor;

        if let Err(e) = client.try_disconnect() {
            debug!("[{id}] Disconnect request not queued: {e}");
        }
        let _ = shutdown_tx.send(());
        if let Err(e) = handle.await {
            warn!("[{id}] Supervisor ended abnormally: {e}");
        }
        worker.abort();
        *state.write().await = ConnectionState::Disconnected;
        info!("[{id}] MQTT datasource stopped");
    }
}

fn spawn_worker(
    id: String,
    backend: String,
    datasource: PreparedDataSource,
    config: MqttConfig,
    pipeline: Arc<IngestPipeline>,
    mut rx: mpsc::Receiver<Publish>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(publish) = rx.recv().await {
            let document = match decode_payload(&config, &publish.topic, &publish.payload) {
                Ok(document) => document,
                Err(e) => {
                    warn!("[{id}] Dropping message on topic '{}': {e}", publish.topic);
                    continue;
                }
            };
            if let Err(e) = pipeline.process(&backend, &datasource, document).await {
                error!("[{id}] Failed to process message on topic '{}': {e}", publish.topic);
            }
        }
        debug!("[{id}] Worker finished");
    })
}

fn subscription_granted(ack: &SubAck) -> bool {
    !ack.return_codes.is_empty()
        && ack
            .return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

/// Subscription progress on the current connection.
struct Subscription {
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl Subscription {
    fn new(retry: RetryPolicy) -> Self {
        Self {
            backoff: retry.backoff(),
            retry_at: None,
        }
    }

    fn connected(&mut self) {
        self.backoff.reset();
        self.retry_at = None;
    }

    fn disconnected(&mut self) {
        self.retry_at = None;
    }

    /// Schedule the next attempt and return its delay.
    fn failed(&mut self, now: Instant) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(now + delay);
        delay
    }

    /// True when the broker granted the subscription. A refusal schedules
    /// another attempt.
    fn acknowledged(&mut self, ack: &SubAck, now: Instant) -> bool {
        if subscription_granted(ack) {
            self.connected();
            true
        } else {
            self.failed(now);
            false
        }
    }

    /// Take the pending retry deadline once it has passed.
    fn take_due(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if at <= now => {
                self.retry_at = None;
                true
            }
            _ => false,
        }
    }
}

struct EventLoopDriver {
    id: String,
    client: AsyncClient,
    topic: String,
    broker: String,
    retry: RetryPolicy,
    state: Arc<RwLock<ConnectionState>>,
    tx: mpsc::Sender<Publish>,
}

impl EventLoopDriver {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    fn subscribe(&self, subscription: &mut Subscription) {
        if let Err(e) = self.client.try_subscribe(self.topic.clone(), QoS::AtMostOnce) {
            let delay = subscription.failed(Instant::now());
            warn!(
                "[{}] Failed to subscribe to '{}': {e}, retrying in {delay:?}",
                self.id, self.topic
            );
        }
    }

    async fn run(self, mut eventloop: EventLoop, mut shutdown_rx: oneshot::Receiver<()>) {
        info!("[{}] MQTT event loop started", self.id);
        let mut backoff = self.retry.backoff();
        let mut subscription = Subscription::new(self.retry);
        self.set_state(ConnectionState::Connecting).await;

        loop {
            let retry_at = subscription.retry_at;
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("[{}] Shutdown signal received", self.id);
                    break;
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    if subscription.take_due(Instant::now()) {
                        debug!("[{}] Retrying subscription to '{}'", self.id, self.topic);
                        self.subscribe(&mut subscription);
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("[{}] Connected to {}", self.id, self.broker);
                        self.set_state(ConnectionState::Connected).await;
                        backoff.reset();
                        subscription.connected();
                        self.subscribe(&mut subscription);
                    }
                    Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                        if subscription.acknowledged(&ack, Instant::now()) {
                            info!("[{}] Subscribed to '{}'", self.id, self.topic);
                            self.set_state(ConnectionState::Subscribed).await;
                        } else {
                            warn!(
                                "[{}] Broker refused subscription to '{}': {:?}",
                                self.id, self.topic, ack.return_codes
                            );
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        match self.tx.try_send(publish) {
                            Ok(()) => {}
                            Err(TrySendError::Full(publish)) => {
                                warn!(
                                    "[{}] Worker queue full, dropping message on topic '{}'",
                                    self.id, publish.topic
                                );
                            }
                            Err(TrySendError::Closed(_)) => {
                                error!("[{}] Worker is gone, stopping event loop", self.id);
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.set_state(ConnectionState::Lost).await;
                        subscription.disconnected();
                        let delay = backoff.next_delay();
                        let error = AutorestError::connectivity(&self.broker, e.to_string());
                        warn!("[{}] {error}, retrying in {delay:?}", self.id);
                        tokio::select! {
                            _ = &mut shutdown_rx => {
                                info!("[{}] Shutdown signal received", self.id);
                                break;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        self.set_state(ConnectionState::Connecting).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!("[{}] MQTT event loop finished", self.id);
    }
}

#[async_trait]
impl DatasourceConnector for MqttDatasourceManager {
    fn type_name(&self) -> &str {
        DATASOURCE_TYPE_MQTT
    }

    async fn start(
        &self,
        backend: &str,
        datasource: &PreparedDataSource,
        pipeline: Arc<IngestPipeline>,
    ) -> Result<()> {
        let DataSourceConfig::Mqtt(config) = &datasource.config else {
            return Err(AutorestError::config(format!(
                "datasource {backend}.{} is not an mqtt datasource",
                datasource.name
            )));
        };
        let id = format!("{backend}.{}", datasource.name);
        let settings =
            MqttClientSettings::for_datasource(&self.settings, backend, &datasource.name, config)?;

        self.stop(backend, &datasource.name).await;
        info!(
            "[{id}] Starting MQTT datasource (broker={}, topic={})",
            settings.broker(),
            settings.topic
        );

        let (client, eventloop) =
            AsyncClient::new(settings.mqtt_options(), settings.channel_capacity);
        let (tx, rx) = mpsc::channel(settings.channel_capacity);
        let worker = spawn_worker(
            id.clone(),
            backend.to_string(),
            datasource.clone(),
            config.clone(),
            pipeline,
            rx,
        );

        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = EventLoopDriver {
            id: id.clone(),
            client: client.clone(),
            topic: settings.topic.clone(),
            broker: settings.broker(),
            retry: self.retry,
            state: state.clone(),
            tx,
        };
        let handle = tokio::spawn(driver.run(eventloop, shutdown_rx));

        self.supervisors.insert(
            id,
            Supervisor {
                client,
                state,
                shutdown_tx,
                handle,
                worker,
            },
        );
        Ok(())
    }

    async fn stop(&self, backend: &str, datasource: &str) {
        let id = format!("{backend}.{datasource}");
        if let Some((id, supervisor)) = self.supervisors.remove(&id) {
            Self::shutdown(&id, supervisor).await;
        }
    }

    async fn states(&self) -> Vec<DatasourceStatus> {
        let states: Vec<(String, Arc<RwLock<ConnectionState>>)> = self
            .supervisors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state.clone()))
            .collect();

        let mut result = Vec::with_capacity(states.len());
        for (name, state) in states {
            let state = *state.read().await;
            result.push(DatasourceStatus { name, state });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    async fn stop_all(&self) {
        let ids: Vec<String> = self.supervisors.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((id, supervisor)) = self.supervisors.remove(&id) {
                Self::shutdown(&id, supervisor).await;
            }
        }
    }
}

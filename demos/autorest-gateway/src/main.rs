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

use std::sync::Arc;

use anyhow::{Context, Result};
use autorest_core::{BackendService, MemoryStorage, OrphanReaper, ServiceConfig};
use autorest_destination_mqtt::MqttProcessorFactory;
use autorest_source_mqtt::MqttDatasourceManager;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting AutoRest gateway...");

    // 1. Service configuration, from the first argument or built-in defaults
    let config = match std::env::args().nth(1) {
        Some(path) => ServiceConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => ServiceConfig::default(),
    };

    // 2. Core service with in-memory storage and the MQTT plugins
    let storage = Arc::new(MemoryStorage::new());
    let service = Arc::new(BackendService::new(config.clone(), storage.clone()));
    service
        .register_connector(Arc::new(MqttDatasourceManager::from_config(&config)))
        .await;
    service
        .register_processor_factory(Arc::new(MqttProcessorFactory::from_config(&config)))
        .await;

    // 3. Backends from disk, then whatever was persisted before
    if let Some(path) = &config.backend_path {
        let loaded = service.load_backends(path).await?;
        info!("Loaded {} backend(s) from {}", loaded.len(), path.display());
    }
    let restored = service.restore_backends().await?;
    if !restored.is_empty() {
        info!("Restored {} persisted backend(s)", restored.len());
    }

    // 4. Orphaned file sweep
    let reaper = Arc::new(OrphanReaper::new(
        storage,
        service.registry(),
        config.reaper_policy(),
    ));
    reaper.start(config.sweep_period()).await;

    info!("Backends: {:?}", service.backend_names().await);
    info!("Rules: {:?}", service.rule_names().await);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    reaper.stop().await;
    service.shutdown().await;
    Ok(())
}

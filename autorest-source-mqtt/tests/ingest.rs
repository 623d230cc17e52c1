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

//! Decoded MQTT messages flowing through the core pipeline.

use std::sync::Arc;

use serde_json::json;

use autorest_core::model::{Backend, DataSourceConfig, Document, Route};
use autorest_core::{BackendService, MemoryStorage, ServiceConfig};
use autorest_source_mqtt::decode_payload;

fn livingroom() -> Backend {
    serde_json::from_value(json!({
        "backendname": "sensors",
        "models": [{
            "name": "reading",
            "fields": [
                {"name": "value", "type": "float", "mandatory": true},
                {"name": "topic", "type": "string"}
            ]
        }],
        "datasources": [{
            "name": "livingroom",
            "type": "mqtt",
            "destinations": ["$model.reading"],
            "config": {
                "broker": "tcp://127.0.0.1:1883",
                "topic": "home/livingroom/temp",
                "payload": "application/x.simple",
                "simpleValueAttribute": "value",
                "simpleValueAttributeType": "float",
                "addTopicAsAttribute": "topic"
            }
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_simple_payload_becomes_one_reading() {
    let storage = Arc::new(MemoryStorage::new());
    let service = BackendService::new(ServiceConfig::default(), storage);
    service.create_backend(livingroom()).await.unwrap();

    let prepared = BackendService::prepare_backend(livingroom()).unwrap();
    let datasource = &prepared.datasources[0];
    let DataSourceConfig::Mqtt(config) = &datasource.config else {
        panic!("Expected mqtt config");
    };

    let document = decode_payload(config, "home/livingroom/temp", b"21.5").unwrap();
    let deliveries = service
        .pipeline()
        .process("sensors", datasource, document)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].outcome.is_ok());

    let (total, readings) = service
        .documents()
        .query(&Route::new("sensors", "reading"), &Document::new(), 0, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(readings[0]["value"], json!(21.5));
    assert_eq!(readings[0]["topic"], "home/livingroom/temp");
}

#[tokio::test]
async fn test_undecodable_payload_stores_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let service = BackendService::new(ServiceConfig::default(), storage);
    service.create_backend(livingroom()).await.unwrap();

    let prepared = BackendService::prepare_backend(livingroom()).unwrap();
    let DataSourceConfig::Mqtt(mut config) = prepared.datasources[0].config.clone() else {
        panic!("Expected mqtt config");
    };
    config.payload = "application/json".into();
    assert!(decode_payload(&config, "home/livingroom/temp", b"21.5").is_err());

    let total = service
        .documents()
        .count(&Route::new("sensors", "reading"))
        .await
        .unwrap();
    assert_eq!(total, 0);
}

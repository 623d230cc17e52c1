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

//! Document operations on the models of registered backends.
//!
//! Every write is validated against the model schema and stamped with the
//! system attributes `_owner`, `_created` and `_modified`.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use log::{debug, warn};
use serde_json::Value;

use crate::error::{AutorestError, Result};
use crate::model::{
    Document, Model, Route, ATTRIBUTE_CREATED, ATTRIBUTE_ID, ATTRIBUTE_MODIFIED, ATTRIBUTE_OWNER,
};
use crate::registry::BackendRegistry;
use crate::schema;
use crate::storage::StorageRouter;

pub struct DocumentService {
    storage: Arc<dyn StorageRouter>,
    registry: Arc<BackendRegistry>,
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn require_identity(route: &Route) -> Result<&str> {
    route
        .identity
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AutorestError::validation(format!("{route}: missing {ATTRIBUTE_ID}")))
}

impl DocumentService {
    pub fn new(storage: Arc<dyn StorageRouter>, registry: Arc<BackendRegistry>) -> Self {
        Self { storage, registry }
    }

    async fn model(&self, route: &Route) -> Result<Model> {
        self.registry
            .model(route)
            .await
            .ok_or_else(|| AutorestError::not_found("model", route.collection_name()))
    }

    /// Validate and insert a new document, returning it as stored.
    pub async fn store(&self, route: &Route, document: Document) -> Result<Document> {
        let model = self.model(route).await?;
        let mut document = schema::validate(&model, document)?;

        document.remove(ATTRIBUTE_ID);
        let timestamp = now();
        document.insert(ATTRIBUTE_OWNER.to_string(), Value::String(route.username.clone()));
        document.insert(ATTRIBUTE_CREATED.to_string(), timestamp.clone());
        document.insert(ATTRIBUTE_MODIFIED.to_string(), timestamp);

        let id = self.storage.create_model(route, document).await?;
        debug!("[{route}] Document {id} created");
        self.storage.get_model(&route.clone().with_identity(id)).await
    }

    pub async fn get(&self, route: &Route) -> Result<Document> {
        require_identity(route)?;
        self.storage.get_model(route).await
    }

    /// Replace an existing document. `_created` of the stored version is kept.
    pub async fn update(&self, route: &Route, document: Document) -> Result<Document> {
        let id = require_identity(route)?.to_string();
        let model = self.model(route).await?;
        let existing = self.storage.get_model(route).await?;
        let mut document = schema::validate(&model, document)?;

        document.insert(ATTRIBUTE_ID.to_string(), Value::String(id));
        document.insert(ATTRIBUTE_OWNER.to_string(), Value::String(route.username.clone()));
        document.insert(
            ATTRIBUTE_CREATED.to_string(),
            existing.get(ATTRIBUTE_CREATED).cloned().unwrap_or(Value::Null),
        );
        document.insert(ATTRIBUTE_MODIFIED.to_string(), now());

        self.storage.update_model(route, document).await
    }

    /// Delete a document, optionally together with the blobs its `file`
    /// fields reference.
    pub async fn delete(&self, route: &Route, delete_refs: bool) -> Result<()> {
        require_identity(route)?;
        let existing = self.storage.get_model(route).await?;

        if delete_refs {
            let model = self.model(route).await?;
            for file_id in schema::referenced_files(&model, &existing) {
                match self.storage.delete_file(&route.backend, &file_id).await {
                    Ok(()) => debug!("[{route}] Referenced file {file_id} deleted"),
                    Err(e) if e.is_not_found() => {
                        warn!("[{route}] Referenced file {file_id} already gone")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.storage.delete_model(route).await
    }

    pub async fn query(
        &self,
        route: &Route,
        filter: &Document,
        offset: usize,
        limit: usize,
    ) -> Result<(usize, Vec<Document>)> {
        self.model(route).await?;
        self.storage.query_model(route, filter, offset, limit).await
    }

    pub async fn count(&self, route: &Route) -> Result<usize> {
        self.model(route).await?;
        self.storage.count_model(route).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Backend, Field, FieldType};
    use crate::storage::MemoryStorage;
    use serde_json::json;

    async fn service() -> (DocumentService, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let registry = Arc::new(BackendRegistry::new());
        registry
            .add(Backend {
                backendname: "sensors".into(),
                models: vec![Model {
                    name: "reading".into(),
                    fields: vec![
                        Field::new("value", FieldType::Float).mandatory(),
                        Field::new("ts", FieldType::Time),
                        Field::new("photo", FieldType::File),
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await;
        (DocumentService::new(storage.clone(), registry), storage)
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn route() -> Route {
        Route::new("sensors", "reading").with_username("editor")
    }

    #[tokio::test]
    async fn test_store_adds_system_attributes() {
        let (service, _) = service().await;
        let stored = service
            .store(&route(), doc(json!({"value": 21.5, "ts": 1587973561647i64})))
            .await
            .unwrap();

        assert_eq!(stored["value"], 21.5);
        assert_eq!(stored["ts"], "2020-04-27T07:46:01.647Z");
        assert_eq!(stored[ATTRIBUTE_OWNER], "editor");
        assert!(stored[ATTRIBUTE_ID].is_string());
        assert_eq!(stored[ATTRIBUTE_CREATED], stored[ATTRIBUTE_MODIFIED]);
    }

    #[tokio::test]
    async fn test_store_rejects_missing_mandatory() {
        let (service, storage) = service().await;
        let err = service
            .store(&route(), doc(json!({"ts": 0})))
            .await
            .unwrap_err();
        assert!(matches!(err, AutorestError::Validation { .. }));
        assert_eq!(storage.count_model(&route()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let (service, _) = service().await;
        let err = service
            .store(&Route::new("sensors", "nope"), doc(json!({})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_keeps_created() {
        let (service, _) = service().await;
        let stored = service.store(&route(), doc(json!({"value": 1.0}))).await.unwrap();
        let id = stored[ATTRIBUTE_ID].as_str().unwrap().to_string();

        let updated = service
            .update(
                &route().with_identity(&id),
                doc(json!({"value": 2.0, "_created": "forged"})),
            )
            .await
            .unwrap();
        assert_eq!(updated["value"], 2.0);
        assert_eq!(updated[ATTRIBUTE_CREATED], stored[ATTRIBUTE_CREATED]);
        assert_eq!(updated[ATTRIBUTE_ID], id.as_str());

        let err = service
            .update(&route().with_identity(&id), doc(json!({"value": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, AutorestError::Validation { .. }));

        let err = service.update(&route(), doc(json!({"value": 3.0}))).await.unwrap_err();
        assert!(matches!(err, AutorestError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_delete_with_references() {
        let (service, storage) = service().await;
        let file_id = storage
            .add_file("sensors", "photo.jpg", b"jpeg".to_vec())
            .await
            .unwrap();
        let stored = service
            .store(&route(), doc(json!({"value": 1.0, "photo": file_id})))
            .await
            .unwrap();
        let id = stored[ATTRIBUTE_ID].as_str().unwrap().to_string();

        service.delete(&route().with_identity(&id), true).await.unwrap();
        assert!(storage.files().await.unwrap().is_empty());
        assert!(service
            .get(&route().with_identity(&id))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_query_and_count() {
        let (service, _) = service().await;
        for v in [1.0, 2.0, 3.0] {
            service.store(&route(), doc(json!({"value": v}))).await.unwrap();
        }
        assert_eq!(service.count(&route()).await.unwrap(), 3);
        let (total, page) = service
            .query(&route(), &doc(json!({"value": 2.0})), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0]["value"], 2.0);
    }
}

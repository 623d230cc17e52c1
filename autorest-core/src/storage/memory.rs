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

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StorageRouter, FULLTEXT_QUERY_KEY};
use crate::error::{AutorestError, Result};
use crate::model::{Document, FileInfo, Index, Route, ATTRIBUTE_ID};

#[derive(Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<Index>,
}

impl Collection {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|d| document_id(d) == Some(id))
    }

    /// Name of the first unique index `candidate` collides with.
    fn unique_violation(&self, candidate: &Document, skip_id: Option<&str>) -> Option<String> {
        self.indexes
            .iter()
            .filter(|index| index.unique && !index.is_fulltext())
            .find(|index| {
                let Some(key) = index_key(index, candidate) else {
                    return false;
                };
                self.documents
                    .iter()
                    .filter(|d| skip_id.is_none() || document_id(d) != skip_id)
                    .any(|d| index_key(index, d).as_ref() == Some(&key))
            })
            .map(|index| index.name.clone())
    }

    fn insert(&mut self, route: &Route, mut document: Document) -> Result<String> {
        let id = match document_id(&document) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        if self.position(&id).is_some() {
            return Err(AutorestError::conflict(format!(
                "{}: duplicate document id '{id}'",
                route.collection_name()
            )));
        }
        document.insert(ATTRIBUTE_ID.to_string(), Value::String(id.clone()));
        if let Some(index) = self.unique_violation(&document, None) {
            return Err(AutorestError::conflict(format!(
                "{}: unique index '{index}' violated",
                route.collection_name()
            )));
        }
        self.documents.push(document);
        Ok(id)
    }

    fn fulltext_fields(&self) -> Option<&[String]> {
        self.indexes
            .iter()
            .find(|index| index.is_fulltext())
            .map(|index| index.fields.as_slice())
    }
}

struct StoredFile {
    info: FileInfo,
    data: Vec<u8>,
}

/// In-process [`StorageRouter`].
///
/// Collections are created on first write. Documents keep insertion order.
#[derive(Default)]
pub struct MemoryStorage {
    collections: RwLock<HashMap<String, Collection>>,
    files: RwLock<HashMap<String, StoredFile>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob with an explicit upload time.
    pub async fn add_file_at(
        &self,
        backend: &str,
        filename: &str,
        data: Vec<u8>,
        uploaded: DateTime<Utc>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let info = FileInfo {
            id: id.clone(),
            filename: filename.to_string(),
            backend: backend.to_string(),
            upload_date: uploaded,
        };
        self.files
            .write()
            .await
            .insert(id.clone(), StoredFile { info, data });
        debug!("[{backend}] File '{filename}' stored as {id}");
        id
    }
}

fn document_id(document: &Document) -> Option<&str> {
    document.get(ATTRIBUTE_ID).and_then(Value::as_str)
}

fn require_identity(route: &Route) -> Result<&str> {
    route
        .identity
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AutorestError::validation(format!("{route}: missing document id")))
}

/// Case-insensitive collation of a value for index comparisons.
fn collate(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other.clone(),
    }
}

/// Index key of a document, `None` when none of the indexed fields is set.
fn index_key(index: &Index, document: &Document) -> Option<Vec<Value>> {
    let key: Vec<Value> = index
        .fields
        .iter()
        .map(|f| document.get(f).map(collate).unwrap_or(Value::Null))
        .collect();
    if key.iter().all(Value::is_null) {
        None
    } else {
        Some(key)
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn value_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match (actual, expected) {
        (Value::Array(items), _) => items.iter().any(|item| value_matches(Some(item), expected)),
        (Value::String(have), Value::String(want)) => contains_ignore_case(have, want),
        (have, want) => have == want,
    }
}

fn fulltext_matches(document: &Document, fields: &[String], terms: &[String]) -> bool {
    fields.iter().filter_map(|f| document.get(f)).any(|value| {
        let texts: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => vec![],
        };
        texts
            .iter()
            .any(|text| terms.iter().any(|term| text.to_lowercase().contains(term)))
    })
}

fn filter_matches(document: &Document, filter: &Document, fulltext: Option<(&[String], &[String])>) -> bool {
    if let Some((fields, terms)) = fulltext {
        if !fulltext_matches(document, fields, terms) {
            return false;
        }
    }
    filter
        .iter()
        .filter(|(key, _)| key.as_str() != FULLTEXT_QUERY_KEY)
        .all(|(key, expected)| value_matches(document.get(key), expected))
}

#[async_trait]
impl StorageRouter for MemoryStorage {
    async fn create_model(&self, route: &Route, document: Document) -> Result<String> {
        let mut collections = self.collections.write().await;
        collections
            .entry(route.collection_name())
            .or_default()
            .insert(route, document)
    }

    async fn create_models(&self, route: &Route, documents: Vec<Document>) -> Result<Vec<String>> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(route.collection_name()).or_default();
        documents
            .into_iter()
            .map(|document| collection.insert(route, document))
            .collect()
    }

    async fn get_model(&self, route: &Route) -> Result<Document> {
        let id = require_identity(route)?;
        let collections = self.collections.read().await;
        collections
            .get(&route.collection_name())
            .and_then(|c| c.position(id).map(|pos| c.documents[pos].clone()))
            .ok_or_else(|| AutorestError::not_found("document", route.to_string()))
    }

    async fn count_model(&self, route: &Route) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&route.collection_name())
            .map(|c| c.documents.len())
            .unwrap_or(0))
    }

    async fn query_model(
        &self,
        route: &Route,
        filter: &Document,
        offset: usize,
        limit: usize,
    ) -> Result<(usize, Vec<Document>)> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&route.collection_name()) else {
            return Ok((0, vec![]));
        };

        let terms: Vec<String>;
        let fulltext = match filter.get(FULLTEXT_QUERY_KEY) {
            Some(search) => {
                let fields = collection.fulltext_fields().ok_or_else(|| {
                    AutorestError::storage(format!(
                        "{}: full-text query without a full-text index",
                        route.collection_name()
                    ))
                })?;
                terms = search
                    .as_str()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect();
                Some((fields, terms.as_slice()))
            }
            None => None,
        };

        let matching: Vec<&Document> = collection
            .documents
            .iter()
            .filter(|d| filter_matches(d, filter, fulltext))
            .collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((total, page))
    }

    async fn update_model(&self, route: &Route, mut document: Document) -> Result<Document> {
        let id = require_identity(route)?.to_string();
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&route.collection_name())
            .ok_or_else(|| AutorestError::not_found("document", route.to_string()))?;
        let pos = collection
            .position(&id)
            .ok_or_else(|| AutorestError::not_found("document", route.to_string()))?;

        document.insert(ATTRIBUTE_ID.to_string(), Value::String(id.clone()));
        if let Some(index) = collection.unique_violation(&document, Some(&id)) {
            return Err(AutorestError::conflict(format!(
                "{}: unique index '{index}' violated",
                route.collection_name()
            )));
        }
        collection.documents[pos] = document.clone();
        Ok(document)
    }

    async fn delete_model(&self, route: &Route) -> Result<()> {
        let id = require_identity(route)?;
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&route.collection_name())
            .ok_or_else(|| AutorestError::not_found("document", route.to_string()))?;
        let pos = collection
            .position(id)
            .ok_or_else(|| AutorestError::not_found("document", route.to_string()))?;
        collection.documents.remove(pos);
        Ok(())
    }

    async fn add_file(&self, backend: &str, filename: &str, data: Vec<u8>) -> Result<String> {
        Ok(self.add_file_at(backend, filename, data, Utc::now()).await)
    }

    async fn get_filename(&self, backend: &str, file_id: &str) -> Result<String> {
        let files = self.files.read().await;
        files
            .get(file_id)
            .filter(|f| f.info.backend == backend)
            .map(|f| f.info.filename.clone())
            .ok_or_else(|| AutorestError::not_found("file", file_id))
    }

    async fn get_file(&self, backend: &str, file_id: &str) -> Result<Vec<u8>> {
        let files = self.files.read().await;
        files
            .get(file_id)
            .filter(|f| f.info.backend == backend)
            .map(|f| f.data.clone())
            .ok_or_else(|| AutorestError::not_found("file", file_id))
    }

    async fn delete_file(&self, backend: &str, file_id: &str) -> Result<()> {
        let mut files = self.files.write().await;
        match files.get(file_id) {
            Some(f) if f.info.backend == backend => {
                files.remove(file_id);
                Ok(())
            }
            _ => Err(AutorestError::not_found("file", file_id)),
        }
    }

    async fn files(&self) -> Result<Vec<FileInfo>> {
        let files = self.files.read().await;
        let mut infos: Vec<FileInfo> = files.values().map(|f| f.info.clone()).collect();
        infos.sort_by(|a, b| a.upload_date.cmp(&b.upload_date));
        Ok(infos)
    }

    async fn get_index_names(&self, route: &Route) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&route.collection_name())
            .map(|c| c.indexes.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_index(&self, route: &Route, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&route.collection_name())
            .ok_or_else(|| AutorestError::not_found("index", name))?;
        let pos = collection
            .indexes
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| AutorestError::not_found("index", name))?;
        collection.indexes.remove(pos);
        Ok(())
    }

    async fn update_index(&self, route: &Route, index: &Index) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(route.collection_name()).or_default();
        if collection.indexes.iter().any(|i| i.name == index.name) {
            return Ok(());
        }

        if index.unique && !index.is_fulltext() {
            let mut keys: Vec<Vec<Value>> = Vec::new();
            for key in collection.documents.iter().filter_map(|d| index_key(index, d)) {
                if keys.contains(&key) {
                    return Err(AutorestError::conflict(format!(
                        "{}: existing documents violate unique index '{}'",
                        route.collection_name(),
                        index.name
                    )));
                }
                keys.push(key);
            }
        }

        collection.indexes.push(index.clone());
        info!(
            "Index {} for route {} created.",
            index.name,
            route.collection_name()
        );
        Ok(())
    }

    async fn drop_backend(&self, backend: &str) -> Result<()> {
        let prefix = format!("{backend}.");
        self.collections
            .write()
            .await
            .retain(|name, _| !name.starts_with(&prefix));
        self.files
            .write()
            .await
            .retain(|_, f| f.info.backend != backend);
        info!("[{backend}] All backend data dropped");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        self.collections.write().await.clear();
        self.files.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn route() -> Route {
        Route::new("sensors", "reading")
    }

    #[tokio::test]
    async fn test_document_crud() {
        let storage = MemoryStorage::new();
        let id = storage
            .create_model(&route(), doc(json!({"value": 21.5})))
            .await
            .unwrap();

        let stored = storage.get_model(&route().with_identity(&id)).await.unwrap();
        assert_eq!(stored["value"], 21.5);
        assert_eq!(stored[ATTRIBUTE_ID], id.as_str());
        assert_eq!(storage.count_model(&route()).await.unwrap(), 1);

        let updated = storage
            .update_model(&route().with_identity(&id), doc(json!({"value": 22.0})))
            .await
            .unwrap();
        assert_eq!(updated["value"], 22.0);
        assert_eq!(updated[ATTRIBUTE_ID], id.as_str());

        storage.delete_model(&route().with_identity(&id)).await.unwrap();
        let err = storage.get_model(&route().with_identity(&id)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(storage
            .delete_model(&route().with_identity(&id))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let storage = MemoryStorage::new();
        let err = storage.get_model(&route()).await.unwrap_err();
        assert!(matches!(err, AutorestError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_query_substring_and_paging() {
        let storage = MemoryStorage::new();
        let docs = vec![
            doc(json!({"room": "Kitchen", "value": 1})),
            doc(json!({"room": "kitchenette", "value": 2})),
            doc(json!({"room": "garage", "value": 3})),
        ];
        storage.create_models(&route(), docs).await.unwrap();

        let (total, page) = storage
            .query_model(&route(), &doc(json!({"room": "KITCHEN"})), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);

        let (total, page) = storage
            .query_model(&route(), &doc(json!({"room": "kitchen"})), 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0]["value"], 2);

        let (total, page) = storage
            .query_model(&route(), &doc(json!({"value": 3})), 0, 0)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert!(page.is_empty());

        let (total, _) = storage
            .query_model(&Route::new("sensors", "missing"), &Document::new(), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_fulltext_query() {
        let storage = MemoryStorage::new();
        let fulltext = Index {
            name: "fulltext".into(),
            unique: false,
            fields: vec!["title".into(), "tags".into()],
        };
        storage.update_index(&route(), &fulltext).await.unwrap();
        storage
            .create_models(
                &route(),
                vec![
                    doc(json!({"title": "Garden sensor", "tags": ["outdoor"]})),
                    doc(json!({"title": "Cellar", "tags": ["Humid", "dark"]})),
                    doc(json!({"title": "Attic", "note": "garden"})),
                ],
            )
            .await
            .unwrap();

        let (total, _) = storage
            .query_model(&route(), &doc(json!({"$fulltext": "garden humid"})), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 2);

        // a collection without a full-text index can't be searched
        storage
            .create_model(&Route::new("sensors", "other"), doc(json!({"x": 1})))
            .await
            .unwrap();
        let err = storage
            .query_model(&Route::new("sensors", "other"), &doc(json!({"$fulltext": "x"})), 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AutorestError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_unique_index_conflicts() {
        let storage = MemoryStorage::new();
        let unique = Index {
            name: "serial".into(),
            unique: true,
            fields: vec!["serial".into()],
        };
        storage.update_index(&route(), &unique).await.unwrap();
        // idempotent by name
        storage.update_index(&route(), &unique).await.unwrap();
        assert_eq!(storage.get_index_names(&route()).await.unwrap(), vec!["serial"]);

        let first = storage
            .create_model(&route(), doc(json!({"serial": "AB-1"})))
            .await
            .unwrap();
        let err = storage
            .create_model(&route(), doc(json!({"serial": "ab-1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AutorestError::Conflict { .. }));

        let second = storage
            .create_model(&route(), doc(json!({"serial": "CD-2"})))
            .await
            .unwrap();
        let err = storage
            .update_model(&route().with_identity(&second), doc(json!({"serial": "AB-1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AutorestError::Conflict { .. }));

        // replacing a document with its own key is fine
        storage
            .update_model(&route().with_identity(&first), doc(json!({"serial": "AB-1", "v": 2})))
            .await
            .unwrap();

        // documents without the indexed field are not indexed
        storage.create_model(&route(), doc(json!({"v": 1}))).await.unwrap();
        storage.create_model(&route(), doc(json!({"v": 2}))).await.unwrap();
    }

    #[tokio::test]
    async fn test_unique_index_on_duplicate_data_fails() {
        let storage = MemoryStorage::new();
        storage
            .create_models(
                &route(),
                vec![doc(json!({"name": "a"})), doc(json!({"name": "A"}))],
            )
            .await
            .unwrap();
        let unique = Index {
            name: "name".into(),
            unique: true,
            fields: vec!["name".into()],
        };
        let err = storage.update_index(&route(), &unique).await.unwrap_err();
        assert!(matches!(err, AutorestError::Conflict { .. }));
        assert!(storage.get_index_names(&route()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_index() {
        let storage = MemoryStorage::new();
        let index = Index {
            name: "value".into(),
            unique: false,
            fields: vec!["value".into()],
        };
        storage.update_index(&route(), &index).await.unwrap();
        storage.delete_index(&route(), "value").await.unwrap();
        assert!(storage.get_index_names(&route()).await.unwrap().is_empty());
        assert!(storage.delete_index(&route(), "value").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_files_are_scoped_per_backend() {
        let storage = MemoryStorage::new();
        let id = storage
            .add_file("sensors", "photo.jpg", b"jpeg".to_vec())
            .await
            .unwrap();

        assert_eq!(storage.get_filename("sensors", &id).await.unwrap(), "photo.jpg");
        assert_eq!(storage.get_file("sensors", &id).await.unwrap(), b"jpeg");
        assert!(storage.get_file("other", &id).await.unwrap_err().is_not_found());
        assert!(storage.delete_file("other", &id).await.is_err());

        storage.delete_file("sensors", &id).await.unwrap();
        assert!(storage.files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files_sorted_by_upload_date() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let newer = storage.add_file_at("sensors", "b", vec![], now).await;
        let older = storage
            .add_file_at("sensors", "a", vec![], now - Duration::hours(2))
            .await;

        let files = storage.files().await.unwrap();
        assert_eq!(files[0].id, older);
        assert_eq!(files[1].id, newer);
    }

    #[tokio::test]
    async fn test_drop_backend() {
        let storage = MemoryStorage::new();
        storage.create_model(&route(), doc(json!({"v": 1}))).await.unwrap();
        storage
            .create_model(&Route::new("sensorsx", "reading"), doc(json!({"v": 1})))
            .await
            .unwrap();
        storage.add_file("sensors", "f", vec![1]).await.unwrap();
        storage.add_file("sensorsx", "g", vec![2]).await.unwrap();

        storage.drop_backend("sensors").await.unwrap();
        assert_eq!(storage.count_model(&route()).await.unwrap(), 0);
        assert_eq!(
            storage
                .count_model(&Route::new("sensorsx", "reading"))
                .await
                .unwrap(),
            1
        );
        let files = storage.files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].backend, "sensorsx");

        storage.drop_all().await.unwrap();
        assert!(storage.files().await.unwrap().is_empty());
    }
}

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

//! In-memory set of active backend definitions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::{Backend, Model, Route};

/// Registry of currently active backends.
///
/// Read concurrently by message handlers and the reaper, written during
/// (de)registration.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend, replacing any entry of the same name.
    pub async fn add(&self, backend: Backend) -> String {
        let name = backend.backendname.clone();
        self.backends
            .write()
            .await
            .insert(name.clone(), Arc::new(backend));
        name
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.backends.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.read().await.get(name).cloned()
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.write().await.remove(name)
    }

    /// Names of all registered backends, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn clear(&self) {
        self.backends.write().await.clear();
    }

    /// Look up the model a route points at.
    pub async fn model(&self, route: &Route) -> Option<Model> {
        let backends = self.backends.read().await;
        backends
            .get(&route.backend)
            .and_then(|b| b.model(&route.model))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FieldType};

    fn backend(name: &str, description: &str) -> Backend {
        Backend {
            backendname: name.into(),
            description: description.into(),
            models: vec![Model {
                name: "reading".into(),
                fields: vec![Field::new("value", FieldType::Float)],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_replaces_same_name() {
        let registry = BackendRegistry::new();
        assert_eq!(registry.add(backend("sensors", "first")).await, "sensors");
        registry.add(backend("sensors", "second")).await;

        assert_eq!(registry.names().await, vec!["sensors"]);
        assert_eq!(registry.get("sensors").await.unwrap().description, "second");
    }

    #[tokio::test]
    async fn test_names_sorted_and_remove() {
        let registry = BackendRegistry::new();
        registry.add(backend("zeta", "")).await;
        registry.add(backend("alpha", "")).await;
        registry.add(backend("mid", "")).await;
        assert_eq!(registry.names().await, vec!["alpha", "mid", "zeta"]);

        assert!(registry.remove("mid").await.is_some());
        assert!(!registry.contains("mid").await);
        assert!(registry.remove("mid").await.is_none());

        registry.clear().await;
        assert!(registry.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_model_lookup() {
        let registry = BackendRegistry::new();
        registry.add(backend("sensors", "")).await;

        assert!(registry.model(&Route::new("sensors", "reading")).await.is_some());
        assert!(registry.model(&Route::new("sensors", "missing")).await.is_none());
        assert!(registry.model(&Route::new("other", "reading")).await.is_none());
    }
}

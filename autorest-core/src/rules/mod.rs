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

//! Registry of compiled transformation rules, keyed by `<backend>.<rule>`.

pub mod path;
pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AutorestError, Result};
use crate::model::Document;

pub use transform::CompiledRule;

/// Namespaced rule key.
pub fn rule_ns_name(backend: &str, rule: &str) -> String {
    format!("{backend}.{rule}")
}

/// Compiled rules of all registered backends.
///
/// Message handlers read concurrently; backend (de)registration writes.
#[derive(Default)]
pub struct RuleEngine {
    rules: RwLock<HashMap<String, Arc<CompiledRule>>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `spec` and register it, replacing a rule of the same name.
    pub async fn register(&self, backend: &str, rule: &str, spec: &Value) -> Result<()> {
        let name = rule_ns_name(backend, rule);
        let compiled = CompiledRule::compile(spec).map_err(|e| {
            error!("[{name}] Unable to compile rule: {e}");
            e
        })?;
        self.rules.write().await.insert(name.clone(), Arc::new(compiled));
        debug!("[{name}] Rule registered");
        Ok(())
    }

    pub async fn deregister(&self, backend: &str, rule: &str) {
        let name = rule_ns_name(backend, rule);
        if self.rules.write().await.remove(&name).is_some() {
            debug!("[{name}] Rule deregistered");
        }
    }

    /// Sorted namespaced names of all registered rules.
    pub async fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn compiled(&self, backend: &str, rule: &str) -> Result<Arc<CompiledRule>> {
        self.rules
            .read()
            .await
            .get(&rule_ns_name(backend, rule))
            .cloned()
            .ok_or_else(|| AutorestError::rule_not_defined(backend, rule))
    }

    /// Apply a registered rule to raw JSON.
    pub async fn transform_json(&self, backend: &str, rule: &str, json: &[u8]) -> Result<Vec<u8>> {
        let compiled = self.compiled(backend, rule).await?;
        compiled.transform(json).map_err(|e| {
            error!("[{}] Unable to transform message: {e}", rule_ns_name(backend, rule));
            e
        })
    }

    /// Apply a registered rule to a document.
    pub async fn transform_document(
        &self,
        backend: &str,
        rule: &str,
        document: Document,
    ) -> Result<Document> {
        let compiled = self.compiled(backend, rule).await?;
        match compiled.apply(Value::Object(document))? {
            Value::Object(map) => Ok(map),
            other => Err(AutorestError::validation(format!(
                "rule '{rule}' produced a non-object result: {other}"
            ))),
        }
    }

    /// Compile `spec` without registering it and apply it once.
    pub fn dry_run(spec: &Value, json: &[u8]) -> Result<Vec<u8>> {
        CompiledRule::compile(spec)?.transform(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shift_spec() -> Value {
        json!([{"operation": "shift", "spec": {
            "Device": "hm.channelName",
            "Motion": "hm.valueStable",
            "Time": "ts"
        }}])
    }

    #[tokio::test]
    async fn test_register_and_transform() {
        let engine = RuleEngine::new();
        engine.register("mcs", "hmBWMMotion", &shift_spec()).await.unwrap();

        let src = br#"{"val":false,"ts":1587971766000,"hm":{"channelName":"BWM Gartenhuette","valueStable":false}}"#;
        let out = engine.transform_json("mcs", "hmBWMMotion", src).await.unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            out,
            json!({"Device": "BWM Gartenhuette", "Motion": false, "Time": 1587971766000i64})
        );
        assert_eq!(engine.rule_names().await, vec!["mcs.hmBWMMotion"]);
    }

    #[tokio::test]
    async fn test_unknown_rule_is_not_defined() {
        let engine = RuleEngine::new();
        engine.register("mcs", "known", &shift_spec()).await.unwrap();

        for input in [&b"{}"[..], b"not even json", br#"{"a": [1, 2]}"#] {
            let err = engine.transform_json("mcs", "unknown", input).await.unwrap_err();
            assert!(matches!(err, AutorestError::RuleNotDefined { .. }));
            // rules are namespaced per backend
            let err = engine.transform_json("other", "known", input).await.unwrap_err();
            assert!(matches!(err, AutorestError::RuleNotDefined { .. }));
        }
    }

    #[tokio::test]
    async fn test_deregister() {
        let engine = RuleEngine::new();
        engine.register("mcs", "r", &shift_spec()).await.unwrap();
        engine.deregister("mcs", "r").await;
        assert!(engine.rule_names().await.is_empty());
        assert!(engine.transform_json("mcs", "r", b"{}").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_spec_is_not_registered() {
        let engine = RuleEngine::new();
        let err = engine
            .register("mcs", "broken", &json!([{"operation": "nope", "spec": {}}]))
            .await
            .unwrap_err();
        assert!(matches!(err, AutorestError::Config { .. }));
        assert!(engine.rule_names().await.is_empty());
    }

    #[test]
    fn test_dry_run() {
        let out = RuleEngine::dry_run(
            &json!([{"operation": "shift", "spec": {"t": "Temperature"}}]),
            br#"{"Temperature": 26.9}"#,
        )
        .unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&out).unwrap(), json!({"t": 26.9}));
    }
}

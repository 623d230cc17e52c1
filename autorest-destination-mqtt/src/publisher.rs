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

//! Utility functions for turning documents into MQTT messages.

use handlebars::Handlebars;

use autorest_core::model::Document;
use autorest_core::{AutorestError, Result};

/// Serialize a document into a JSON payload.
pub fn document_to_payload(document: &Document) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(document)?)
}

/// Render the topic template against the document. Plain topics are returned
/// unchanged. `registry` should not HTML-escape.
pub fn render_topic(
    registry: &Handlebars<'static>,
    template: &str,
    document: &Document,
) -> Result<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    let topic = registry
        .render_template(template, document)
        .map_err(|e| AutorestError::validation(format!("can't render topic '{template}': {e}")))?;
    if topic.is_empty() {
        return Err(AutorestError::validation(format!(
            "topic template '{template}' rendered empty"
        )));
    }
    Ok(topic)
}

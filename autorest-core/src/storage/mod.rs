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

//! Storage contract used by the core.
//!
//! The concrete document and blob engine lives outside this crate. Everything
//! the core needs from it is expressed by [`StorageRouter`]:
//!
//! - documents are addressed by [`Route`], the collection is
//!   [`Route::collection_name`] (`backend.model`), the document id is
//!   [`Route::identity`]
//! - blobs are owned by a backend and enumerated for the orphan reaper
//! - named indexes are managed per collection
//!
//! [`MemoryStorage`] is a complete in-process implementation used by tests and
//! the demo host.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AutorestError, Result};
use crate::model::{Document, FileInfo, Index, Route};

/// Query key selecting a full-text search over the collection's full-text
/// index.
pub const FULLTEXT_QUERY_KEY: &str = "$fulltext";

/// Document and blob storage, keyed by route.
///
/// Lookups of absent documents or blobs return
/// [`AutorestError::NotFound`]; unique index violations return
/// [`AutorestError::Conflict`]. Any other engine failure is reported as
/// [`AutorestError::Storage`].
#[async_trait]
pub trait StorageRouter: Send + Sync {
    /// Insert a document and return its new id.
    async fn create_model(&self, route: &Route, document: Document) -> Result<String>;

    /// Insert several documents, returning their ids in input order.
    async fn create_models(&self, route: &Route, documents: Vec<Document>) -> Result<Vec<String>>;

    /// Fetch the document `route.identity`.
    async fn get_model(&self, route: &Route) -> Result<Document>;

    /// Number of documents in the route's collection.
    async fn count_model(&self, route: &Route) -> Result<usize>;

    /// Page through documents matching `filter`.
    ///
    /// String values in the filter match case-insensitively as substrings,
    /// other values by equality, and [`FULLTEXT_QUERY_KEY`] searches the
    /// fields of the full-text index. Returns the total number of matches
    /// together with the requested page.
    async fn query_model(
        &self,
        route: &Route,
        filter: &Document,
        offset: usize,
        limit: usize,
    ) -> Result<(usize, Vec<Document>)>;

    /// Replace the document `route.identity` and return the stored result.
    async fn update_model(&self, route: &Route, document: Document) -> Result<Document>;

    async fn delete_model(&self, route: &Route) -> Result<()>;

    /// Store a blob for `backend` and return its id.
    async fn add_file(&self, backend: &str, filename: &str, data: Vec<u8>) -> Result<String>;

    async fn get_filename(&self, backend: &str, file_id: &str) -> Result<String>;

    async fn get_file(&self, backend: &str, file_id: &str) -> Result<Vec<u8>>;

    async fn delete_file(&self, backend: &str, file_id: &str) -> Result<()>;

    /// Metadata of every stored blob, across all backends.
    async fn files(&self) -> Result<Vec<FileInfo>>;

    async fn get_index_names(&self, route: &Route) -> Result<Vec<String>>;

    async fn delete_index(&self, route: &Route, name: &str) -> Result<()>;

    /// Create `index` on the route's collection unless an index of that name
    /// already exists.
    async fn update_index(&self, route: &Route, index: &Index) -> Result<()>;

    /// Drop every collection and blob of `backend`.
    async fn drop_backend(&self, backend: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    async fn drop_all(&self) -> Result<()>;
}

/// Parse a query string as handed over by the HTTP layer. An empty query
/// matches everything.
pub fn parse_query(query: &str) -> Result<Document> {
    if query.trim().is_empty() {
        return Ok(Document::new());
    }
    match serde_json::from_str::<Value>(query)? {
        Value::Object(filter) => Ok(filter),
        other => Err(AutorestError::validation(format!(
            "query must be a JSON object, got {other}"
        ))),
    }
}

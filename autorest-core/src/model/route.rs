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

use std::fmt;

/// Address of a model collection (and optionally one document) in storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub backend: String,
    pub model: String,
    pub identity: Option<String>,
    pub username: String,
    pub apikey: String,
    pub system_id: String,
}

impl Route {
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Canonical collection name, `backend.model`.
    pub fn collection_name(&self) -> String {
        format!("{}.{}", self.backend, self.model)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.backend, self.model)?;
        if let Some(identity) = &self.identity {
            write!(f, ".{identity}")?;
        }
        Ok(())
    }
}

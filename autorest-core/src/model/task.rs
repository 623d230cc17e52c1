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

//! Background task records and blob metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Document;

pub const TASK_ORPHANED_FILES_REPORT: &str = "orphanedFilesReport";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    New,
    Running,
    Finished,
}

/// An operator-visible record of a background job, stored in `_system.tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "ttype")]
    pub task_type: String,
    #[serde(rename = "tstatus")]
    pub status: TaskStatus,
    #[serde(rename = "tfile", default)]
    pub file: String,
    #[serde(rename = "tdata", default)]
    pub data: Document,
}

impl Task {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            task_type: task_type.into(),
            status: TaskStatus::New,
            file: String::new(),
            data: Document::new(),
        }
    }

    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(Document::new()),
        }
    }
}

/// Metadata of a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub filename: String,
    pub backend: String,
    pub upload_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_document_shape() {
        let mut task = Task::new(TASK_ORPHANED_FILES_REPORT);
        task.status = TaskStatus::Running;
        let doc = task.to_document().unwrap();
        assert_eq!(doc["ttype"], "orphanedFilesReport");
        assert_eq!(doc["tstatus"], "running");
        assert!(doc["tdata"].as_object().unwrap().is_empty());
    }
}

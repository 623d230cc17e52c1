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

//! Background sweep for uploaded files that no document references anymore.
//!
//! A blob is an orphan when it is older than the grace period and no `file`
//! field of any model of its backend holds its id. Sweeps never overlap: a
//! sweep that finds another one running is skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::error::Result;
use crate::model::{
    tasks_route, Document, FieldType, FileInfo, Route, Task, TaskStatus, TASK_ORPHANED_FILES_REPORT,
};
use crate::registry::BackendRegistry;
use crate::storage::StorageRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperPolicy {
    pub delete_orphans: bool,
    pub grace_period: Duration,
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self {
            delete_orphans: false,
            grace_period: Duration::from_secs(60 * 60),
        }
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Number of blobs old enough to be checked.
    pub checked: usize,
    pub orphans: Vec<FileInfo>,
    /// Ids of orphans actually deleted.
    pub deleted: Vec<String>,
}

/// (backend, model, field) of a `file` field.
struct FileField {
    backend: String,
    model: String,
    field: String,
}

pub struct OrphanReaper {
    storage: Arc<dyn StorageRouter>,
    registry: Arc<BackendRegistry>,
    policy: ReaperPolicy,
    running: Mutex<()>,
    shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl OrphanReaper {
    pub fn new(
        storage: Arc<dyn StorageRouter>,
        registry: Arc<BackendRegistry>,
        policy: ReaperPolicy,
    ) -> Self {
        Self {
            storage,
            registry,
            policy,
            running: Mutex::new(()),
            shutdown_tx: RwLock::new(None),
            task: RwLock::new(None),
        }
    }

    /// Sweep every `period` until [`OrphanReaper::stop`]. A zero period
    /// disables the ticker.
    pub async fn start(self: &Arc<Self>, period: Duration) {
        if period.is_zero() {
            info!("[reaper] Orphaned file sweep disabled");
            return;
        }
        self.stop().await;

        let (tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.write().await = Some(tx);

        let reaper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("[reaper] Starting with period: {period:?}");
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("[reaper] Shutdown signal received");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = reaper.sweep().await {
                            error!("[reaper] Sweep failed: {e}");
                        }
                    }
                }
            }
        });
        *self.task.write().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task.write().await.take() {
            if let Err(e) = handle.await {
                warn!("[reaper] Sweep task ended abnormally: {e}");
            }
        }
    }

    pub async fn sweep(&self) -> Result<Option<SweepReport>> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as of `now`. Returns `None` when another sweep is still
    /// running.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("[reaper] Previous sweep still running, skipping");
            return Ok(None);
        };

        let (checked, orphans) = self.find_orphans(now).await?;
        let mut deleted = Vec::new();
        for orphan in &orphans {
            if !self.policy.delete_orphans {
                info!(
                    "[reaper] Orphaned file {} ({}) of backend {}",
                    orphan.id, orphan.filename, orphan.backend
                );
                continue;
            }
            match self.storage.delete_file(&orphan.backend, &orphan.id).await {
                Ok(()) => {
                    info!("[reaper] Deleted orphaned file {} ({})", orphan.id, orphan.filename);
                    deleted.push(orphan.id.clone());
                }
                Err(e) => error!("[reaper] Can't delete orphaned file {}: {e}", orphan.id),
            }
        }

        Ok(Some(SweepReport {
            checked,
            orphans,
            deleted,
        }))
    }

    /// Record the current orphans in a report task without deleting anything.
    pub async fn report(&self) -> Result<Option<Task>> {
        self.report_at(Utc::now()).await
    }

    pub async fn report_at(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let Ok(_guard) = self.running.try_lock() else {
            info!("[reaper] Previous sweep still running, skipping report");
            return Ok(None);
        };

        let route = tasks_route();
        let mut task = Task::new(TASK_ORPHANED_FILES_REPORT);
        task.name = format!("orphaned files {}", now.format("%Y-%m-%d %H:%M:%S"));
        task.id = self.storage.create_model(&route, task.to_document()?).await?;
        debug!("[reaper] Report task {} created", task.id);

        task.status = TaskStatus::Running;
        self.update_task(&route, &task).await?;

        let (_, orphans) = self.find_orphans(now).await?;
        task.data = Document::new();
        task.data
            .insert("fileids".to_string(), serde_json::to_value(&orphans)?);
        task.status = TaskStatus::Finished;
        self.update_task(&route, &task).await?;
        info!(
            "[reaper] Report task {} finished, {} orphaned file(s)",
            task.id,
            orphans.len()
        );
        Ok(Some(task))
    }

    async fn update_task(&self, route: &Route, task: &Task) -> Result<()> {
        self.storage
            .update_model(&route.clone().with_identity(&task.id), task.to_document()?)
            .await?;
        Ok(())
    }

    async fn file_fields(&self) -> Vec<FileField> {
        let mut fields = Vec::new();
        for name in self.registry.names().await {
            let Some(backend) = self.registry.get(&name).await else {
                continue;
            };
            for model in &backend.models {
                for field in model.fields.iter().filter(|f| f.field_type == FieldType::File) {
                    fields.push(FileField {
                        backend: name.clone(),
                        model: model.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        fields
    }

    async fn is_referenced(&self, file: &FileInfo, fields: &[FileField]) -> bool {
        for field in fields.iter().filter(|f| f.backend == file.backend) {
            let route = Route::new(&field.backend, &field.model);
            let mut filter = Document::new();
            filter.insert(field.field.clone(), Value::String(file.id.clone()));
            match self.storage.query_model(&route, &filter, 0, 0).await {
                Ok((0, _)) => {}
                Ok(_) => return true,
                Err(e) => {
                    warn!(
                        "[reaper] Can't check references of {} in {route}: {e}",
                        file.id
                    );
                    return true;
                }
            }
        }
        false
    }

    async fn find_orphans(&self, now: DateTime<Utc>) -> Result<(usize, Vec<FileInfo>)> {
        let fields = self.file_fields().await;
        let mut checked = 0;
        let mut orphans = Vec::new();
        for file in self.storage.files().await? {
            match (now - file.upload_date).to_std() {
                Ok(age) if age >= self.policy.grace_period => {}
                _ => continue,
            }
            checked += 1;
            if !self.is_referenced(&file, &fields).await {
                orphans.push(file);
            }
        }
        Ok((checked, orphans))
    }
}

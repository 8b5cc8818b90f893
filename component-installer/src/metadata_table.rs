// Copyright 2024 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use component_error::{Error, ResultExt};
use component_util::{background_spawn, spawn_blocking};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, event};

/// Per-user bookkeeping of which components are in use.
pub trait MetadataTable: Send + Sync + 'static {
    fn add_component_for_current_user(&self, name: &str);

    fn delete_component_for_current_user(&self, name: &str);

    fn has_component_for_any_user(&self, name: &str) -> bool;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MetadataContents {
    /// User id to the names of the components that user loaded.
    #[serde(default)]
    users: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug)]
enum WriteRequest {
    Write(MetadataContents),
    Flush(oneshot::Sender<()>),
}

/// Writes snapshots to `path` in the order they were sent. The file work runs
/// on the blocking pool. The task ends once the sender is dropped and every
/// queued snapshot was written.
fn spawn_writer(path: PathBuf) -> mpsc::UnboundedSender<WriteRequest> {
    let (write_tx, mut write_rx) = mpsc::unbounded_channel();
    background_spawn!("metadata_table_writer", async move {
        while let Some(request) = write_rx.recv().await {
            let contents = match request {
                WriteRequest::Write(contents) => contents,
                WriteRequest::Flush(done_tx) => {
                    // Failing to send just means the waiter went away.
                    let _ = done_tx.send(());
                    continue;
                }
            };
            let write_path = path.clone();
            let result = spawn_blocking!("metadata_table_write", move || write_atomically(
                &write_path,
                &contents
            ))
            .await;
            let err = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(err) => Error::from(err),
            };
            event!(
                Level::ERROR,
                ?err,
                path = %path.display(),
                "Failed to persist component metadata table"
            );
        }
    });
    write_tx
}

/// [`MetadataTable`] kept in memory and, when a path is given, mirrored to a
/// JSON file after every change.
#[derive(Debug)]
pub struct JsonMetadataTable {
    writer: Option<mpsc::UnboundedSender<WriteRequest>>,
    current_user: String,
    contents: Mutex<MetadataContents>,
}

impl JsonMetadataTable {
    pub fn in_memory(current_user: impl Into<String>) -> Self {
        Self {
            writer: None,
            current_user: current_user.into(),
            contents: Mutex::new(MetadataContents::default()),
        }
    }

    /// Loads the table from `path`. A missing file starts an empty table.
    pub async fn load(
        path: impl Into<PathBuf>,
        current_user: impl Into<String>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let read_path = path.clone();
        let contents =
            spawn_blocking!("metadata_table_load", move || read_contents(&read_path)).await??;
        Ok(Self {
            writer: Some(spawn_writer(path)),
            current_user: current_user.into(),
            contents: Mutex::new(contents),
        })
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn components_for_user(&self, user: &str) -> Vec<String> {
        self.contents
            .lock()
            .users
            .get(user)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolves once every change made so far is on disk.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if writer.send(WriteRequest::Flush(done_tx)).is_ok() {
            // An error means the writer is gone, nothing is left to wait for.
            let _ = done_rx.await;
        }
    }

    /// Queues a snapshot for the writer. Called with the contents locked so
    /// snapshots reach the writer in the order the changes were made.
    fn persist(&self, contents: &MetadataContents) {
        let Some(writer) = &self.writer else {
            return;
        };
        if writer.send(WriteRequest::Write(contents.clone())).is_err() {
            event!(
                Level::ERROR,
                "Metadata table writer is gone, change is not persisted"
            );
        }
    }
}

fn read_contents(path: &Path) -> Result<MetadataContents, Error> {
    match std::fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .err_tip(|| format!("Could not parse metadata table {}", path.display())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(MetadataContents::default()),
        Err(err) => {
            Err(err).err_tip(|| format!("Could not read metadata table {}", path.display()))
        }
    }
}

fn write_atomically(path: &Path, contents: &MetadataContents) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(contents)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .err_tip(|| format!("Could not create {}", parent.display()))?;
    }
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, data)
        .err_tip(|| format!("Could not write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .err_tip(|| format!("Could not move {} into place", temp_path.display()))
}

impl MetadataTable for JsonMetadataTable {
    fn add_component_for_current_user(&self, name: &str) {
        let mut contents = self.contents.lock();
        let inserted = contents
            .users
            .entry(self.current_user.clone())
            .or_default()
            .insert(name.to_string());
        if inserted {
            self.persist(&contents);
        }
    }

    fn delete_component_for_current_user(&self, name: &str) {
        let mut contents = self.contents.lock();
        let Some(names) = contents.users.get_mut(&self.current_user) else {
            return;
        };
        if !names.remove(name) {
            return;
        }
        if names.is_empty() {
            contents.users.remove(&self.current_user);
        }
        self.persist(&contents);
    }

    fn has_component_for_any_user(&self, name: &str) -> bool {
        self.contents
            .lock()
            .users
            .values()
            .any(|names| names.contains(name))
    }
}

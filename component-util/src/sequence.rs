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

use tokio::sync::{mpsc, oneshot};
use tracing::{Level, event};

use crate::background_spawn;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs posted jobs one at a time, in the order they were posted, on a single
/// spawned task.
///
/// Posting never runs the job inline, so a caller can post a job while it is
/// still mutating its own state and the job will only observe that state
/// after the caller has returned. The draining task exits once every clone of
/// the sequence has been dropped.
#[derive(Debug, Clone)]
pub struct TaskSequence {
    name: &'static str,
    job_tx: mpsc::UnboundedSender<Job>,
}

impl TaskSequence {
    /// Must be called from within a tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        background_spawn!("task_sequence", async move {
            while let Some(job) = job_rx.recv().await {
                job();
            }
            event!(Level::TRACE, name, "Task sequence drained and closed");
        }, name);
        Self { name, job_tx }
    }

    /// Queues `job` behind everything posted before it.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.job_tx.send(Box::new(job)).is_err() {
            event!(
                Level::WARN,
                name = self.name,
                "Task sequence is gone, dropping posted job"
            );
        }
    }

    /// Resolves after every job posted before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.post(move || {
            // Failing to send just means the waiter went away.
            let _ = done_tx.send(());
        });
        // An error means the sequence shut down, nothing is left to wait for.
        let _ = done_rx.await;
    }
}

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

use component_util::metrics_utils::{Counter, DurationCounter};

use crate::cros_component_installer::LoadError;

/// Counters kept by the installer. Every result handed to a load callback is
/// counted here first.
#[derive(Debug, Default)]
pub struct InstallerMetrics {
    results: [Counter; LoadError::ALL.len()],
    /// Time spent in mount requests, including ones that failed.
    pub mount_time: DurationCounter,
}

impl InstallerMetrics {
    pub fn record_result(&self, error: LoadError) {
        self.results[error as usize].inc();
    }

    pub fn result_count(&self, error: LoadError) -> u64 {
        self.results[error as usize].get()
    }

    /// Number of results reported so far, successful or not.
    pub fn total_results(&self) -> u64 {
        self.results.iter().map(Counter::get).sum()
    }
}

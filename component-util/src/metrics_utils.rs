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

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Acquire);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Accumulates how many times an operation finished and how long it took in
/// total, which is enough to derive an average.
#[derive(Debug, Default)]
pub struct DurationCounter {
    pub count: Counter,
    pub total_micros: Counter,
}

impl DurationCounter {
    #[inline]
    pub fn record(&self, elapsed: Duration) {
        self.count.inc();
        self.total_micros
            .add(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn average(&self) -> Option<Duration> {
        let count = self.count.get();
        if count == 0 {
            return None;
        }
        Some(Duration::from_micros(self.total_micros.get() / count))
    }
}

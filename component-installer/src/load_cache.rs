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

use core::fmt;
use core::mem;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::cros_component_installer::LoadCallback;

/// Mount state of one component name.
///
/// While `success` is `None` a mount request is in flight and new callers
/// are appended to `callbacks`. Once the request resolves the entry keeps the
/// outcome so later callers are answered without mounting again.
#[derive(Default)]
pub struct LoadInfo {
    /// `None` while the mount is in flight.
    pub success: Option<bool>,
    /// Mount point, only meaningful when `success == Some(true)`.
    pub path: PathBuf,
    /// Callers waiting for the in-flight mount, in arrival order.
    pub callbacks: Vec<LoadCallback>,
    /// Identifies the mount request that owns this entry. A completion whose
    /// id does not match was invalidated and must not touch the entry.
    pub mount_id: u64,
    /// Install path the mount was issued for.
    pub install_path: PathBuf,
}

impl fmt::Debug for LoadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadInfo")
            .field("success", &self.success)
            .field("path", &self.path)
            .field("callbacks", &self.callbacks.len())
            .field("mount_id", &self.mount_id)
            .field("install_path", &self.install_path)
            .finish()
    }
}

impl LoadInfo {
    /// An entry for a mount that was just issued.
    pub fn pending(mount_id: u64, install_path: PathBuf, first_callback: LoadCallback) -> Self {
        Self {
            success: None,
            path: PathBuf::new(),
            callbacks: vec![first_callback],
            mount_id,
            install_path,
        }
    }

    pub const fn is_pending(&self) -> bool {
        self.success.is_none()
    }

    /// Stores the outcome and hands back every queued callback in FIFO
    /// order.
    pub fn resolve(&mut self, success: bool, path: PathBuf) -> Vec<LoadCallback> {
        self.success = Some(success);
        self.path = if success { path } else { PathBuf::new() };
        mem::take(&mut self.callbacks)
    }
}

/// Per-name load cache.
pub type LoadCache = HashMap<String, LoadInfo>;

/// What a new load request has to do given the current cache contents.
pub enum CacheLookup {
    /// The request joined an in-flight mount.
    Queued,
    /// The outcome is already known.
    Resolved {
        callback: LoadCallback,
        path: PathBuf,
        success: bool,
    },
    /// No entry exists, the caller must issue the mount.
    Miss(LoadCallback),
}

/// Queues `callback` behind an in-flight mount of `name`, or returns it with
/// the cached outcome, or hands it back when nothing is cached.
pub fn lookup(cache: &mut LoadCache, name: &str, callback: LoadCallback) -> CacheLookup {
    let Some(info) = cache.get_mut(name) else {
        return CacheLookup::Miss(callback);
    };
    match info.success {
        None => {
            info.callbacks.push(callback);
            CacheLookup::Queued
        }
        Some(success) => CacheLookup::Resolved {
            callback,
            path: info.path.clone(),
            success,
        },
    }
}

/// Removes the entry of `name` and returns the callbacks that were still
/// waiting on it.
pub fn invalidate(cache: &mut LoadCache, name: &str) -> Vec<LoadCallback> {
    cache
        .remove(name)
        .map(|info| info.callbacks)
        .unwrap_or_default()
}

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

pub mod id_util;
pub mod metrics_utils;
pub mod sequence;
pub mod task;
pub mod version;

use std::env;
use std::sync::OnceLock;

use component_error::{Code, Error, make_err};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

// Re-export tracing mostly for use in macros.
pub use tracing as __tracing;

/// Environment variable that selects the log format: `pretty` (default),
/// `compact` or `json`.
pub const LOG_FORMAT_ENV: &str = "COMPONENT_LOG";

/// Initialize tracing.
///
/// # Errors
///
/// Returns `Err` if logging was already initialized.
pub fn init_tracing() -> Result<(), Error> {
    static INITIALIZED: OnceLock<()> = OnceLock::new();

    if INITIALIZED.set(()).is_err() {
        return Err(make_err!(Code::Internal, "Logging already initialized"));
    }

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let log_format = env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "pretty".to_string());
    let builder = fmt()
        .with_timer(fmt::time::time())
        .with_env_filter(env_filter);
    // A subscriber may already be installed by a test harness, that is fine.
    let _ = match log_format.as_str() {
        "compact" => builder.compact().try_init(),
        "json" => builder.json().try_init(),
        _ => builder.pretty().try_init(),
    };
    Ok(())
}

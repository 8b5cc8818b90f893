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

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use component_config::component_manager::{ComponentManagerConfig, DEFAULT_METADATA_FILE};
use component_error::{Code, Error, ResultExt, make_err};
use component_installer::component_table::component_id;
use component_installer::cros_component_installer::{
    CrosComponentInstaller, MountPolicy, UpdatePolicy,
};
use component_installer::metadata_table::JsonMetadataTable;
use component_installer::mirror_update_service::MirrorUpdateService;
use component_installer::symlink_image_loader::SymlinkImageLoader;
use component_util::{init_tracing, spawn_blocking};
use tracing::{Instrument, Level, error_span, event};

/// Installs, mounts and unloads downloadable OS components.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Config file to use.
    #[clap(value_parser)]
    config_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the component if needed and mount it.
    Load {
        name: String,

        /// Only make sure a compatible version is installed.
        #[arg(long)]
        no_mount: bool,

        #[arg(long, value_enum, default_value_t = UpdateArg::Default)]
        update: UpdateArg,
    },
    /// Drop the current user's claim on a component.
    Unload { name: String },
    /// Show every known component and its install state.
    List,
    /// Register every installed component and report which are usable.
    RegisterInstalled,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum UpdateArg {
    /// Never update, use what is installed.
    Skip,
    /// Update only when nothing compatible is installed.
    Default,
    /// Always check for a newer version.
    Force,
}

impl From<UpdateArg> for UpdatePolicy {
    fn from(update: UpdateArg) -> Self {
        match update {
            UpdateArg::Skip => Self::Skip,
            UpdateArg::Default => Self::DontForce,
            UpdateArg::Force => Self::Force,
        }
    }
}

fn metadata_path(cfg: &ComponentManagerConfig) -> PathBuf {
    let metadata_file = cfg
        .metadata_file
        .as_deref()
        .unwrap_or(DEFAULT_METADATA_FILE);
    // Absolute paths replace the root when joined.
    Path::new(&cfg.installer.components_root).join(metadata_file)
}

/// The installer together with the filesystem collaborators it was built on.
struct ComponentManager {
    installer: Arc<CrosComponentInstaller>,
    update_service: Arc<MirrorUpdateService>,
    metadata_table: Arc<JsonMetadataTable>,
}

impl ComponentManager {
    async fn new(cfg: &ComponentManagerConfig) -> Result<Self, Error> {
        let components_root = PathBuf::from(&cfg.installer.components_root);
        let update_service = Arc::new(match &cfg.mirror_root {
            Some(mirror_root) => MirrorUpdateService::new(&components_root, mirror_root),
            None => MirrorUpdateService::without_mirror(&components_root),
        });
        let metadata_table = Arc::new(
            JsonMetadataTable::load(metadata_path(cfg), &cfg.current_user)
                .await
                .err_tip(|| "Could not open component metadata table")?,
        );
        let installer = CrosComponentInstaller::new(
            &cfg.installer,
            update_service.clone(),
            Arc::new(SymlinkImageLoader::new(&cfg.mount_root)),
            metadata_table.clone(),
        )?;
        Ok(Self {
            installer,
            update_service,
            metadata_table,
        })
    }

    /// Waits for the work the installer left running in the background.
    async fn settle(&self) {
        self.installer.flush_callbacks().await;
        self.update_service.wait_for_removals().await;
        self.metadata_table.flush().await;
    }
}

/// Probes install directories, so it runs on the blocking pool.
async fn print_components(installer: &Arc<CrosComponentInstaller>) -> Result<(), Error> {
    let installer = installer.clone();
    spawn_blocking!("print_components", move || {
        let mut stdout = io::stdout().lock();
        for config in installer.table() {
            let compatible_path = installer.get_compatible_path(&config.name);
            writeln!(
                stdout,
                "{}\t{}\t{:?}\tinstalled={}\tcompatible={}",
                config.name,
                component_id(config),
                config.policy,
                installer.is_registered_may_block(&config.name),
                if compatible_path.as_os_str().is_empty() {
                    "-".to_string()
                } else {
                    compatible_path.display().to_string()
                },
            )?;
        }
        Ok::<_, Error>(())
    })
    .await?
}

async fn run_command(manager: &ComponentManager, command: Command) -> Result<(), Error> {
    let installer = &manager.installer;
    match command {
        Command::Load {
            name,
            no_mount,
            update,
        } => {
            let mount_policy = if no_mount {
                MountPolicy::DontMount
            } else {
                MountPolicy::Mount
            };
            let (error, path) = installer
                .load_async(&name, mount_policy, update.into())
                .await;
            writeln!(io::stdout().lock(), "{error}\t{}", path.display())?;
            if !error.is_success() {
                return Err(make_err!(Code::Unavailable, "Loading {name} failed: {error}"));
            }
        }
        Command::Unload { name } => {
            // The update service only knows components registered by this
            // process.
            installer
                .register_installed()
                .await
                .err_tip(|| "Failed to register installed components")?;
            let unloaded = installer.unload(&name);
            writeln!(io::stdout().lock(), "{name}\tunloaded={unloaded}")?;
        }
        Command::List => print_components(installer).await?,
        Command::RegisterInstalled => {
            installer
                .register_installed()
                .await
                .err_tip(|| "Failed to register installed components")?;
            print_components(installer).await?;
        }
    }
    Ok(())
}

async fn inner_main(cfg: ComponentManagerConfig, command: Command) -> Result<(), Error> {
    let manager = ComponentManager::new(&cfg).await?;
    let result = run_command(&manager, command).await;
    manager.settle().await;
    event!(Level::DEBUG, ok = result.is_ok(), "Command finished");
    result
}

fn main() -> Result<(), Box<dyn core::error::Error>> {
    init_tracing()?;

    let args = Args::parse();
    let cfg = ComponentManagerConfig::try_from_json5_file(&args.config_file)?;

    #[expect(clippy::disallowed_methods, reason = "entry point of the binary")]
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime
            .block_on(inner_main(cfg, args.command).instrument(error_span!("main")))
            .err_tip(|| "main() function failed")?;
    }
    Ok(())
}

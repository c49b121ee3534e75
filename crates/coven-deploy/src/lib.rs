// ABOUTME: coven-deploy library with supervisor, worker, workload, and init modules.
// ABOUTME: Re-exports for programmatic use of the deployment supervisor.

pub mod init;
pub mod supervisor;
pub mod worker;
pub mod workloads;

pub use coven_deploy_core::Config;
pub use init::run_init;
pub use supervisor::{
    Launcher, LifecycleState, OsLauncher, Outcome, ProcessHandle, Registry, Settled, Supervisor,
};
pub use worker::{run_worker, ChannelStatus, DeploymentHandle, WorkerOptions};
pub use workloads::{Catalog, Workload, WorkloadContext};

use anyhow::Result;
use coven_deploy_core::ModuleCache;
use std::path::PathBuf;

/// Options for running the supervisor
pub struct SupervisorOptions {
    /// Path to configuration file
    pub config_path: Option<PathBuf>,
    /// Overrides the configured bootstrap module
    pub module: Option<String>,
    /// Overrides the configured bootstrap argument
    pub argument: Option<String>,
}

/// Run the supervisor until the bootstrap fails or every deployment has stopped
pub async fn run_supervisor(options: SupervisorOptions) -> Result<Outcome> {
    let mut config = Config::load_or_default(options.config_path.as_deref())?;
    if let Some(module) = options.module {
        config.bootstrap.module = module;
    }
    if let Some(argument) = options.argument {
        config.bootstrap.argument = argument;
    }

    let launcher = OsLauncher::from_config(&config)?;
    tracing::info!(
        executable = %launcher.executable().display(),
        module = %config.bootstrap.module,
        time_unit_ms = config.time_unit_ms,
        "Starting supervisor"
    );

    let registry = Registry::new(
        launcher,
        ModuleCache::new(config.modules_dir_expanded()),
        config.timing(),
    )
    .with_restart_timeout(config.default_timeout_units);

    let mut supervisor = Supervisor::new(registry, config.bootstrap.clone());
    Ok(supervisor.run().await)
}

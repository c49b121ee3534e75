// ABOUTME: Entry point of a worker process: channel on stdio, maintenance task, workload run.
// ABOUTME: A workload returning normally means "stop", after which the worker idles until torn down.

use super::handle::{ChannelStatus, DeploymentHandle};
use crate::workloads::{Catalog, WorkloadContext};
use anyhow::{Context, Result};
use coven_deploy_core::{Channel, ModuleDefinition, Timing};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// What the supervisor passes on the `worker` command line.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub id: String,
    pub module: String,
    pub argument: String,
    pub definition: ModuleDefinition,
    pub modules_dir: PathBuf,
    pub timing: Timing,
}

impl WorkerOptions {
    /// Decode the JSON definition handed over by the launcher.
    pub fn parse_definition(module: &str, json: Option<&str>) -> Result<ModuleDefinition> {
        match json {
            Some(json) => ModuleDefinition::from_json(json)
                .with_context(|| format!("Invalid definition for module '{}'", module)),
            None => Ok(ModuleDefinition::empty(module)),
        }
    }
}

/// Run one deployment over stdin/stdout. Only returns on a construction error.
pub async fn run_worker(options: WorkerOptions, catalog: &Catalog) -> Result<()> {
    let channel = Channel::spawn(
        tokio::io::stdin(),
        tokio::io::stdout(),
        CancellationToken::new(),
    );
    let handle = DeploymentHandle::new(options.id.clone(), channel);

    tokio::spawn(maintain(handle.clone(), options.timing));
    #[cfg(unix)]
    tokio::spawn(exit_on_terminate());

    let context = WorkloadContext {
        handle: handle.clone(),
        definition: options.definition,
        argument: options.argument,
        modules_dir: options.modules_dir,
        timing: options.timing,
    };
    let mut workload = catalog
        .build(&options.module, context)
        .with_context(|| format!("Failed to construct workload '{}'", options.module))?;

    tracing::info!(deployment = %options.id, module = %options.module, "Workload starting");
    if let Err(e) = workload.run().await {
        tracing::error!(deployment = %options.id, error = %e, "Workload failed");
    }

    match handle.stop() {
        Ok(Some(_)) => tracing::info!(deployment = %options.id, "Workload finished, stop requested"),
        Ok(None) => tracing::debug!(deployment = %options.id, "Workload already requested stop"),
        Err(e) => tracing::warn!(deployment = %options.id, error = %e, "Could not request stop"),
    }

    std::future::pending::<()>().await;
    Ok(())
}

/// Once per time unit: flush output and resolve replies. Exits the process
/// when the supervisor closes the control channel.
async fn maintain(handle: DeploymentHandle, timing: Timing) {
    let mut interval = tokio::time::interval(timing.unit());
    loop {
        interval.tick().await;
        let _ = std::io::stderr().flush();
        if handle.check_for_responses() == ChannelStatus::Closed {
            tracing::info!(deployment = %handle.id(), "Control channel closed, exiting");
            let _ = std::io::stderr().flush();
            std::process::exit(0);
        }
    }
}

#[cfg(unix)]
async fn exit_on_terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Could not install SIGTERM handler");
            return;
        }
    };
    sigterm.recv().await;
    tracing::info!("Received SIGTERM, exiting");
    std::process::exit(0);
}

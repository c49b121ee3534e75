// ABOUTME: Starts deployments as isolated worker processes and waits for readiness.
// ABOUTME: Workers re-execute this binary with the internal `worker` subcommand.

use super::process::{OsProcess, ProcessHandle};
use crate::workloads::Catalog;
use anyhow::{Context, Result};
use async_trait::async_trait;
use coven_deploy_core::{
    Channel, Config, Inbound, Kind, LaunchError, ModuleDefinition, Timing,
};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Everything a launcher needs to start one deployment.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub id: &'a str,
    pub module: &'a str,
    pub argument: &'a str,
    pub definition: &'a ModuleDefinition,
}

/// A freshly started worker and the supervisor's end of its channel.
pub struct Launched {
    pub process: Box<dyn ProcessHandle>,
    pub channel: Channel,
}

#[async_trait]
pub trait Launcher: Send {
    /// Start the worker. Errors here are launch failures; readiness is
    /// checked separately with [`await_ready`].
    async fn launch(&mut self, request: LaunchRequest<'_>) -> Result<Launched, LaunchError>;
}

/// Spawns workers as child processes talking JSON lines over stdin/stdout.
pub struct OsLauncher {
    executable: PathBuf,
    modules_dir: PathBuf,
    timing: Timing,
    catalog: Catalog,
}

impl OsLauncher {
    pub fn new(executable: PathBuf, modules_dir: PathBuf, timing: Timing) -> Self {
        Self {
            executable,
            modules_dir,
            timing,
            catalog: Catalog::builtin(),
        }
    }

    /// Use the configured worker executable, falling back to the running binary.
    pub fn from_config(config: &Config) -> Result<Self> {
        let executable = match config.worker_executable_expanded() {
            Some(path) => path,
            None => std::env::current_exe().context("Failed to locate the running executable")?,
        };
        Ok(Self::new(
            executable,
            config.modules_dir_expanded(),
            config.timing(),
        ))
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }
}

#[async_trait]
impl Launcher for OsLauncher {
    async fn launch(&mut self, request: LaunchRequest<'_>) -> Result<Launched, LaunchError> {
        if !self.catalog.contains(request.module) {
            return Err(LaunchError::UnknownModule(request.module.to_string()));
        }
        let definition = request.definition.to_json()?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg("worker")
            .arg("--id")
            .arg(request.id)
            .arg("--module")
            .arg(request.module)
            .arg("--argument")
            .arg(request.argument)
            .arg("--definition")
            .arg(definition)
            .arg("--modules-dir")
            .arg(&self.modules_dir)
            .arg("--unit-ms")
            .arg(self.timing.unit().as_millis().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        let stdin = child.stdin.take().ok_or(LaunchError::Stdio("stdin"))?;
        let stdout = child.stdout.take().ok_or(LaunchError::Stdio("stdout"))?;

        tracing::info!(
            deployment = %request.id,
            module = %request.module,
            pid = ?child.id(),
            "Spawned worker"
        );

        let control = CancellationToken::new();
        let channel = Channel::spawn(stdout, stdin, control.clone());
        Ok(Launched {
            process: Box::new(OsProcess::new(child, control)),
            channel,
        })
    }
}

/// Poll the channel once per time unit for up to `timeout_units` units.
/// Returns true on a "running" message carrying `id`; every other frame
/// received meanwhile is discarded.
pub async fn await_ready(
    channel: &mut Channel,
    id: &str,
    timeout_units: u32,
    timing: Timing,
) -> bool {
    for _ in 0..timeout_units {
        tokio::time::sleep(timing.unit()).await;
        loop {
            match channel.try_recv() {
                Ok(Some(Inbound::Message(message)))
                    if message.kind == Kind::Running && message.payload == id =>
                {
                    return true;
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
    false
}

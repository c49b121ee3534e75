// ABOUTME: In-memory launcher for integration tests: real workloads over in-process channels.
// ABOUTME: Records every launch and every teardown step with the (paused) tokio clock.

#![allow(dead_code)]

use async_trait::async_trait;
use coven_deploy::supervisor::{LaunchRequest, Launched, Launcher, ProcessHandle};
use coven_deploy::workloads::stall;
use coven_deploy::{Catalog, ChannelStatus, DeploymentHandle, Workload, WorkloadContext};
use coven_deploy_core::{Channel, LaunchError, ModuleCache, Timing};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub id: String,
    pub module: String,
    pub argument: String,
    pub revision: u64,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub action: &'static str,
    pub at: Instant,
}

/// Signals running, then waits for the test to drive it through its handle.
struct Idle {
    context: WorkloadContext,
}

#[async_trait]
impl Workload for Idle {
    async fn run(&mut self) -> anyhow::Result<()> {
        self.context.handle.signal_running()?;
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn build_idle(context: WorkloadContext) -> anyhow::Result<Box<dyn Workload>> {
    Ok(Box::new(Idle { context }))
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::builtin();
    catalog.register("idle", build_idle);
    catalog.register("slow", stall::build);
    catalog
}

#[derive(Default)]
struct Shared {
    launches: Vec<Launch>,
    journal: Vec<Step>,
    handles: HashMap<String, DeploymentHandle>,
    refusing: bool,
}

pub struct FakeLauncher {
    catalog: Catalog,
    modules_dir: PathBuf,
    timing: Timing,
    shared: Arc<Mutex<Shared>>,
}

impl FakeLauncher {
    pub fn new(modules_dir: PathBuf) -> Self {
        Self {
            catalog: catalog(),
            modules_dir,
            timing: Timing::default(),
            shared: Arc::default(),
        }
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.shared.lock().unwrap().launches.clone()
    }

    pub fn journal(&self) -> Vec<Step> {
        self.shared.lock().unwrap().journal.clone()
    }

    pub fn steps_for(&self, id: &str) -> Vec<&'static str> {
        self.journal()
            .into_iter()
            .filter(|step| step.id == id)
            .map(|step| step.action)
            .collect()
    }

    /// Fail every later launch as if the worker binary could not be spawned.
    pub fn refuse_launches(&self) {
        self.shared.lock().unwrap().refusing = true;
    }

    /// The worker-side handle of the most recent launch under `id`.
    pub fn worker(&self, id: &str) -> DeploymentHandle {
        self.shared.lock().unwrap().handles[id].clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&mut self, request: LaunchRequest<'_>) -> Result<Launched, LaunchError> {
        if self.shared.lock().unwrap().refusing {
            return Err(LaunchError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "worker binary missing",
            )));
        }
        let (supervisor_end, worker_end) = Channel::pair();
        let handle = DeploymentHandle::new(request.id, worker_end);
        let context = WorkloadContext {
            handle: handle.clone(),
            definition: request.definition.clone(),
            argument: request.argument.to_string(),
            modules_dir: self.modules_dir.clone(),
            timing: self.timing,
        };
        let mut workload = self
            .catalog
            .build(request.module, context)
            .map_err(|_| LaunchError::UnknownModule(request.module.to_string()))?;

        {
            let mut shared = self.shared.lock().unwrap();
            shared.launches.push(Launch {
                id: request.id.to_string(),
                module: request.module.to_string(),
                argument: request.argument.to_string(),
                revision: request.definition.revision,
            });
            shared.handles.insert(request.id.to_string(), handle.clone());
        }

        let unit = self.timing.unit();
        let worker = handle.clone();
        let task = tokio::spawn(async move {
            let drainer = worker.clone();
            let maintenance = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(unit).await;
                    if drainer.check_for_responses() == ChannelStatus::Closed {
                        break;
                    }
                }
            });
            let _ = workload.run().await;
            let _ = worker.stop();
            let _ = maintenance.await;
        });

        Ok(Launched {
            process: Box::new(FakeProcess {
                id: request.id.to_string(),
                task,
                shared: self.shared.clone(),
            }),
            channel: supervisor_end,
        })
    }
}

struct FakeProcess {
    id: String,
    task: JoinHandle<()>,
    shared: Arc<Mutex<Shared>>,
}

impl FakeProcess {
    fn record(&self, action: &'static str) {
        self.shared.lock().unwrap().journal.push(Step {
            id: self.id.clone(),
            action,
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn terminate(&mut self) {
        self.record("terminate");
    }

    fn kill(&mut self) {
        self.task.abort();
        self.record("kill");
    }

    async fn release(self: Box<Self>) {
        self.record("release");
    }
}

pub fn modules() -> (tempfile::TempDir, ModuleCache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = ModuleCache::new(dir.path());
    (dir, cache)
}

pub fn write_definition(dir: &std::path::Path, module: &str, body: &str) {
    std::fs::write(dir.join(format!("{module}.toml")), body).unwrap();
}

/// Let in-process channel traffic settle under the paused clock.
pub async fn settle() {
    tokio::time::sleep(Timing::default().unit()).await;
}

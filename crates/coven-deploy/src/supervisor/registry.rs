// ABOUTME: Authoritative store of deployments: ids, lifecycle, owned process and channel.
// ABOUTME: Implements deploy and stop as begin/wait/complete phases, plus the queued update/restart flags.

use super::launcher::{await_ready, LaunchRequest, Launched, Launcher};
use super::process::{terminate_escalating, ProcessHandle};
use coven_deploy_core::{
    Channel, DeploymentId, LaunchError, ModuleCache, Timing, TokenError, TokenGenerator,
};
use std::collections::{BTreeMap, HashMap};

/// Readiness timeout used by restart-after-stop unless configured otherwise.
pub const DEFAULT_RESTART_TIMEOUT_UNITS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Active,
}

/// An Active deployment. Owns its process and channel until teardown.
pub struct DeploymentRecord {
    id: DeploymentId,
    module: String,
    argument: String,
    process: Box<dyn ProcessHandle>,
    channel: Channel,
    pending_update: bool,
    pending_restart: bool,
}

impl DeploymentRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn argument(&self) -> &str {
        &self.argument
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn pending_update(&self) -> bool {
        self.pending_update
    }

    pub fn pending_restart(&self) -> bool {
        self.pending_restart
    }
}

/// A launched worker whose id is held in Starting until [`Registry::complete_deploy`].
pub struct PendingDeploy {
    id: DeploymentId,
    module: String,
    argument: String,
    timeout_units: u32,
    launched: Launched,
}

impl PendingDeploy {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait up to the timeout for the worker to signal running. A worker that
    /// never does is torn down before this returns.
    pub async fn wait_ready(self, timing: Timing) -> Readiness {
        let Self {
            id,
            module,
            argument,
            timeout_units,
            launched: Launched {
                process,
                mut channel,
            },
        } = self;

        let outcome = if await_ready(&mut channel, &id, timeout_units, timing).await {
            Ok(Launched { process, channel })
        } else {
            tracing::warn!(deployment = %id, timeout_units, "Worker never signalled running");
            terminate_escalating(process, timing).await;
            Err(LaunchError::Timeout { timeout_units })
        };

        Readiness {
            id,
            module,
            argument,
            outcome,
        }
    }
}

/// Result of [`PendingDeploy::wait_ready`], applied with [`Registry::complete_deploy`].
pub struct Readiness {
    id: DeploymentId,
    module: String,
    argument: String,
    outcome: Result<Launched, LaunchError>,
}

impl Readiness {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_ready(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A record already removed from the registry, waiting to be escalated.
pub struct Teardown {
    record: DeploymentRecord,
}

impl Teardown {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn module(&self) -> &str {
        &self.record.module
    }

    pub fn restart_queued(&self) -> bool {
        self.record.pending_restart
    }

    pub fn update_queued(&self) -> bool {
        self.record.pending_update
    }

    /// Run the escalating teardown, then drop the channel.
    pub async fn escalate(self, timing: Timing) -> Stopped {
        let DeploymentRecord {
            id,
            module,
            argument,
            process,
            channel,
            pending_update,
            pending_restart,
        } = self.record;

        terminate_escalating(process, timing).await;
        drop(channel);
        tracing::info!(deployment = %id, module = %module, "Deployment stopped");

        Stopped {
            id,
            module,
            argument,
            pending_update,
            pending_restart,
        }
    }
}

/// A torn-down deployment whose queued flags are applied by [`Registry::settle_stop`].
#[derive(Debug)]
pub struct Stopped {
    id: DeploymentId,
    module: String,
    argument: String,
    pending_update: bool,
    pending_restart: bool,
}

impl Stopped {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn restart_queued(&self) -> bool {
        self.pending_restart
    }
}

pub struct Registry<L> {
    launcher: L,
    modules: ModuleCache,
    timing: Timing,
    tokens: TokenGenerator,
    restart_timeout_units: u32,
    starting: HashMap<DeploymentId, String>,
    active: HashMap<DeploymentId, DeploymentRecord>,
}

impl<L: Launcher> Registry<L> {
    pub fn new(launcher: L, modules: ModuleCache, timing: Timing) -> Self {
        Self {
            launcher,
            modules,
            timing,
            tokens: TokenGenerator::deployment_ids(),
            restart_timeout_units: DEFAULT_RESTART_TIMEOUT_UNITS,
            starting: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub fn with_tokens(mut self, tokens: TokenGenerator) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_restart_timeout(mut self, timeout_units: u32) -> Self {
        self.restart_timeout_units = timeout_units;
        self
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn modules(&self) -> &ModuleCache {
        &self.modules
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Launch `module` and wait up to `timeout_units` for it to signal running.
    ///
    /// Returns the deployment id once it is Active. Any failure tears down
    /// whatever was started, frees the id and returns `None`.
    pub async fn deploy(
        &mut self,
        module: &str,
        argument: &str,
        timeout_units: u32,
        id: Option<&str>,
    ) -> Option<DeploymentId> {
        let pending = self
            .begin_deploy(module, argument, timeout_units, id)
            .await?;
        let readiness = pending.wait_ready(self.timing).await;
        self.complete_deploy(readiness)
    }

    /// Reserve an id in Starting and launch the worker. The readiness wait
    /// runs on the returned [`PendingDeploy`] without borrowing the registry.
    pub async fn begin_deploy(
        &mut self,
        module: &str,
        argument: &str,
        timeout_units: u32,
        id: Option<&str>,
    ) -> Option<PendingDeploy> {
        let id = match self.allocate_id(id) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(module = %module, error = %e, "Could not allocate a deployment id");
                return None;
            }
        };

        self.starting.insert(id.clone(), module.to_string());
        tracing::info!(deployment = %id, module = %module, "Starting deployment");

        match self.launch(&id, module, argument).await {
            Ok(launched) => Some(PendingDeploy {
                id,
                module: module.to_string(),
                argument: argument.to_string(),
                timeout_units,
                launched,
            }),
            Err(e) => {
                self.starting.remove(&id);
                tracing::error!(deployment = %id, module = %module, error = %e, "Deployment failed");
                None
            }
        }
    }

    /// Move a waited-on deployment out of Starting: into Active when ready,
    /// otherwise freeing its id.
    pub fn complete_deploy(&mut self, readiness: Readiness) -> Option<DeploymentId> {
        let Readiness {
            id,
            module,
            argument,
            outcome,
        } = readiness;
        self.starting.remove(&id);

        match outcome {
            Ok(Launched { process, channel }) => {
                tracing::info!(
                    deployment = %id,
                    module = %module,
                    pid = ?process.pid(),
                    "Deployment active"
                );
                self.active.insert(
                    id.clone(),
                    DeploymentRecord {
                        id: id.clone(),
                        module,
                        argument,
                        process,
                        channel,
                        pending_update: false,
                        pending_restart: false,
                    },
                );
                Some(id)
            }
            Err(e) => {
                tracing::error!(deployment = %id, module = %module, error = %e, "Deployment failed");
                None
            }
        }
    }

    async fn launch(
        &mut self,
        id: &str,
        module: &str,
        argument: &str,
    ) -> Result<Launched, LaunchError> {
        let definition = self.modules.resolve(module)?.clone();
        self.launcher
            .launch(LaunchRequest {
                id,
                module,
                argument,
                definition: &definition,
            })
            .await
    }

    fn allocate_id(&self, supplied: Option<&str>) -> Result<DeploymentId, TokenError> {
        if let Some(id) = supplied {
            if !self.is_taken(id) {
                return Ok(id.to_string());
            }
            tracing::warn!(deployment = %id, "Requested id is in use, generating a new one");
        }
        self.tokens.generate_unique(|candidate| self.is_taken(candidate))
    }

    fn is_taken(&self, id: &str) -> bool {
        self.starting.contains_key(id) || self.active.contains_key(id)
    }

    /// Tear down `id`, then apply its queued update and restart. Unknown ids are ignored.
    pub async fn stop(&mut self, id: &str) {
        match self.begin_stop(id) {
            Some(teardown) => self.finish_stop(teardown).await,
            None => tracing::debug!(deployment = %id, "Stop requested for unknown deployment"),
        }
    }

    /// Remove `id` from Active. Nothing routes to it after this returns.
    pub fn begin_stop(&mut self, id: &str) -> Option<Teardown> {
        self.active.remove(id).map(|record| Teardown { record })
    }

    /// Escalate `teardown` and apply its queued flags, waiting out any restart inline.
    pub async fn finish_stop(&mut self, teardown: Teardown) {
        let stopped = teardown.escalate(self.timing).await;
        if let Some(pending) = self.settle_stop(stopped).await {
            let readiness = pending.wait_ready(self.timing).await;
            self.complete_deploy(readiness);
        }
    }

    /// Refresh the module if an update was queued, then launch the queued
    /// restart under the same id. Returns the restart awaiting readiness.
    pub async fn settle_stop(&mut self, stopped: Stopped) -> Option<PendingDeploy> {
        let Stopped {
            id,
            module,
            argument,
            pending_update,
            pending_restart,
        } = stopped;

        if pending_update {
            match self.modules.refresh(&module) {
                Ok(definition) => tracing::info!(
                    module = %module,
                    revision = definition.revision,
                    "Module definition refreshed"
                ),
                Err(e) => tracing::warn!(module = %module, error = %e, "Module refresh failed"),
            }
        }

        if !pending_restart {
            return None;
        }
        tracing::info!(deployment = %id, module = %module, "Restarting deployment");
        let timeout_units = self.restart_timeout_units;
        self.begin_deploy(&module, &argument, timeout_units, Some(&id))
            .await
    }

    /// Refresh the module definition after the next stop. Returns false for unknown ids.
    pub fn queue_full_update(&mut self, id: &str) -> bool {
        match self.active.get_mut(id) {
            Some(record) => {
                record.pending_update = true;
                true
            }
            None => false,
        }
    }

    /// Redeploy under the same id after the next stop. Returns false for unknown ids.
    pub fn queue_restart(&mut self, id: &str) -> bool {
        match self.active.get_mut(id) {
            Some(record) => {
                record.pending_restart = true;
                true
            }
            None => false,
        }
    }

    pub fn state_of(&self, id: &str) -> Option<LifecycleState> {
        if self.active.contains_key(id) {
            Some(LifecycleState::Active)
        } else if self.starting.contains_key(id) {
            Some(LifecycleState::Starting)
        } else {
            None
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Active ids, sorted.
    pub fn active_ids(&self) -> Vec<DeploymentId> {
        let mut ids: Vec<_> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn record(&self, id: &str) -> Option<&DeploymentRecord> {
        self.active.get(id)
    }

    /// Module name of every Starting and Active deployment.
    pub fn listing(&self) -> BTreeMap<DeploymentId, String> {
        self.starting
            .iter()
            .map(|(id, module)| (id.clone(), module.clone()))
            .chain(
                self.active
                    .iter()
                    .map(|(id, record)| (id.clone(), record.module.clone())),
            )
            .collect()
    }

    /// Nothing Starting and nothing Active.
    pub fn is_quiescent(&self) -> bool {
        self.starting.is_empty() && self.active.is_empty()
    }

    pub(crate) fn channel_mut(&mut self, id: &str) -> Option<&mut Channel> {
        self.active.get_mut(id).map(|record| &mut record.channel)
    }
}

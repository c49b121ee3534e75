// ABOUTME: The supervisor loop: bootstrap one deployment, then poll and dispatch every tick.
// ABOUTME: Teardowns and restarts run in the background; exits once nothing is left running.

use super::launcher::Launcher;
use super::registry::{Readiness, Registry, Stopped};
use anyhow::{Context, Result};
use coven_deploy_core::{
    BootstrapConfig, ChannelError, ControlMessage, DeploymentId, Inbound, Kind,
    MANAGER_AUTHORITY, TICK_UNITS,
};
use std::collections::VecDeque;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

/// How the supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The first deployment never became ready.
    BootstrapFailed,
    /// Every deployment stopped.
    Quiesced,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::BootstrapFailed => 1,
            Outcome::Quiesced => 0,
        }
    }
}

/// A background teardown or restart that has been applied to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// Torn down with nothing to restart.
    Stopped(DeploymentId),
    /// Torn down and relaunched; waiting for readiness under the same id.
    Restarting(DeploymentId),
    /// The relaunched worker signalled running and is Active again.
    Restarted(DeploymentId),
    /// The relaunch failed or timed out and the id was freed.
    RestartFailed(DeploymentId),
}

impl Settled {
    /// Whether this left the id with no deployment behind it.
    pub fn is_final(&self) -> bool {
        matches!(self, Settled::Stopped(_) | Settled::RestartFailed(_))
    }
}

enum Background {
    Stopped(Stopped),
    Ready(Readiness),
}

pub struct Supervisor<L> {
    registry: Registry<L>,
    bootstrap: BootstrapConfig,
    stop_queue: VecDeque<DeploymentId>,
    background: JoinSet<Background>,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(registry: Registry<L>, bootstrap: BootstrapConfig) -> Self {
        Self {
            registry,
            bootstrap,
            stop_queue: VecDeque::new(),
            background: JoinSet::new(),
        }
    }

    pub fn registry(&self) -> &Registry<L> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<L> {
        &mut self.registry
    }

    /// Stop requests not yet torn down.
    pub fn queued_stops(&self) -> usize {
        self.stop_queue.len()
    }

    /// Teardowns and restart readiness waits still running.
    pub fn in_flight(&self) -> usize {
        self.background.len()
    }

    /// No deployment is Starting or Active and no teardown or restart is outstanding.
    pub fn is_quiescent(&self) -> bool {
        self.registry.is_quiescent() && self.stop_queue.is_empty() && self.background.is_empty()
    }

    pub async fn run(&mut self) -> Outcome {
        let BootstrapConfig {
            module,
            argument,
            timeout_units,
        } = self.bootstrap.clone();

        match self
            .registry
            .deploy(&module, &argument, timeout_units, None)
            .await
        {
            Some(id) => tracing::info!(deployment = %id, module = %module, "Bootstrap deployment ready"),
            None => {
                tracing::error!(module = %module, timeout_units, "Bootstrap deployment failed");
                return Outcome::BootstrapFailed;
            }
        }

        let mut ticks = tokio::time::interval(self.registry.timing().units(TICK_UNITS));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticks.tick().await;

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    self.tick();
                }
                Some(joined) = self.background.join_next() => {
                    let settled = self.apply(joined).await;
                    if settled.is_some_and(|s| s.is_final()) && self.is_quiescent() {
                        tracing::info!("No deployments left, supervisor exiting");
                        return Outcome::Quiesced;
                    }
                }
            }
        }
    }

    /// Scan every Active channel, then start tearing down at most one
    /// deployment in the background. Returns the id whose teardown started.
    pub fn tick(&mut self) -> Option<DeploymentId> {
        self.scan();

        let id = self.stop_queue.pop_front()?;
        let teardown = self.registry.begin_stop(&id)?;
        tracing::info!(
            deployment = %id,
            module = %teardown.module(),
            restart = teardown.restart_queued(),
            "Deployment ended"
        );
        let timing = self.registry.timing();
        self.background
            .spawn(async move { Background::Stopped(teardown.escalate(timing).await) });
        Some(id)
    }

    /// Wait for the next background teardown or readiness wait and apply it.
    /// Returns `None` when nothing is in flight.
    pub async fn settle_next(&mut self) -> Option<Settled> {
        let joined = self.background.join_next().await?;
        self.apply(joined).await
    }

    async fn apply(&mut self, joined: Result<Background, JoinError>) -> Option<Settled> {
        let background = match joined {
            Ok(background) => background,
            Err(e) => {
                tracing::error!(error = %e, "Background teardown task failed");
                return None;
            }
        };

        let settled = match background {
            Background::Stopped(stopped) => {
                let id = stopped.id().to_string();
                let restart = stopped.restart_queued();
                match self.registry.settle_stop(stopped).await {
                    Some(pending) => {
                        let timing = self.registry.timing();
                        self.background.spawn(async move {
                            Background::Ready(pending.wait_ready(timing).await)
                        });
                        Settled::Restarting(id)
                    }
                    None if restart => {
                        tracing::error!(deployment = %id, "Restart failed");
                        Settled::RestartFailed(id)
                    }
                    None => Settled::Stopped(id),
                }
            }
            Background::Ready(readiness) => {
                let id = readiness.id().to_string();
                match self.registry.complete_deploy(readiness) {
                    Some(id) => Settled::Restarted(id),
                    None => {
                        tracing::error!(deployment = %id, "Restart failed");
                        Settled::RestartFailed(id)
                    }
                }
            }
        };
        Some(settled)
    }

    fn scan(&mut self) {
        for id in self.registry.active_ids() {
            loop {
                let Some(channel) = self.registry.channel_mut(&id) else {
                    break;
                };
                match channel.try_recv() {
                    Ok(Some(Inbound::Message(message))) => {
                        let kind = message.kind;
                        if let Err(e) = self.dispatch(&id, message) {
                            tracing::warn!(deployment = %id, %kind, error = %e, "Dispatch failed");
                        }
                    }
                    Ok(Some(Inbound::Malformed(e))) => {
                        tracing::debug!(deployment = %id, error = %e, "Dropping malformed frame");
                    }
                    Ok(None) => break,
                    Err(ChannelError::Closed) => {
                        tracing::trace!(deployment = %id, "Control channel closed");
                        break;
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, id: &str, message: ControlMessage) -> Result<()> {
        let payload = match message.kind {
            Kind::Stop => {
                if !self.stop_queue.iter().any(|queued| queued == id) {
                    self.stop_queue.push_back(id.to_string());
                }
                String::new()
            }
            Kind::Update => {
                self.registry.queue_full_update(id);
                String::new()
            }
            Kind::Restart => {
                self.registry.queue_restart(id);
                String::new()
            }
            Kind::Log => {
                tracing::info!(
                    deployment = %id,
                    authority = %message.authority,
                    "{}",
                    message.payload
                );
                String::new()
            }
            Kind::List => serde_json::to_string(&self.registry.listing())
                .context("Failed to encode deployment listing")?,
            // Workers drop ok replies that match no request, so acking these cannot loop.
            Kind::Running | Kind::Ok => String::new(),
        };

        let reply = message.reply(MANAGER_AUTHORITY, payload);
        self.registry
            .channel_mut(id)
            .context("Deployment left the registry during dispatch")?
            .send(reply)
            .with_context(|| format!("Failed to acknowledge {}", message.kind))?;
        Ok(())
    }
}

// ABOUTME: The ticker workload: logs heartbeats on a schedule read from its module definition.
// ABOUTME: Reloading "schedule" rebuilds the schedule from disk and carries the beat count over.

use super::{Workload, WorkloadContext};
use anyhow::Result;
use async_trait::async_trait;
use coven_deploy_core::ModuleDefinition;

const DEFAULT_BEATS: u64 = 3;

/// Heartbeat settings, rebuilt from scratch on every reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub beats: u64,
    pub interval_units: u32,
    pub reload_every: u64,
    pub queue_update: bool,
    pub queue_restart: bool,
    pub revision: u64,
}

impl Schedule {
    /// A numeric argument overrides the configured beat count.
    pub fn from_definition(definition: &ModuleDefinition, argument: &str) -> Self {
        let beats = argument
            .trim()
            .parse()
            .ok()
            .or_else(|| definition.setting_u64("beats"))
            .unwrap_or(DEFAULT_BEATS);
        let interval_units = definition
            .setting_u64("interval_units")
            .map_or(1, |units| u32::try_from(units).unwrap_or(u32::MAX));
        Self {
            beats,
            interval_units,
            reload_every: definition.setting_u64("reload_every").unwrap_or(0),
            queue_update: definition.setting_bool("queue_update").unwrap_or(false),
            queue_restart: definition.setting_bool("queue_restart").unwrap_or(false),
            revision: definition.revision,
        }
    }
}

pub struct Ticker {
    context: WorkloadContext,
    schedule: Schedule,
    beat: u64,
}

pub fn build(context: WorkloadContext) -> Result<Box<dyn Workload>> {
    Ok(Box::new(Ticker::new(context)))
}

impl Ticker {
    pub fn new(context: WorkloadContext) -> Self {
        let schedule = Schedule::from_definition(&context.definition, &context.argument);
        Self {
            context,
            schedule,
            beat: 0,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn beat(&self) -> u64 {
        self.beat
    }

    /// Only the supervisor bumps revisions, so the one this worker was launched with is kept.
    fn reload_schedule(&mut self) -> Result<()> {
        let mut definition = self.context.load_definition()?;
        definition.revision = self.context.definition.revision;
        let schedule = Schedule::from_definition(&definition, &self.context.argument);
        let beat = self.beat;
        let mut context = self.context.clone();
        context.definition = definition;
        *self = Ticker {
            context,
            schedule,
            beat,
        };
        Ok(())
    }
}

#[async_trait]
impl Workload for Ticker {
    async fn run(&mut self) -> Result<()> {
        let handle = self.context.handle.clone();
        handle.signal_running()?;

        while self.beat < self.schedule.beats {
            tokio::time::sleep(self.context.timing.units(self.schedule.interval_units)).await;
            self.beat += 1;
            handle.log(&format!(
                "beat {}/{} {}",
                self.beat, self.schedule.beats, self.context.argument
            ))?;

            let every = self.schedule.reload_every;
            if every > 0 && self.beat % every == 0 && !handle.reload(self, "schedule")? {
                tracing::warn!("Schedule reload failed, keeping the current schedule");
            }
        }

        if self.schedule.queue_update {
            handle.queue_full_update()?;
        }
        if self.schedule.queue_restart {
            handle.queue_restart()?;
        }
        Ok(())
    }

    fn reload(&mut self, target: &str) -> bool {
        match target {
            "schedule" | "all" => match self.reload_schedule() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to reload ticker schedule");
                    false
                }
            },
            _ => false,
        }
    }
}

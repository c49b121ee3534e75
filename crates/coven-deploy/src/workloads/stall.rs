// ABOUTME: The stall workload never signals running.
// ABOUTME: Used to exercise readiness timeouts and escalating termination.

use super::{Workload, WorkloadContext};
use anyhow::Result;
use async_trait::async_trait;

pub struct Stall {
    context: WorkloadContext,
}

pub fn build(context: WorkloadContext) -> Result<Box<dyn Workload>> {
    Ok(Box::new(Stall { context }))
}

#[async_trait]
impl Workload for Stall {
    async fn run(&mut self) -> Result<()> {
        tracing::info!(deployment = %self.context.handle.id(), "Stalling without signalling running");
        std::future::pending::<()>().await;
        Ok(())
    }
}

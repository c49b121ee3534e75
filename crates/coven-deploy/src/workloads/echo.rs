// ABOUTME: The echo workload: signals running, logs its argument, and returns.
// ABOUTME: Optionally asks the supervisor for its listing and lingers before stopping.

use super::{Workload, WorkloadContext};
use anyhow::Result;
use async_trait::async_trait;

pub struct Echo {
    context: WorkloadContext,
    list: bool,
    linger_units: u32,
}

pub fn build(context: WorkloadContext) -> Result<Box<dyn Workload>> {
    let list = context.definition.setting_bool("list").unwrap_or(false);
    let linger_units = context
        .definition
        .setting_u64("linger_units")
        .map_or(0, |units| u32::try_from(units).unwrap_or(u32::MAX));
    Ok(Box::new(Echo {
        context,
        list,
        linger_units,
    }))
}

#[async_trait]
impl Workload for Echo {
    async fn run(&mut self) -> Result<()> {
        let handle = &self.context.handle;
        handle.signal_running()?;
        handle.log(&format!("echo: {}", self.context.argument))?;

        if self.list {
            match handle.list()?.wait().await {
                Ok(reply) => {
                    handle.log(&format!("deployments: {}", reply.payload))?;
                }
                Err(e) => tracing::warn!(error = %e, "Listing request went unanswered"),
            }
        }

        if self.linger_units > 0 {
            tokio::time::sleep(self.context.timing.units(self.linger_units)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workloads::testing::{context, spawn_acker, spawn_drainer};
    use coven_deploy_core::Kind;

    #[tokio::test]
    async fn test_echo_signals_then_logs_argument() {
        let (context, supervisor) = context("echo", "hello");
        let handle = context.handle.clone();
        let acker = spawn_acker(supervisor);

        let mut workload = build(context).unwrap();
        workload.run().await.unwrap();
        drop(workload);
        drop(handle);

        let seen = acker.await.unwrap();
        let kinds: Vec<_> = seen.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![Kind::Running, Kind::Log]);
        assert_eq!(seen[0].payload, "worker-under-test");
        assert_eq!(seen[1].payload, "echo: hello");
    }

    #[tokio::test]
    async fn test_echo_lists_deployments_when_asked() {
        let (mut context, supervisor) = context("echo", "hello");
        context
            .definition
            .settings
            .insert("list".to_string(), serde_json::json!(true));
        let handle = context.handle.clone();
        let acker = spawn_acker(supervisor);
        let drainer = spawn_drainer(handle.clone());

        let mut workload = build(context).unwrap();
        workload.run().await.unwrap();
        drop(workload);
        drainer.abort();
        let _ = drainer.await;
        drop(handle);

        let seen = acker.await.unwrap();
        let kinds: Vec<_> = seen.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![Kind::Running, Kind::Log, Kind::List, Kind::Log]);
        assert_eq!(seen[3].payload, r#"deployments: {"worker-under-test":"echo"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_lingers() {
        let (mut context, supervisor) = context("echo", "");
        context
            .definition
            .settings
            .insert("linger_units".to_string(), serde_json::json!(2));
        let _acker = spawn_acker(supervisor);

        let start = tokio::time::Instant::now();
        build(context).unwrap().run().await.unwrap();
        assert!(tokio::time::Instant::now() - start >= std::time::Duration::from_secs(2));
    }
}

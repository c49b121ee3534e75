// ABOUTME: Owned handles to worker processes and the escalating teardown sequence.
// ABOUTME: Graceful terminate, wait, forceful kill, wait, then release.

use async_trait::async_trait;
use coven_deploy_core::{Timing, KILL_GRACE_UNITS, TERMINATE_GRACE_UNITS};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// A running worker, exclusively owned by its deployment record.
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Ask the worker to shut down on its own.
    fn terminate(&mut self);

    /// Forcefully kill the worker.
    fn kill(&mut self);

    /// Reap the process. Consumes the handle so it cannot be used again.
    async fn release(self: Box<Self>);
}

/// A worker spawned as an OS child process.
pub struct OsProcess {
    child: Child,
    control: CancellationToken,
}

impl OsProcess {
    /// `control` closes the worker's control input; workers exit when it reaches EOF.
    pub fn new(child: Child, control: CancellationToken) -> Self {
        Self { child, control }
    }
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) {
        tracing::debug!(pid = ?self.child.id(), "Closing worker control input");
        self.control.cancel();
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Worker already exited before kill");
        }
    }

    async fn release(mut self: Box<Self>) {
        match self.child.try_wait() {
            Ok(Some(status)) => tracing::debug!(%status, "Worker reaped"),
            Ok(None) => tracing::warn!(pid = ?self.child.id(), "Worker still running after kill"),
            Err(e) => tracing::warn!(error = %e, "Failed to reap worker"),
        }
    }
}

/// Terminate, wait 3 units, kill, wait 1 unit, release. Every step runs even
/// if the process has already exited.
pub async fn terminate_escalating(mut process: Box<dyn ProcessHandle>, timing: Timing) {
    let pid = process.pid();
    tracing::debug!(?pid, "Terminating worker");

    process.terminate();
    tokio::time::sleep(timing.units(TERMINATE_GRACE_UNITS)).await;

    process.kill();
    tokio::time::sleep(timing.units(KILL_GRACE_UNITS)).await;

    process.release().await;
    tracing::debug!(?pid, "Worker released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    type Steps = Arc<Mutex<Vec<(&'static str, Instant)>>>;

    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    struct Recording {
        steps: Steps,
    }

    impl Recording {
        fn record(&self, step: &'static str) {
            self.steps.lock().unwrap().push((step, Instant::now()));
        }
    }

    #[async_trait]
    impl ProcessHandle for Recording {
        fn pid(&self) -> Option<u32> {
            None
        }

        fn terminate(&mut self) {
            self.record("terminate");
        }

        fn kill(&mut self) {
            self.record("kill");
        }

        async fn release(self: Box<Self>) {
            self.record("release");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_order_and_waits() {
        let steps: Steps = Arc::default();
        let start = Instant::now();

        terminate_escalating(
            Box::new(Recording {
                steps: steps.clone(),
            }),
            Timing::default(),
        )
        .await;

        let steps = steps.lock().unwrap().clone();
        let names: Vec<_> = steps.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["terminate", "kill", "release"]);
        assert_near(steps[0].1 - start, Duration::ZERO);
        assert_near(steps[1].1 - start, Duration::from_secs(3));
        assert_near(steps[2].1 - start, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_scales_with_time_unit() {
        let steps: Steps = Arc::default();
        let start = Instant::now();

        terminate_escalating(
            Box::new(Recording {
                steps: steps.clone(),
            }),
            Timing::from_millis(10),
        )
        .await;

        assert_near(Instant::now() - start, Duration::from_millis(40));
        assert_eq!(steps.lock().unwrap().len(), 3);
    }
}

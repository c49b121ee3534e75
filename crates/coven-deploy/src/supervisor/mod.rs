// ABOUTME: Supervisor side of coven-deploy.
// ABOUTME: Launching, process teardown, the deployment registry, and the polling loop.

pub mod control;
pub mod launcher;
pub mod process;
pub mod registry;

pub use control::{Outcome, Settled, Supervisor};
pub use launcher::{await_ready, LaunchRequest, Launched, Launcher, OsLauncher};
pub use process::{terminate_escalating, OsProcess, ProcessHandle};
pub use registry::{
    DeploymentRecord, LifecycleState, PendingDeploy, Readiness, Registry, Stopped, Teardown,
};

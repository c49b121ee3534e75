// ABOUTME: Worker side of coven-deploy: the deployment handle and the worker process entry point.
// ABOUTME: Each deployment runs in its own process and talks to the supervisor over stdio.

pub mod entry;
pub mod handle;

pub use entry::{run_worker, WorkerOptions};
pub use handle::{ChannelStatus, DeploymentHandle};

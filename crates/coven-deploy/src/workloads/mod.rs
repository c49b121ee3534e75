// ABOUTME: Workload contract and the catalog of workloads a worker can run.
// ABOUTME: A module name resolves to a factory that builds the workload from its context.

pub mod echo;
pub mod stall;
pub mod ticker;

use crate::worker::DeploymentHandle;
use anyhow::{bail, Result};
use async_trait::async_trait;
use coven_deploy_core::{ModuleDefinition, Timing};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The payload run inside a worker process.
#[async_trait]
pub trait Workload: Send {
    /// Runs until the workload intends to shut down.
    async fn run(&mut self) -> Result<()>;

    /// Rebuild the named part of the workload from its current definition.
    /// Returns false when `target` is not something this workload can reload.
    fn reload(&mut self, _target: &str) -> bool {
        false
    }
}

/// Everything a workload is constructed from.
#[derive(Clone)]
pub struct WorkloadContext {
    pub handle: DeploymentHandle,
    pub definition: ModuleDefinition,
    pub argument: String,
    pub modules_dir: PathBuf,
    pub timing: Timing,
}

impl WorkloadContext {
    /// Current on-disk definition of this workload's module.
    pub fn load_definition(&self) -> Result<ModuleDefinition> {
        Ok(ModuleDefinition::load(&self.modules_dir, &self.definition.name)?)
    }
}

pub type WorkloadFactory = fn(WorkloadContext) -> Result<Box<dyn Workload>>;

/// Workloads known to this binary, keyed by module name.
#[derive(Clone, Default)]
pub struct Catalog {
    factories: BTreeMap<String, WorkloadFactory>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("echo", echo::build);
        catalog.register("ticker", ticker::build);
        catalog.register("stall", stall::build);
        catalog
    }

    pub fn register(&mut self, name: &str, factory: WorkloadFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn build(&self, name: &str, context: WorkloadContext) -> Result<Box<dyn Workload>> {
        match self.factories.get(name) {
            Some(factory) => factory(context),
            None => bail!(
                "Unknown module '{}'. Available: {}",
                name,
                self.names().join(", ")
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.names(), vec!["echo", "stall", "ticker"]);
        assert!(catalog.contains("echo"));
        assert!(!catalog.contains("slow"));
    }

    #[tokio::test]
    async fn test_build_unknown_module_lists_available() {
        let (context, _supervisor) = testing::context("ghost", "");
        let err = Catalog::builtin()
            .build("ghost", context)
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("Unknown module 'ghost'"));
        assert!(err.contains("echo, stall, ticker"));
    }

    #[tokio::test]
    async fn test_register_custom_workload() {
        struct Noop;

        #[async_trait]
        impl Workload for Noop {
            async fn run(&mut self) -> Result<()> {
                Ok(())
            }
        }

        fn build(_: WorkloadContext) -> Result<Box<dyn Workload>> {
            Ok(Box::new(Noop))
        }

        let mut catalog = Catalog::new();
        catalog.register("noop", build);
        let (context, _supervisor) = testing::context("noop", "");
        let mut workload = catalog.build("noop", context).unwrap();
        workload.run().await.unwrap();
        assert!(!workload.reload("anything"));
    }
}

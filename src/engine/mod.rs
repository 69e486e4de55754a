//! Execution engine
//!
//! The engine facade exposed to a hosting runtime: identity, discovery, and
//! blocking execution of a discovered tree.

mod context;
mod lifecycle;
mod runner;
mod scheduler;

pub use context::{ExecutionContext, HookFn, RunHooks};
pub use lifecycle::execute_isolated;
pub use runner::{CaseRunner, DefaultCaseRunner};
pub use scheduler::Scheduler;

use std::time::Duration;

use thiserror::Error;

use crate::discovery::{Discoverer, DiscoveryError, DiscoveryRequest, SpecRegistry};
use crate::model::{RunSummary, TestTree};

/// Stable token identifying this engine to hosting runtimes.
pub const ENGINE_ID: &str = "specrun";

/// Whole-run failures. Per-node failures never surface here; they are
/// reported through the listener as failed finishes.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("spec `{spec}` did not rediscover a case named `{case}`; the tree drifted between discoveries")]
    LifecycleConsistency { spec: String, case: String },

    #[error("global setup failed: {0}")]
    SetupFailed(String),

    #[error("global teardown failed: {0}")]
    TeardownFailed(String),

    #[error("run abandoned: the worker pool did not drain within {bound:?}")]
    Abandoned { bound: Duration },
}

/// The engine: a registry of specs, discoverable and executable.
pub struct TreeEngine {
    discoverer: Discoverer,
}

impl TreeEngine {
    pub fn new(registry: SpecRegistry) -> Self {
        Self {
            discoverer: Discoverer::new(registry),
        }
    }

    /// Stable engine identifier.
    pub fn identity(&self) -> &'static str {
        ENGINE_ID
    }

    /// Build the node tree for a selection of registered specs.
    pub fn discover(&self, request: &DiscoveryRequest) -> Result<TestTree, DiscoveryError> {
        self.discoverer.discover(request)
    }

    /// Run a discovered tree to completion. Resolves after every node has
    /// reported a finish event and global teardown has run; errors only on
    /// whole-run-fatal conditions, after best-effort cleanup.
    pub async fn execute(
        &self,
        tree: TestTree,
        ctx: ExecutionContext,
    ) -> Result<RunSummary, EngineError> {
        Scheduler::run(tree, ctx).await
    }
}

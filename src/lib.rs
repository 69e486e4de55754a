//! specrun - hierarchical test execution engine
//!
//! Runs a discovered tree of test containers and cases to completion with
//! configurable concurrency, applies lifecycle interceptors exactly once per
//! required scope, and supports shared-instance and per-test instancing
//! policies per spec.
//!
//! ## Features
//!
//! - Flat top-level parallelism over a bounded worker pool; everything
//!   beneath a top-level unit runs synchronously in tree order
//! - Interceptor chains with explicit short-circuit (skip) semantics
//! - Per-test instancing with deterministic rediscovery and match-by-name
//! - Paired start/finish events per node through a pluggable listener
//! - Per-node failure isolation; only whole-run-fatal errors are raised
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use specrun::{
//!     DiscoveryRequest, ExecutionContext, FnGroup, InstancingPolicy, LoggingListener, SpecDef,
//!     SpecRegistry, TreeEngine,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut registry = SpecRegistry::new();
//!     registry.register(SpecDef::new("math", InstancingPolicy::SharedInstance, || {
//!         Ok(Box::new(FnGroup::new().case("adds", || {
//!             assert_eq!(2 + 2, 4);
//!             Ok(())
//!         })))
//!     }))?;
//!
//!     let engine = TreeEngine::new(registry);
//!     let tree = engine.discover(&DiscoveryRequest::scan_all())?;
//!     let ctx = ExecutionContext::new(Arc::new(LoggingListener)).with_parallelism(4);
//!
//!     let summary = tokio::runtime::Runtime::new()?.block_on(engine.execute(tree, ctx))?;
//!     print!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod interceptor;
pub mod model;
pub mod report;
pub mod utils;

pub use config::EngineConfig;
pub use discovery::{DiscoveryError, DiscoveryRequest, SpecRegistry};
pub use engine::{
    CaseRunner, DefaultCaseRunner, EngineError, ExecutionContext, RunHooks, TreeEngine, ENGINE_ID,
};
pub use interceptor::{Interceptor, InterceptorChain, Proceed};
pub use model::{
    FnGroup, GroupLayout, InstancingPolicy, NodeResult, Outcome, RunSummary, SpecDef, TestGroup,
};
pub use report::{ExecutionListener, LoggingListener, NullListener};

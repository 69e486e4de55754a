//! Execution context
//!
//! Per-run state handed to the scheduler: listener, pool size, globally
//! configured interceptors, global hooks, and the case runner. An explicit
//! object, constructed once per run, never ambient state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::EngineConfig;
use crate::engine::runner::{CaseRunner, DefaultCaseRunner};
use crate::interceptor::Interceptor;
use crate::report::ExecutionListener;

/// A global setup or teardown hook.
pub type HookFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Global setup/teardown hooks bracketing one run. Teardown runs on every
/// exit path.
#[derive(Clone, Default)]
pub struct RunHooks {
    setup: Option<HookFn>,
    teardown: Option<HookFn>,
}

impl RunHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_setup(mut self, hook: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.setup = Some(Arc::new(hook));
        self
    }

    pub fn on_teardown(mut self, hook: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.teardown = Some(Arc::new(hook));
        self
    }

    pub(crate) fn run_setup(&self) -> Result<()> {
        match &self.setup {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    pub(crate) fn run_teardown(&self) -> Result<()> {
        match &self.teardown {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

/// Per-run execution state.
pub struct ExecutionContext {
    pub(crate) listener: Arc<dyn ExecutionListener>,
    pub(crate) parallelism: usize,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) hooks: RunHooks,
    pub(crate) await_bound: Duration,
    pub(crate) runner: Arc<dyn CaseRunner>,
}

impl ExecutionContext {
    /// A serial context with no global interceptors or hooks.
    pub fn new(listener: Arc<dyn ExecutionListener>) -> Self {
        Self {
            listener,
            parallelism: 1,
            interceptors: Vec::new(),
            hooks: RunHooks::new(),
            await_bound: Duration::from_secs(EngineConfig::default().await_bound_secs),
            runner: Arc::new(DefaultCaseRunner),
        }
    }

    /// Build a context from a loaded configuration.
    pub fn from_config(config: &EngineConfig, listener: Arc<dyn ExecutionListener>) -> Self {
        Self::new(listener)
            .with_parallelism(config.effective_parallelism())
            .with_await_bound(Duration::from_secs(config.await_bound_secs))
    }

    /// Set the worker pool size; clamped to a minimum of 1.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Append a globally configured interceptor. Global interceptors wrap
    /// inside spec-declared ones.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_hooks(mut self, hooks: RunHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_await_bound(mut self, bound: Duration) -> Self {
        self.await_bound = bound;
        self
    }

    pub fn with_case_runner(mut self, runner: Arc<dyn CaseRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullListener;

    #[test]
    fn context_defaults_to_serial() {
        let ctx = ExecutionContext::new(Arc::new(NullListener));
        assert_eq!(ctx.parallelism(), 1);
        assert!(ctx.interceptors.is_empty());
    }

    #[test]
    fn parallelism_clamps_to_one() {
        let ctx = ExecutionContext::new(Arc::new(NullListener)).with_parallelism(0);
        assert_eq!(ctx.parallelism(), 1);
    }

    #[test]
    fn from_config_applies_pool_settings() {
        let config = EngineConfig {
            parallelism: 6,
            await_bound_secs: 120,
        };
        let ctx = ExecutionContext::from_config(&config, Arc::new(NullListener));
        assert_eq!(ctx.parallelism(), 6);
        assert_eq!(ctx.await_bound, Duration::from_secs(120));
    }

    #[test]
    fn hooks_default_to_noops() {
        let hooks = RunHooks::new();
        assert!(hooks.run_setup().is_ok());
        assert!(hooks.run_teardown().is_ok());
    }
}

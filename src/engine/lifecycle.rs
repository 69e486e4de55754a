//! Per-test instance lifecycle
//!
//! One isolated execution for a case belonging to a per-test spec: fresh
//! instance, fresh layout, match by name, fresh chain, invoke once.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use crate::engine::runner::CaseRunner;
use crate::engine::EngineError;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::model::{Outcome, SpecDef};

/// Execute exactly one case against a freshly built instance of `def`.
///
/// Stateless: every invocation builds its own instance and its own chain, so
/// N cases under one per-test spec mean N independent constructions. The
/// fresh instance's layout is the rediscovered tree; the case is located in
/// it by name, the sole correlation key. A missing match is the lifecycle
/// consistency failure for this case, never a silent skip.
pub fn execute_isolated(
    def: &Arc<SpecDef>,
    case_name: &str,
    global_interceptors: &[Arc<dyn Interceptor>],
    runner: &dyn CaseRunner,
) -> Outcome {
    let mut group = match def.instantiate() {
        Ok(group) => group,
        Err(err) => {
            return Outcome::failure(format!(
                "failed to instantiate spec `{}`: {err:#}",
                def.name()
            ))
        }
    };

    let layout = group.layout();
    if !layout.contains_case(case_name) {
        let err = EngineError::LifecycleConsistency {
            spec: def.name().to_string(),
            case: case_name.to_string(),
        };
        return Outcome::failure(err.to_string());
    }

    debug!("fresh instance of `{}` for case `{}`", def.name(), case_name);

    // Spec-declared interceptors first, so they wrap outermost.
    let interceptors: Vec<Arc<dyn Interceptor>> = def
        .interceptors()
        .iter()
        .chain(global_interceptors)
        .cloned()
        .collect();

    let outcome = RefCell::new(None);
    let slot = &outcome;
    let chain = InterceptorChain::build(
        &interceptors,
        Box::new(move || {
            *slot.borrow_mut() = Some(runner.run(group.as_mut(), case_name));
            Ok(())
        }),
    );

    match chain.invoke() {
        Err(err) => Outcome::failure(format!("interceptor failed: {err:#}")),
        // A chain that never proceeded leaves the slot empty: the case was
        // skipped, not run.
        Ok(()) => outcome.into_inner().unwrap_or(Outcome::Skipped),
    }
}

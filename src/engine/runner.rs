//! Case runner
//!
//! Executes one case body against a group instance; the terminal action
//! wrapped by interceptor chains.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::model::{Outcome, TestGroup};

/// Executes one case body. Pluggable per run; the default converts errors
/// and panics into failure outcomes so nothing escapes the node boundary.
pub trait CaseRunner: Send + Sync {
    fn run(&self, group: &mut dyn TestGroup, case_name: &str) -> Outcome;
}

/// Runner that invokes [`TestGroup::run_case`] directly.
pub struct DefaultCaseRunner;

impl CaseRunner for DefaultCaseRunner {
    fn run(&self, group: &mut dyn TestGroup, case_name: &str) -> Outcome {
        match catch_unwind(AssertUnwindSafe(|| group.run_case(case_name))) {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(err)) => Outcome::Failed(format!("{err:#}")),
            Err(panic) => Outcome::Failed(panic_message(panic)),
        }
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}

//! Lifecycle interceptors
//!
//! Composes ordered wrapper chains around a terminal action.

use std::sync::Arc;

use anyhow::Result;

/// A deferred unit of work wrapped by a chain.
pub type Action<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Continuation handed to an interceptor.
///
/// Calling [`Proceed::call`] runs the next wrapper (eventually the terminal).
/// Dropping it without calling short-circuits everything inside: the terminal
/// and all remaining wrappers never run. That is a legitimate control outcome
/// (a skip condition), not an error.
pub struct Proceed<'a> {
    next: Action<'a>,
}

impl<'a> Proceed<'a> {
    fn new(next: Action<'a>) -> Self {
        Self { next }
    }

    /// Run the enclosed wrappers and terminal. Consumes the continuation;
    /// a chain link can proceed at most once.
    pub fn call(self) -> Result<()> {
        (self.next)()
    }
}

/// A lifecycle wrapper that may run logic before and after an inner action
/// and decides whether the inner action runs at all.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, proceed: Proceed<'_>) -> Result<()>;
}

/// An ordered interceptor chain compiled into a single invocable.
///
/// The first interceptor in the list is outermost. Built once per required
/// scope and invoked exactly once.
pub struct InterceptorChain<'a> {
    action: Action<'a>,
}

impl<'a> InterceptorChain<'a> {
    /// Compose `interceptors` around `terminal`.
    ///
    /// With no interceptors the terminal is returned as-is, no wrapping
    /// overhead.
    pub fn build(interceptors: &[Arc<dyn Interceptor>], terminal: Action<'a>) -> Self {
        let mut action = terminal;
        for interceptor in interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let next = action;
            action = Box::new(move || interceptor.intercept(Proceed::new(next)));
        }
        Self { action }
    }

    /// Invoke the chain. Consumes it; one construction, one invocation.
    pub fn invoke(self) -> Result<()> {
        (self.action)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor for Recording {
        fn intercept(&self, proceed: Proceed<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}-enter", self.label));
            let result = proceed.call();
            self.log.lock().unwrap().push(format!("{}-exit", self.label));
            result
        }
    }

    struct Blocking;

    impl Interceptor for Blocking {
        fn intercept(&self, _proceed: Proceed<'_>) -> Result<()> {
            // Never proceeds.
            Ok(())
        }
    }

    fn terminal_recording(log: &Arc<Mutex<Vec<String>>>) -> Action<'static> {
        let log = Arc::clone(log);
        Box::new(move || {
            log.lock().unwrap().push("terminal".to_string());
            Ok(())
        })
    }

    #[test]
    fn first_interceptor_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Recording { label: "a", log: Arc::clone(&log) }),
            Arc::new(Recording { label: "b", log: Arc::clone(&log) }),
        ];

        let chain = InterceptorChain::build(&interceptors, terminal_recording(&log));
        chain.invoke().unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a-enter", "b-enter", "terminal", "b-exit", "a-exit"]
        );
    }

    #[test]
    fn zero_interceptors_runs_terminal_unwrapped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::build(&[], terminal_recording(&log));
        chain.invoke().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["terminal"]);
    }

    #[test]
    fn dropping_proceed_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Blocking),
            Arc::new(Recording { label: "inner", log: Arc::clone(&log) }),
        ];

        let chain = InterceptorChain::build(&interceptors, terminal_recording(&log));
        assert!(chain.invoke().is_ok());

        // Neither the inner wrapper nor the terminal ran.
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn wrapper_errors_surface_through_the_chain() {
        struct Failing;
        impl Interceptor for Failing {
            fn intercept(&self, _proceed: Proceed<'_>) -> Result<()> {
                anyhow::bail!("condition not met")
            }
        }

        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Failing)];
        let chain = InterceptorChain::build(&interceptors, Box::new(|| Ok(())));
        let err = chain.invoke().unwrap_err();
        assert!(err.to_string().contains("condition not met"));
    }
}

//! Execution scheduler
//!
//! Walks the discovered tree: top-level units fan out across a bounded
//! worker pool, everything beneath a unit runs synchronously on the task
//! that claimed it.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::engine::context::ExecutionContext;
use crate::engine::lifecycle;
use crate::engine::runner::panic_message;
use crate::engine::{EngineError, ENGINE_ID};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::model::{InstancingPolicy, NodeId, NodeKind, Outcome, RunSummary, SpecId, TestTree};
use crate::report::Reporter;
use crate::utils::Timer;

/// Runs a discovered tree to completion.
pub struct Scheduler;

impl Scheduler {
    /// Execute everything under the tree's root. Resolves only once every
    /// node has reported a finish event and global teardown has run; returns
    /// an error only for whole-run-fatal conditions.
    pub async fn run(tree: TestTree, ctx: ExecutionContext) -> Result<RunSummary, EngineError> {
        let tree = Arc::new(tree);
        let ctx = Arc::new(ctx);
        let reporter = Arc::new(Reporter::new(Arc::clone(&ctx.listener)));
        let timer = Timer::start("run");

        let root = tree.root();
        reporter.start(tree.node(root));

        let mut fatal: Option<EngineError> = None;

        // Global setup. A failure is fatal for the whole run: nothing new is
        // dispatched, but teardown still runs.
        if let Err(err) = ctx.hooks.run_setup() {
            error!("global setup failed: {err:#}");
            fatal = Some(EngineError::SetupFailed(format!("{err:#}")));
        }

        if fatal.is_none() {
            let semaphore = Arc::new(Semaphore::new(ctx.parallelism));
            let mut handles = Vec::new();

            for unit in tree.node(root).children.clone() {
                let semaphore = Arc::clone(&semaphore);
                let executor = NodeExecutor {
                    tree: Arc::clone(&tree),
                    ctx: Arc::clone(&ctx),
                    reporter: Arc::clone(&reporter),
                };
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.unwrap();
                    executor.execute(unit);
                }));
            }

            // Nothing is submitted past this point; wait for the pool to
            // drain, up to the configured bound. Overrun abandons the run:
            // in-flight units are not cancelled, only no longer awaited.
            if timeout(ctx.await_bound, join_all(handles)).await.is_err() {
                warn!("worker pool did not drain within {:?}", ctx.await_bound);
                fatal = Some(EngineError::Abandoned {
                    bound: ctx.await_bound,
                });
            }
        }

        // Teardown runs on every exit path. Its own failure is recorded but
        // never masks an earlier fatal error.
        if let Err(err) = ctx.hooks.run_teardown() {
            error!("global teardown failed: {err:#}");
            if fatal.is_none() {
                fatal = Some(EngineError::TeardownFailed(format!("{err:#}")));
            }
        }

        let root_outcome = match &fatal {
            None => Outcome::Passed,
            Some(err) => Outcome::failure(err.to_string()),
        };
        reporter.finish(tree.node(root), root_outcome);

        let elapsed = timer.stop();
        match fatal {
            Some(err) => Err(err),
            None => {
                let summary = reporter.summary(ENGINE_ID);
                info!(
                    "run completed in {}ms - pass {}/{} ({:.1}%)",
                    elapsed.as_millis(),
                    summary.passed,
                    summary.total,
                    summary.pass_rate()
                );
                Ok(summary)
            }
        }
    }
}

/// Executes one subtree synchronously on the claiming task.
#[derive(Clone)]
struct NodeExecutor {
    tree: Arc<TestTree>,
    ctx: Arc<ExecutionContext>,
    reporter: Arc<Reporter>,
}

impl NodeExecutor {
    /// Execute `id` and everything beneath it, in pre-order. Failures are
    /// converted to this node's outcome and never cross its boundary.
    fn execute(&self, id: NodeId) {
        let node = self.tree.node(id);
        self.reporter.start(node);

        let outcome = match node.kind {
            NodeKind::Container => self.execute_container(id),
            NodeKind::Case => self.execute_case(id),
        };

        self.reporter.finish(node, outcome);
    }

    fn execute_container(&self, id: NodeId) -> Outcome {
        let node = self.tree.node(id);

        if let Some(spec) = node.spec {
            let shared = self.tree.spec(spec).def.policy() == InstancingPolicy::SharedInstance;
            if self.tree.is_spec_root(id) && shared {
                return self.execute_shared_root(id, spec);
            }
        }

        // Plain containers and per-test spec roots recurse directly; the
        // per-test chain is deferred to leaf time.
        for child in &node.children {
            self.execute(*child);
        }
        Outcome::Passed
    }

    /// One chain per shared-instance spec, built at its root: the terminal
    /// executes every child in order.
    fn execute_shared_root(&self, id: NodeId, spec: SpecId) -> Outcome {
        let node = self.tree.node(id);
        let slot = self.tree.spec(spec);

        let interceptors: Vec<Arc<dyn Interceptor>> = slot
            .def
            .interceptors()
            .iter()
            .chain(self.ctx.interceptors.iter())
            .cloned()
            .collect();

        let proceeded = Cell::new(false);
        let flag = &proceeded;
        let chain = InterceptorChain::build(
            &interceptors,
            Box::new(move || {
                flag.set(true);
                for child in &node.children {
                    self.execute(*child);
                }
                Ok(())
            }),
        );

        let outcome = match catch_unwind(AssertUnwindSafe(|| chain.invoke())) {
            Ok(Ok(())) if proceeded.get() => Outcome::Passed,
            Ok(Ok(())) => Outcome::Skipped,
            Ok(Err(err)) => Outcome::failure(format!("interceptor failed: {err:#}")),
            Err(panic) => Outcome::failure(panic_message(panic)),
        };

        if outcome != Outcome::Passed {
            // Descendants the chain never reached still owe the listener a
            // paired start/finish.
            self.skip_unvisited(id);
        }
        outcome
    }

    fn execute_case(&self, id: NodeId) -> Outcome {
        let node = self.tree.node(id);
        let Some(spec) = node.spec else {
            return Outcome::failure("case node has no owning spec");
        };
        let slot = self.tree.spec(spec);

        match slot.def.policy() {
            InstancingPolicy::SharedInstance => {
                // A panicking case is caught inside the runner, so a poisoned
                // lock here means a listener or interceptor blew up earlier;
                // keep running against the instance either way.
                let mut group = slot
                    .shared
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                self.ctx.runner.run(group.as_mut(), &node.name)
            }
            InstancingPolicy::PerTest => lifecycle::execute_isolated(
                &slot.def,
                &node.name,
                &self.ctx.interceptors,
                self.ctx.runner.as_ref(),
            ),
        }
    }

    fn skip_unvisited(&self, id: NodeId) {
        for descendant in self.tree.preorder(id) {
            if descendant != id {
                self.reporter.skip(self.tree.node(descendant));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::Proceed;
    use crate::model::{FnGroup, SpecDef, TestNode};
    use crate::report::ExecutionListener;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collecting {
        events: Mutex<Vec<(String, String)>>,
    }

    impl Collecting {
        fn events(&self) -> Vec<(String, String)> {
            self.events.lock().unwrap().clone()
        }

        fn of(&self, unique_id: &str) -> Vec<String> {
            self.events()
                .into_iter()
                .filter(|(_, id)| id == unique_id)
                .map(|(phase, _)| phase)
                .collect()
        }
    }

    impl ExecutionListener for Collecting {
        fn started(&self, node: &TestNode) {
            self.events
                .lock()
                .unwrap()
                .push(("start".into(), node.unique_id.clone()));
        }

        fn finished(&self, node: &TestNode, outcome: &Outcome) {
            self.events
                .lock()
                .unwrap()
                .push((format!("finish-{outcome}"), node.unique_id.clone()));
        }
    }

    struct Counting {
        enters: AtomicUsize,
        exits: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                enters: AtomicUsize::new(0),
                exits: AtomicUsize::new(0),
            })
        }
    }

    impl Interceptor for Counting {
        fn intercept(&self, proceed: Proceed<'_>) -> Result<()> {
            self.enters.fetch_add(1, Ordering::SeqCst);
            let result = proceed.call();
            self.exits.fetch_add(1, Ordering::SeqCst);
            result
        }
    }

    fn tree_of(defs: Vec<SpecDef>) -> TestTree {
        let mut registry = crate::discovery::SpecRegistry::new();
        for def in defs {
            registry.register(def).unwrap();
        }
        crate::discovery::Discoverer::new(registry)
            .discover(&crate::discovery::DiscoveryRequest::scan_all())
            .unwrap()
    }

    fn run_serial(tree: TestTree, ctx: ExecutionContext) -> Result<RunSummary, EngineError> {
        tokio_test::block_on(Scheduler::run(tree, ctx))
    }

    fn assert_paired_events(events: &[(String, String)]) {
        use std::collections::HashMap;
        let mut seen: HashMap<&str, Vec<&str>> = HashMap::new();
        for (phase, id) in events {
            seen.entry(id.as_str()).or_default().push(phase.as_str());
        }
        for (id, phases) in seen {
            assert_eq!(phases.len(), 2, "{id} reported {phases:?}");
            assert!(phases[0] == "start", "{id} began with {}", phases[0]);
            assert!(phases[1].starts_with("finish"), "{id} ended with {}", phases[1]);
        }
    }

    #[test]
    fn every_node_reports_one_start_then_one_finish() {
        let listener = Arc::new(Collecting::default());
        let tree = tree_of(vec![SpecDef::new(
            "pairs",
            InstancingPolicy::SharedInstance,
            || {
                Ok(Box::new(
                    FnGroup::new()
                        .case("a", || Ok(()))
                        .group("nested", FnGroup::new().case("b", || Ok(()))),
                ))
            },
        )]);

        let summary = run_serial(
            tree,
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        // Root, spec root, case a, nested group, case b.
        assert_eq!(listener.events().len(), 10);
        assert_paired_events(&listener.events());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 2);
    }

    #[test]
    fn serial_run_reports_events_in_preorder() {
        let listener = Arc::new(Collecting::default());
        let tree = tree_of(vec![
            SpecDef::new("alpha", InstancingPolicy::SharedInstance, || {
                Ok(Box::new(FnGroup::new().case("a1", || Ok(())).case("a2", || Ok(()))))
            }),
            SpecDef::new("beta", InstancingPolicy::SharedInstance, || {
                Ok(Box::new(FnGroup::new().case("b1", || Ok(()))))
            }),
        ]);

        run_serial(
            tree,
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        let order: Vec<String> = listener
            .events()
            .into_iter()
            .map(|(phase, id)| {
                let short = id.rsplit(":").next().unwrap().trim_end_matches(']').to_string();
                format!("{} {}", phase.split('-').next().unwrap(), short)
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "start specrun",
                "start alpha",
                "start a1",
                "finish a1",
                "start a2",
                "finish a2",
                "finish alpha",
                "start beta",
                "start b1",
                "finish b1",
                "finish beta",
                "finish specrun",
            ]
        );
    }

    #[test]
    fn shared_instance_builds_one_chain_for_the_whole_spec() {
        let counting = Counting::new();
        let constructions = Arc::new(AtomicUsize::new(0));
        let built = Arc::clone(&constructions);

        let def = SpecDef::new("shared", InstancingPolicy::SharedInstance, move || {
            built.fetch_add(1, Ordering::SeqCst);
            // Per-instance state: case `b` sees what case `a` wrote only if
            // both run against the same instance.
            let state = Arc::new(AtomicUsize::new(0));
            let write = Arc::clone(&state);
            let read = Arc::clone(&state);
            Ok(Box::new(
                FnGroup::new()
                    .case("a", move || {
                        write.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .case("b", move || {
                        if read.load(Ordering::SeqCst) == 1 {
                            Ok(())
                        } else {
                            Err(anyhow!("instance was not shared"))
                        }
                    }),
            ))
        })
        .with_interceptor(counting.clone() as Arc<dyn Interceptor>);

        let listener = Arc::new(Collecting::default());
        let summary = run_serial(
            tree_of(vec![def]),
            ExecutionContext::new(listener as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        assert_eq!(summary.passed, 2);
        assert_eq!(counting.enters.load(Ordering::SeqCst), 1);
        assert_eq!(counting.exits.load(Ordering::SeqCst), 1);
        // Exactly the discovery prototype; no further instances.
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn per_test_builds_one_chain_and_instance_per_leaf() {
        let counting = Counting::new();
        let constructions = Arc::new(AtomicUsize::new(0));
        let built = Arc::clone(&constructions);

        let def = SpecDef::new("isolated", InstancingPolicy::PerTest, move || {
            built.fetch_add(1, Ordering::SeqCst);
            let state = Arc::new(AtomicUsize::new(0));
            let write = Arc::clone(&state);
            let read = Arc::clone(&state);
            Ok(Box::new(
                FnGroup::new()
                    .case("a", move || {
                        write.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .case("b", move || {
                        // A fresh instance never saw `a` run.
                        if read.load(Ordering::SeqCst) == 0 {
                            Ok(())
                        } else {
                            Err(anyhow!("instance leaked across cases"))
                        }
                    }),
            ))
        })
        .with_interceptor(counting.clone() as Arc<dyn Interceptor>);

        let listener = Arc::new(Collecting::default());
        let summary = run_serial(
            tree_of(vec![def]),
            ExecutionContext::new(listener as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        assert_eq!(summary.passed, 2);
        assert_eq!(counting.enters.load(Ordering::SeqCst), 2);
        assert_eq!(counting.exits.load(Ordering::SeqCst), 2);
        // Discovery prototype plus one instance per case.
        assert_eq!(constructions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_case_does_not_stop_its_siblings() {
        let listener = Arc::new(Collecting::default());
        let tree = tree_of(vec![SpecDef::new(
            "mixed",
            InstancingPolicy::SharedInstance,
            || {
                Ok(Box::new(
                    FnGroup::new()
                        .case("explodes", || panic!("kaboom"))
                        .case("survives", || Ok(())),
                ))
            },
        )]);

        let summary = run_serial(
            tree,
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.passed, 1);
        assert_eq!(
            listener.of("[engine:specrun]/[spec:mixed]/[case:survives]"),
            vec!["start", "finish-PASS"]
        );
    }

    #[test]
    fn drifting_layout_fails_the_case_instead_of_running_the_wrong_one() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let def = SpecDef::new("drifting", InstancingPolicy::PerTest, move || {
            let generation = counter.fetch_add(1, Ordering::SeqCst);
            // Discovery sees `steady`; every later instance renames it.
            let name = if generation == 0 { "steady" } else { "renamed" };
            Ok(Box::new(FnGroup::new().case(name, || Ok(()))))
        });

        let listener = Arc::new(Collecting::default());
        let summary = run_serial(
            tree_of(vec![def]),
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        assert_eq!(summary.failed, 1);
        let failure = summary
            .results
            .iter()
            .find(|r| r.name == "steady")
            .unwrap();
        match &failure.outcome {
            Outcome::Failed(message) => assert!(message.contains("rediscover")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn short_circuited_spec_reports_skips_for_the_whole_subtree() {
        struct Gate;
        impl Interceptor for Gate {
            fn intercept(&self, _proceed: Proceed<'_>) -> Result<()> {
                Ok(())
            }
        }

        let listener = Arc::new(Collecting::default());
        let def = SpecDef::new("gated", InstancingPolicy::SharedInstance, || {
            Ok(Box::new(FnGroup::new().case("a", || Ok(())).case("b", || Ok(()))))
        })
        .with_interceptor(Arc::new(Gate));

        let summary = run_serial(
            tree_of(vec![def]),
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.passed, 0);
        assert_paired_events(&listener.events());
        assert_eq!(
            listener.of("[engine:specrun]/[spec:gated]/[case:a]"),
            vec!["start", "finish-SKIP"]
        );
    }

    #[test]
    fn zero_interceptors_run_the_terminal_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let def = SpecDef::new("plain", InstancingPolicy::SharedInstance, move || {
            let counter = Arc::clone(&counter);
            Ok(Box::new(FnGroup::new().case("only", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
        });

        let listener = Arc::new(Collecting::default());
        run_serial(
            tree_of(vec![def]),
            ExecutionContext::new(listener as Arc<dyn ExecutionListener>),
        )
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setup_failure_skips_dispatch_but_still_tears_down() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&torn_down);
        let hooks = crate::engine::RunHooks::new()
            .on_setup(|| Err(anyhow!("environment missing")))
            .on_teardown(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });

        let listener = Arc::new(Collecting::default());
        let tree = tree_of(vec![SpecDef::new(
            "never",
            InstancingPolicy::SharedInstance,
            || Ok(Box::new(FnGroup::new().case("untouched", || Ok(())))),
        )]);

        let result = run_serial(
            tree,
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>).with_hooks(hooks),
        );

        assert!(matches!(result, Err(EngineError::SetupFailed(_))));
        assert!(torn_down.load(Ordering::SeqCst));
        // Only the engine root reported events.
        assert_eq!(listener.events().len(), 2);
    }

    #[test]
    fn teardown_failure_is_fatal_after_cases_complete() {
        let listener = Arc::new(Collecting::default());
        let hooks =
            crate::engine::RunHooks::new().on_teardown(|| Err(anyhow!("cleanup refused")));
        let tree = tree_of(vec![SpecDef::new(
            "fine",
            InstancingPolicy::SharedInstance,
            || Ok(Box::new(FnGroup::new().case("runs", || Ok(())))),
        )]);

        let result = run_serial(
            tree,
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>).with_hooks(hooks),
        );

        assert!(matches!(result, Err(EngineError::TeardownFailed(_))));
        assert_eq!(
            listener.of("[engine:specrun]/[spec:fine]/[case:runs]"),
            vec!["start", "finish-PASS"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_units_all_complete() {
        let listener = Arc::new(Collecting::default());
        let defs = (0..4)
            .map(|i| {
                SpecDef::new(format!("spec{i}"), InstancingPolicy::SharedInstance, || {
                    Ok(Box::new(FnGroup::new().case("works", || Ok(()))))
                })
            })
            .collect();

        let summary = Scheduler::run(
            tree_of(defs),
            ExecutionContext::new(listener.clone() as Arc<dyn ExecutionListener>)
                .with_parallelism(4),
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 4);
        assert_paired_events(&listener.events());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overrunning_the_await_bound_abandons_the_run() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&torn_down);
        let hooks = crate::engine::RunHooks::new().on_teardown(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let tree = tree_of(vec![SpecDef::new(
            "slow",
            InstancingPolicy::SharedInstance,
            || {
                Ok(Box::new(FnGroup::new().case("stalls", || {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(())
                })))
            },
        )]);

        let result = Scheduler::run(
            tree,
            ExecutionContext::new(Arc::new(crate::report::NullListener))
                .with_hooks(hooks)
                .with_await_bound(Duration::from_millis(20)),
        )
        .await;

        assert!(matches!(result, Err(EngineError::Abandoned { .. })));
        assert!(torn_down.load(Ordering::SeqCst));
    }
}

//! Result reporting
//!
//! The listener protocol exposed to the hosting runtime, plus the reporter
//! that enforces start/finish pairing and collects per-node results.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::model::{NodeKind, NodeResult, Outcome, RunSummary, TestNode};

/// The reporting boundary: one `started` then one `finished` per node.
pub trait ExecutionListener: Send + Sync {
    fn started(&self, node: &TestNode);
    fn finished(&self, node: &TestNode, outcome: &Outcome);
}

/// Listener that discards every event.
pub struct NullListener;

impl ExecutionListener for NullListener {
    fn started(&self, _node: &TestNode) {}
    fn finished(&self, _node: &TestNode, _outcome: &Outcome) {}
}

/// Listener that logs events through `tracing`.
pub struct LoggingListener;

impl ExecutionListener for LoggingListener {
    fn started(&self, node: &TestNode) {
        match node.kind {
            NodeKind::Case => info!("running {}", node.name),
            NodeKind::Container => debug!("entering {}", node.name),
        }
    }

    fn finished(&self, node: &TestNode, outcome: &Outcome) {
        match outcome {
            Outcome::Failed(message) => {
                error!("{} {} - {}", outcome.symbol(), node.name, message)
            }
            _ => match node.kind {
                NodeKind::Case => info!("{} {}", outcome.symbol(), node.name),
                NodeKind::Container => debug!("{} {}", outcome.symbol(), node.name),
            },
        }
    }
}

struct ReporterState {
    started: HashMap<String, Instant>,
    finished: HashSet<String>,
    results: Vec<NodeResult>,
}

/// Wraps the run's listener: guarantees exactly one `started` before exactly
/// one `finished` per node, measures durations, and collects results for the
/// run summary. Misused pairs are swallowed and logged, never re-raised.
pub struct Reporter {
    listener: Arc<dyn ExecutionListener>,
    started_at: DateTime<Utc>,
    state: Mutex<ReporterState>,
}

impl Reporter {
    pub fn new(listener: Arc<dyn ExecutionListener>) -> Self {
        Self {
            listener,
            started_at: Utc::now(),
            state: Mutex::new(ReporterState {
                started: HashMap::new(),
                finished: HashSet::new(),
                results: Vec::new(),
            }),
        }
    }

    /// Report a node start. Duplicate starts are dropped.
    pub fn start(&self, node: &TestNode) {
        {
            let mut state = self.state.lock().unwrap();
            if state.started.contains_key(&node.unique_id) {
                warn!("duplicate start for {}", node.unique_id);
                return;
            }
            state.started.insert(node.unique_id.clone(), Instant::now());
        }
        self.listener.started(node);
    }

    /// Report a node finish. Finishes without a start, and duplicate
    /// finishes, are dropped.
    pub fn finish(&self, node: &TestNode, outcome: Outcome) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(started) = state.started.get(&node.unique_id).copied() else {
                warn!("finish without start for {}", node.unique_id);
                return;
            };
            if !state.finished.insert(node.unique_id.clone()) {
                warn!("duplicate finish for {}", node.unique_id);
                return;
            }
            state.results.push(NodeResult {
                unique_id: node.unique_id.clone(),
                name: node.name.clone(),
                kind: node.kind,
                outcome: outcome.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
        self.listener.finished(node, &outcome);
    }

    /// Report a paired start + skipped finish for a node the run never
    /// reached. No-op if the node already started.
    pub fn skip(&self, node: &TestNode) {
        {
            let state = self.state.lock().unwrap();
            if state.started.contains_key(&node.unique_id) {
                return;
            }
        }
        self.start(node);
        self.finish(node, Outcome::Skipped);
    }

    /// Build the aggregate summary from everything reported so far.
    pub fn summary(&self, engine: &str) -> RunSummary {
        let results = self.state.lock().unwrap().results.clone();
        RunSummary::new(engine, self.started_at, results)
    }
}

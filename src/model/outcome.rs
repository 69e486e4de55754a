//! Execution outcomes and run summaries
//!
//! Per-node outcomes, per-node results, and the aggregate run summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::tree::NodeKind;

/// Result of executing one node.
///
/// `Skipped` is a control outcome, not a failure: it marks nodes an
/// interceptor chose not to run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "message")]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped,
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failed(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Passed => "✓",
            Outcome::Failed(_) => "✗",
            Outcome::Skipped => "○",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "PASS"),
            Outcome::Failed(_) => write!(f, "FAIL"),
            Outcome::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Outcome of a single node, as recorded by the reporter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeResult {
    pub unique_id: String,
    pub name: String,
    pub kind: NodeKind,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

impl fmt::Display for NodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.name,
            self.duration_ms
        )?;
        if let Outcome::Failed(message) = &self.outcome {
            write!(f, " - {message}")?;
        }
        Ok(())
    }
}

/// Aggregate summary of one engine run. Counts cover leaf cases only;
/// container results are still listed in `results`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<NodeResult>,
}

impl RunSummary {
    pub fn new(
        engine: impl Into<String>,
        started_at: DateTime<Utc>,
        results: Vec<NodeResult>,
    ) -> Self {
        let cases = || results.iter().filter(|r| r.kind == NodeKind::Case);
        let total = cases().count();
        let passed = cases().filter(|r| r.outcome == Outcome::Passed).count();
        let failed = cases()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
            .count();
        let skipped = cases().filter(|r| r.outcome == Outcome::Skipped).count();

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            engine: engine.into(),
            started_at,
            completed_at,
            total,
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0 && self.total > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} run - {} cases", self.engine, self.total)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in self.results.iter().filter(|r| r.kind == NodeKind::Case) {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {}",
            self.total, self.passed, self.failed, self.skipped
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.duration_ms
        )
    }
}

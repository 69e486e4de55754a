//! Data model
//!
//! Node trees, spec definitions, and execution outcomes.

mod outcome;
mod spec;
mod tree;

pub use outcome::{NodeResult, Outcome, RunSummary};
pub use spec::{FnGroup, GroupLayout, InstancingPolicy, LayoutNode, SpecDef, TestGroup};
pub use tree::{NodeId, NodeKind, SpecId, SpecSlot, TestNode, TestTree, TreeBuilder};

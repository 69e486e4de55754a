//! Spec definitions and group instances
//!
//! A spec is a named test group with an instancing policy, declared
//! interceptors, and a construction rule for its underlying group object.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::interceptor::Interceptor;

/// How a spec's underlying group object is instantiated for execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancingPolicy {
    /// One instance, created at discovery, reused by every case.
    SharedInstance,
    /// A fresh instance per case, rediscovered and matched by case name.
    PerTest,
}

impl fmt::Display for InstancingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstancingPolicy::SharedInstance => write!(f, "shared instance"),
            InstancingPolicy::PerTest => write!(f, "per test"),
        }
    }
}

/// A constructed test-group instance.
///
/// The instance declares its own tree shape and executes one case body at a
/// time. Two instances of the same group type must declare the same layout;
/// the per-test path relies on that to re-match cases by name.
pub trait TestGroup: Send {
    /// The tree shape this instance declares.
    fn layout(&self) -> GroupLayout;

    /// Execute the case with the given name against this instance.
    fn run_case(&mut self, name: &str) -> Result<()>;
}

/// One node of a declared group layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutNode {
    /// A nested container of further nodes.
    Group { name: String, children: Vec<LayoutNode> },
    /// An executable leaf case.
    Case { name: String },
}

/// The tree shape a group instance declares: nested groups and named cases,
/// in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupLayout {
    pub children: Vec<LayoutNode>,
}

impl GroupLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf case.
    pub fn case(mut self, name: impl Into<String>) -> Self {
        self.children.push(LayoutNode::Case { name: name.into() });
        self
    }

    /// Append a nested group.
    pub fn group(mut self, name: impl Into<String>, nested: GroupLayout) -> Self {
        self.children.push(LayoutNode::Group {
            name: name.into(),
            children: nested.children,
        });
        self
    }

    /// All case names in declaration order, flattened across nesting.
    pub fn case_names(&self) -> Vec<String> {
        fn collect(nodes: &[LayoutNode], out: &mut Vec<String>) {
            for node in nodes {
                match node {
                    LayoutNode::Case { name } => out.push(name.clone()),
                    LayoutNode::Group { children, .. } => collect(children, out),
                }
            }
        }

        let mut names = Vec::new();
        collect(&self.children, &mut names);
        names
    }

    /// Whether a case with this name exists anywhere in the layout.
    pub fn contains_case(&self, name: &str) -> bool {
        fn search(nodes: &[LayoutNode], name: &str) -> bool {
            nodes.iter().any(|node| match node {
                LayoutNode::Case { name: case } => case == name,
                LayoutNode::Group { children, .. } => search(children, name),
            })
        }

        search(&self.children, name)
    }
}

type BuildFn = Arc<dyn Fn() -> Result<Box<dyn TestGroup>> + Send + Sync>;

/// Prototype for a registered spec: display name, instancing policy,
/// spec-declared interceptors, and the default construction rule for the
/// underlying group object.
#[derive(Clone)]
pub struct SpecDef {
    name: String,
    policy: InstancingPolicy,
    interceptors: Vec<Arc<dyn Interceptor>>,
    build: BuildFn,
}

impl SpecDef {
    pub fn new(
        name: impl Into<String>,
        policy: InstancingPolicy,
        build: impl Fn() -> Result<Box<dyn TestGroup>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            interceptors: Vec::new(),
            build: Arc::new(build),
        }
    }

    /// Append a spec-declared interceptor. Declaration order is wrap order:
    /// earlier interceptors end up outermost.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> InstancingPolicy {
        self.policy
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Build a new instance of the underlying group object.
    pub fn instantiate(&self) -> Result<Box<dyn TestGroup>> {
        (self.build)()
    }
}

impl fmt::Debug for SpecDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecDef")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

type CaseFn = Box<dyn FnMut() -> Result<()> + Send>;

/// A [`TestGroup`] backed by closures, for groups that do not need their own
/// struct. Case names must be unique within one group.
#[derive(Default)]
pub struct FnGroup {
    layout: GroupLayout,
    cases: Vec<(String, CaseFn)>,
}

impl FnGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf case backed by a closure.
    pub fn case(
        mut self,
        name: impl Into<String>,
        body: impl FnMut() -> Result<()> + Send + 'static,
    ) -> Self {
        let name = name.into();
        self.layout.children.push(LayoutNode::Case { name: name.clone() });
        self.cases.push((name, Box::new(body)));
        self
    }

    /// Append a nested group; its cases flatten into this group's case set.
    pub fn group(mut self, name: impl Into<String>, nested: FnGroup) -> Self {
        self.layout.children.push(LayoutNode::Group {
            name: name.into(),
            children: nested.layout.children,
        });
        self.cases.extend(nested.cases);
        self
    }
}

impl TestGroup for FnGroup {
    fn layout(&self) -> GroupLayout {
        self.layout.clone()
    }

    fn run_case(&mut self, name: &str) -> Result<()> {
        match self.cases.iter_mut().find(|(case, _)| case == name) {
            Some((_, body)) => body(),
            None => Err(anyhow!("no case named `{name}` in this group")),
        }
    }
}

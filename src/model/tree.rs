//! Node-tree arena
//!
//! The discovered hierarchy of containers and cases, stored as an arena of
//! nodes addressed by opaque handles. Parent links are handles, not owning
//! references, so the tree stays acyclic by construction.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::model::spec::{SpecDef, TestGroup};

/// Opaque handle to a node in a [`TestTree`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Opaque handle to a spec slot in a [`TestTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpecId(usize);

/// Node discriminant, dispatched by explicit `match`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Container,
    Case,
}

/// One node of the discovered tree.
#[derive(Debug)]
pub struct TestNode {
    pub id: NodeId,
    /// Stable unique identifier, e.g. `[engine:specrun]/[spec:math]/[case:adds]`.
    pub unique_id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Parent handle; `None` only for the engine root.
    pub parent: Option<NodeId>,
    /// Child handles in declaration order; always empty for a Case.
    pub children: Vec<NodeId>,
    /// Owning spec, for lookup only; `None` only for the engine root.
    pub spec: Option<SpecId>,
}

/// Per-spec slot: the registered prototype and the instance built at
/// discovery time. Under `SharedInstance` that instance is reused by every
/// case; under `PerTest` it only served discovery.
pub struct SpecSlot {
    pub def: Arc<SpecDef>,
    pub shared: Mutex<Box<dyn TestGroup>>,
}

/// Immutable-after-discovery arena of test nodes plus spec slots.
pub struct TestTree {
    nodes: Vec<TestNode>,
    specs: Vec<SpecSlot>,
    root: NodeId,
}

impl TestTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TestNode {
        &self.nodes[id.0]
    }

    pub fn spec(&self, id: SpecId) -> &SpecSlot {
        &self.specs[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of executable leaf cases in the tree.
    pub fn case_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Case)
            .count()
    }

    /// Whether this node is a spec root: a container directly under the
    /// engine root, owning the subtree of one spec.
    pub fn is_spec_root(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.spec.is_some() && node.parent == Some(self.root)
    }

    /// Handles of the subtree under `from`, in pre-order, `from` included.
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            // Reversed so children pop in declaration order.
            for child in self.node(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }
}

/// Assembles a [`TestTree`] during discovery.
pub struct TreeBuilder {
    nodes: Vec<TestNode>,
    specs: Vec<SpecSlot>,
    root: NodeId,
}

impl TreeBuilder {
    /// Start a tree with a synthetic engine-root container.
    pub fn new(engine_id: &str) -> Self {
        let root = NodeId(0);
        let nodes = vec![TestNode {
            id: root,
            unique_id: format!("[engine:{engine_id}]"),
            name: engine_id.to_string(),
            kind: NodeKind::Container,
            parent: None,
            children: Vec::new(),
            spec: None,
        }];
        Self {
            nodes,
            specs: Vec::new(),
            root,
        }
    }

    /// Register a spec slot (prototype plus discovery-time instance).
    pub fn add_spec(&mut self, def: Arc<SpecDef>, instance: Box<dyn TestGroup>) -> SpecId {
        let id = SpecId(self.specs.len());
        self.specs.push(SpecSlot {
            def,
            shared: Mutex::new(instance),
        });
        id
    }

    /// Add a spec-root container directly under the engine root.
    pub fn add_spec_root(&mut self, spec: SpecId, name: &str) -> NodeId {
        self.push_node(self.root, name, NodeKind::Container, Some(spec), "spec")
    }

    /// Add a nested container under `parent`.
    pub fn add_group(&mut self, parent: NodeId, name: &str, spec: SpecId) -> NodeId {
        self.push_node(parent, name, NodeKind::Container, Some(spec), "group")
    }

    /// Add a leaf case under `parent`.
    pub fn add_case(&mut self, parent: NodeId, name: &str, spec: SpecId) -> NodeId {
        self.push_node(parent, name, NodeKind::Case, Some(spec), "case")
    }

    fn push_node(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        spec: Option<SpecId>,
        segment: &str,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let unique_id = format!("{}/[{segment}:{name}]", self.nodes[parent.0].unique_id);
        self.nodes.push(TestNode {
            id,
            unique_id,
            name: name.to_string(),
            kind,
            parent: Some(parent),
            children: Vec::new(),
            spec,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn finish(self) -> TestTree {
        TestTree {
            nodes: self.nodes,
            specs: self.specs,
            root: self.root,
        }
    }
}

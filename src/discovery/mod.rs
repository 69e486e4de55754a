//! Spec discovery
//!
//! Resolves selector-style requests against the spec registry and assembles
//! the node tree from each selected spec's declared layout.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::engine::ENGINE_ID;
use crate::model::{LayoutNode, NodeId, SpecDef, SpecId, TestTree, TreeBuilder};

/// Discovery failures; the tree could not be built.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no spec registered under the name `{0}`")]
    UnknownSpec(String),

    #[error("a spec named `{0}` is already registered")]
    DuplicateSpec(String),

    #[error("spec `{spec}` declares more than one case named `{case}`")]
    DuplicateCase { spec: String, case: String },

    #[error("selection matched no registered specs")]
    EmptySelection,

    #[error("failed to instantiate spec `{spec}`: {source}")]
    Instantiation {
        spec: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Ordered set of registered spec prototypes.
#[derive(Default)]
pub struct SpecRegistry {
    defs: Vec<Arc<SpecDef>>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec. Names must be unique; they are the lookup key for
    /// explicit selection.
    pub fn register(&mut self, def: SpecDef) -> Result<(), DiscoveryError> {
        if self.defs.iter().any(|d| d.name() == def.name()) {
            return Err(DiscoveryError::DuplicateSpec(def.name().to_string()));
        }
        self.defs.push(Arc::new(def));
        Ok(())
    }

    pub fn defs(&self) -> &[Arc<SpecDef>] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Selector-style discovery input: explicit spec names, name prefixes, or a
/// full scan of the registry, unioned into one selection.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryRequest {
    spec_names: Vec<String>,
    name_prefixes: Vec<String>,
    scan_all: bool,
}

impl DiscoveryRequest {
    /// Select every registered spec.
    pub fn scan_all() -> Self {
        Self {
            scan_all: true,
            ..Self::default()
        }
    }

    /// Select a spec by exact name. Unknown names fail discovery.
    pub fn with_spec(mut self, name: impl Into<String>) -> Self {
        self.spec_names.push(name.into());
        self
    }

    /// Select every spec whose name starts with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefixes.push(prefix.into());
        self
    }
}

/// Builds node trees from the registry. Deterministic: the same registry and
/// request always yield the same tree shape and case names.
pub struct Discoverer {
    registry: SpecRegistry,
}

impl Discoverer {
    pub fn new(registry: SpecRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SpecRegistry {
        &self.registry
    }

    /// Resolve the request and assemble the tree: one spec-root container per
    /// selected spec under a synthetic engine root.
    pub fn discover(&self, request: &DiscoveryRequest) -> Result<TestTree, DiscoveryError> {
        let selected = self.select(request)?;
        if selected.is_empty() {
            return Err(DiscoveryError::EmptySelection);
        }

        let mut builder = TreeBuilder::new(ENGINE_ID);
        for def in selected {
            let instance = def.instantiate().map_err(|source| {
                DiscoveryError::Instantiation {
                    spec: def.name().to_string(),
                    source,
                }
            })?;
            let layout = instance.layout();
            ensure_unique_case_names(&def, layout.case_names())?;

            debug!("discovered spec `{}` ({})", def.name(), def.policy());
            let spec = builder.add_spec(Arc::clone(&def), instance);
            let spec_root = builder.add_spec_root(spec, def.name());
            add_layout(&mut builder, spec_root, spec, &layout.children);
        }

        Ok(builder.finish())
    }

    /// Union of explicit names, prefix matches, and the full scan, in
    /// registration order.
    fn select(&self, request: &DiscoveryRequest) -> Result<Vec<Arc<SpecDef>>, DiscoveryError> {
        for name in &request.spec_names {
            if !self.registry.defs.iter().any(|d| d.name() == name) {
                return Err(DiscoveryError::UnknownSpec(name.clone()));
            }
        }

        let selected = self
            .registry
            .defs
            .iter()
            .filter(|def| {
                request.scan_all
                    || request.spec_names.iter().any(|n| n == def.name())
                    || request
                        .name_prefixes
                        .iter()
                        .any(|p| def.name().starts_with(p.as_str()))
            })
            .cloned()
            .collect();

        Ok(selected)
    }
}

fn ensure_unique_case_names(
    def: &Arc<SpecDef>,
    names: Vec<String>,
) -> Result<(), DiscoveryError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.clone()) {
            return Err(DiscoveryError::DuplicateCase {
                spec: def.name().to_string(),
                case: name,
            });
        }
    }
    Ok(())
}

fn add_layout(builder: &mut TreeBuilder, parent: NodeId, spec: SpecId, nodes: &[LayoutNode]) {
    for node in nodes {
        match node {
            LayoutNode::Case { name } => {
                builder.add_case(parent, name, spec);
            }
            LayoutNode::Group { name, children } => {
                let group = builder.add_group(parent, name, spec);
                add_layout(builder, group, spec, children);
            }
        }
    }
}

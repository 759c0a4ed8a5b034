//! Nodes: one provisionable machine within a system
//!
//! A node declares what it provides (`run_list`) and what it needs before it
//! can be provisioned (`dependencies`). Its place in the dependency graph
//! (`parents` / `children`) is derived state owned by the [`System`] it
//! belongs to and is only ever written by the system's rebalancing pass.
//!
//! [`System`]: crate::System

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runlist::{RunList, RunListItem};

/// Free-form per-node or per-system options
pub type Options = BTreeMap<String, serde_json::Value>;

/// Default multiplier applied to each parent's weight.
pub const DEFAULT_PARENT_MULTIPLIER: u64 = 5;

// ── NodeId ───────────────────────────────────────────────────────────

/// Position of a node inside its owning system
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

// ── Node ─────────────────────────────────────────────────────────────

/// A provisioning unit
#[derive(Clone, Debug)]
pub struct Node {
    /// Human readable node name
    pub name: String,
    /// Capabilities this node provides
    pub run_list: RunList,
    /// Capabilities this node requires before it can provision
    pub dependencies: RunList,
    /// Free-form options, merged over the system options on lookup
    pub options: Options,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    parent_multiplier: u64,
}

impl Node {
    /// Create a node with empty run list and dependencies
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_list: RunList::new(),
            dependencies: RunList::new(),
            options: Options::new(),
            parents: Vec::new(),
            children: Vec::new(),
            parent_multiplier: DEFAULT_PARENT_MULTIPLIER,
        }
    }

    /// Override the multiplier used when weighing this node's parents.
    pub fn with_parent_multiplier(mut self, multiplier: u64) -> Self {
        self.parent_multiplier = multiplier;
        self
    }

    pub fn set_parent_multiplier(&mut self, multiplier: u64) {
        self.parent_multiplier = multiplier;
    }

    pub fn parent_multiplier(&self) -> u64 {
        self.parent_multiplier
    }

    /// The dependencies of `self` that `other` provides.
    pub fn matched_dependencies(&self, other: &Node) -> Vec<RunListItem> {
        self.dependencies
            .iter()
            .filter(|dep| other.run_list.contains(dep))
            .cloned()
            .collect()
    }

    /// Whether `other` provides at least one of this node's dependencies,
    /// together with the matched subset.
    pub fn depends_on(&self, other: &Node) -> (bool, Vec<RunListItem>) {
        let matched = self.matched_dependencies(other);
        (!matched.is_empty(), matched)
    }

    /// A node without dependencies is a root of the graph.
    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Same run list and same dependencies, regardless of name or options.
    pub fn same_definition(&self, other: &Node) -> bool {
        self.run_list == other.run_list && self.dependencies == other.dependencies
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn clear_edges(&mut self) {
        self.parents.clear();
        self.children.clear();
    }

    pub(crate) fn push_parent(&mut self, parent: NodeId) -> bool {
        if self.parents.contains(&parent) {
            return false;
        }
        self.parents.push(parent);
        true
    }

    pub(crate) fn push_child(&mut self, child: NodeId) -> bool {
        if self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        true
    }
}

//! Systems: the owning collection of nodes and its dependency graph
//!
//! The system is the sole owner of its nodes. Parent/child edges between
//! nodes are derived state: [`System::rebalance_nodes`] clears and fully
//! recomputes them, so callers must rebalance after changing any node's
//! run list or dependencies.
//!
//! # Rebalancing
//!
//! For every node with dependencies, each dependency token is satisfied by
//! exactly one providing node: the provider with the lowest [weight], ties
//! going to the node added first. The distinct selected providers become
//! the node's parents. Preferring light providers keeps dependents off the
//! end of already deep chains, which flattens the provisioning critical
//! path.
//!
//! Nodes are resolved in dependency order, so every candidate's own parents
//! (and therefore its weight) are final before it is compared. A cycle in
//! the "depends on" relation cannot be ordered and is rejected with
//! [`ModelError::DependencyCycle`].
//!
//! [weight]: System::weight

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::description::{NodeDescription, SystemDescription};
use crate::error::{ModelError, Result};
use crate::node::{Node, NodeId, Options};
use crate::runlist::{RunList, RunListItem};

/// A set of nodes provisioned together plus their shared options
#[derive(Clone, Debug, Default)]
pub struct System {
    nodes: Vec<Node>,
    /// Options shared by every node (node options take precedence)
    pub options: Options,
}

impl System {
    /// Create an empty system
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty system with shared options
    pub fn with_options(options: Options) -> Self {
        Self {
            nodes: Vec::new(),
            options,
        }
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Add a node to the system and return its id.
    ///
    /// Edges the node carried from elsewhere are dropped; the next
    /// rebalance decides its place in the graph.
    pub fn add(&mut self, mut node: Node) -> NodeId {
        node.clear_edges();
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(ModelError::NodeNotFound(id))
    }

    /// Mutable access to a node's definition.
    ///
    /// Changing `run_list` or `dependencies` invalidates the current edges
    /// until the next [`rebalance_nodes`](Self::rebalance_nodes).
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(ModelError::NodeNotFound(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Iterate nodes together with their ids, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the first node with the given name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }

    /// Every node except `id`.
    pub fn nodes_except(&self, id: NodeId) -> Vec<NodeId> {
        self.ids().filter(|other| *other != id).collect()
    }

    /// Nodes without dependencies.
    ///
    /// Decided from the declared dependencies, not from the edges, so the
    /// answer does not depend on whether a rebalance has run.
    pub fn roots(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.is_root())
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes with at least one dependency.
    pub fn dependent_nodes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| !n.is_root())
            .map(|(id, _)| id)
            .collect()
    }

    /// Apply one parent multiplier to every node.
    pub fn set_parent_multiplier(&mut self, multiplier: u64) {
        for node in &mut self.nodes {
            node.set_parent_multiplier(multiplier);
        }
    }

    // ── Options ──────────────────────────────────────────────────────

    /// Look up an option on the node, falling back to the system options.
    pub fn node_option(&self, id: NodeId, key: &str) -> Option<&Value> {
        self.nodes
            .get(id.0)
            .and_then(|n| n.options.get(key))
            .or_else(|| self.options.get(key))
    }

    /// The system options with the node's own options merged on top.
    pub fn effective_options(&self, id: NodeId) -> Result<Options> {
        let node = self.node(id)?;
        let mut merged = self.options.clone();
        merged.extend(node.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(merged)
    }

    /// The `[tag: name]` prefix used on every log line about a node.
    pub fn log_prefix(&self, id: NodeId) -> String {
        let name = self.nodes.get(id.0).map(|n| n.name.as_str()).unwrap_or("?");
        let tag = self
            .node_option(id, "tag")
            .and_then(Value::as_str)
            .unwrap_or("global");
        format!("[{}: {}]", tag, name)
    }

    // ── Graph ────────────────────────────────────────────────────────

    pub fn parents(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.parents())
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    /// Record `parent -> child`, setting the back-reference on the child.
    ///
    /// Adding an existing edge is a no-op. Self edges are rejected with
    /// [`ModelError::InvalidChild`], edges that would close a cycle with
    /// [`ModelError::DependencyCycle`].
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.node(parent)?;
        self.node(child)?;
        if parent == child {
            return Err(ModelError::InvalidChild(format!(
                "node `{}` cannot be its own child",
                self.nodes[parent.0].name
            )));
        }
        if let Some(path) = self.descendant_path(child, parent) {
            let mut nodes: Vec<String> =
                path.iter().map(|id| self.nodes[id.0].name.clone()).collect();
            nodes.push(self.nodes[child.0].name.clone());
            return Err(ModelError::DependencyCycle { nodes });
        }

        if self.nodes[parent.0].push_child(child) {
            self.nodes[child.0].push_parent(parent);
        }
        Ok(())
    }

    /// Drop every parent/child edge.
    pub fn clear_node_hierarchy(&mut self) {
        for node in &mut self.nodes {
            node.clear_edges();
        }
    }

    /// Relative cost of a node in the dependency chain.
    ///
    /// `1 + sum(parent.weight * parent_multiplier)`, so a node without
    /// parents weighs 1 and every parent makes a node strictly heavier.
    pub fn weight(&self, id: NodeId) -> u64 {
        let mut memo = vec![None; self.nodes.len()];
        self.weight_memo(id, &mut memo)
    }

    fn weight_memo(&self, id: NodeId, memo: &mut Vec<Option<u64>>) -> u64 {
        if let Some(w) = memo.get(id.0).copied().flatten() {
            return w;
        }
        let Some(node) = self.nodes.get(id.0) else {
            return 0;
        };
        let multiplier = node.parent_multiplier();
        let parents = node.parents().to_vec();
        let weight = parents.into_iter().fold(1u64, |acc, p| {
            acc.saturating_add(self.weight_memo(p, memo).saturating_mul(multiplier))
        });
        memo[id.0] = Some(weight);
        weight
    }

    /// Every other node that provides at least one of `id`'s dependencies,
    /// with the tokens it provides.
    pub fn dependencies_on_system(&self, id: NodeId) -> Result<Vec<(NodeId, Vec<RunListItem>)>> {
        let node = self.node(id)?;
        Ok(self
            .nodes_except(id)
            .into_iter()
            .filter_map(|other| {
                let (depends, matched) = node.depends_on(&self.nodes[other.0]);
                depends.then_some((other, matched))
            })
            .collect())
    }

    /// The providers `id` should hang from given the current edges: one per
    /// dependency token, lightest first, deduplicated in selection order.
    pub fn optimized_node_dependencies(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let candidates = self.dependencies_on_system(id)?;
        let mut memo = vec![None; self.nodes.len()];
        let mut selected: Vec<NodeId> = Vec::new();

        for token in self.node(id)?.dependencies.iter() {
            let best = candidates
                .iter()
                .filter(|(_, provided)| provided.contains(token))
                .map(|(candidate, _)| *candidate)
                .min_by_key(|candidate| (self.weight_memo(*candidate, &mut memo), candidate.0));

            match best {
                Some(provider) if !selected.contains(&provider) => selected.push(provider),
                Some(_) => {}
                None => {
                    tracing::debug!(
                        node = %self.nodes[id.0].name,
                        dependency = %token,
                        "No node in the system provides dependency"
                    );
                }
            }
        }

        Ok(selected)
    }

    /// Recompute every parent/child edge from scratch.
    ///
    /// Cycles are detected over the full "depends on" relation, where every
    /// node providing a required item counts, not only the lightest one
    /// that ends up as parent. A system is therefore rejected even when
    /// some other choice of providers would be acyclic. On error no edges
    /// remain.
    pub fn rebalance_nodes(&mut self) -> Result<()> {
        self.clear_node_hierarchy();

        let order = self.resolution_order()?;
        for id in order {
            if self.nodes[id.0].is_root() {
                continue;
            }
            for parent in self.optimized_node_dependencies(id)? {
                if let Err(e) = self.add_child(parent, id) {
                    self.clear_node_hierarchy();
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            roots = self.roots().len(),
            "System rebalanced"
        );
        Ok(())
    }

    /// Order nodes so each comes after every candidate provider of its
    /// dependencies, preferring insertion order among nodes that are ready
    /// at the same time.
    fn resolution_order(&self) -> Result<Vec<NodeId>> {
        let count = self.nodes.len();
        let mut providers: Vec<Vec<NodeId>> = Vec::with_capacity(count);
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        for id in self.ids() {
            let deps: Vec<NodeId> = self
                .dependencies_on_system(id)?
                .into_iter()
                .map(|(provider, _)| provider)
                .collect();
            for provider in &deps {
                dependents[provider.0].push(id);
            }
            providers.push(deps);
        }

        let mut pending: Vec<usize> = providers.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<NodeId> = self.ids().filter(|id| pending[id.0] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for dependent in &dependents[id.0] {
                pending[dependent.0] -= 1;
                if pending[dependent.0] == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        if order.len() < count {
            let resolved: HashSet<NodeId> = order.iter().copied().collect();
            return Err(ModelError::DependencyCycle {
                nodes: self.find_cycle(&providers, &resolved),
            });
        }
        Ok(order)
    }

    /// Walk unresolved "depends on" edges until a node repeats.
    fn find_cycle(&self, providers: &[Vec<NodeId>], resolved: &HashSet<NodeId>) -> Vec<String> {
        let Some(start) = self.ids().find(|id| !resolved.contains(id)) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(next) = providers[current.0]
                .iter()
                .copied()
                .find(|p| !resolved.contains(p))
            else {
                break;
            };
            if let Some(pos) = path.iter().position(|id| *id == next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|id| self.nodes[id.0].name.clone())
                    .collect();
                cycle.push(self.nodes[next.0].name.clone());
                return cycle;
            }
            path.push(next);
            current = next;
        }
        path.iter().map(|id| self.nodes[id.0].name.clone()).collect()
    }

    /// Path `from -> ... -> to` following child edges, if `to` is reachable.
    fn descendant_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut stack = vec![vec![from]];
        let mut seen = HashSet::new();
        while let Some(path) = stack.pop() {
            let last = *path.last()?;
            if last == to {
                return Some(path);
            }
            if !seen.insert(last) {
                continue;
            }
            for child in self.nodes[last.0].children() {
                let mut next = path.clone();
                next.push(*child);
                stack.push(next);
            }
        }
        None
    }

    // ── Declarative form ─────────────────────────────────────────────

    /// Build a system from its declarative description.
    pub fn from_description(description: SystemDescription) -> Result<Self> {
        let mut system = Self::with_options(description.options);
        for desc in description.nodes {
            let mut node = Node::new(desc.name);
            node.run_list = RunList::parse(&desc.run_list)?;
            node.dependencies = RunList::parse(&desc.dependencies)?;
            node.options = desc.options;
            system.add(node);
        }
        Ok(system)
    }

    /// Build a system from a JSON value, see [`SystemDescription::from_value`].
    pub fn from_value(value: Value) -> Result<Self> {
        Self::from_description(SystemDescription::from_value(value)?)
    }

    pub fn to_description(&self) -> SystemDescription {
        SystemDescription {
            options: self.options.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeDescription {
                    name: n.name.clone(),
                    run_list: n.run_list.to_strings(),
                    dependencies: n.dependencies.to_strings(),
                    options: n.options.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str, run_list: &[&str], deps: &[&str]) -> Node {
        let mut n = Node::new(name);
        n.run_list = RunList::parse(run_list).unwrap();
        n.dependencies = RunList::parse(deps).unwrap();
        n
    }

    #[test]
    fn test_roots_and_dependents_partition() {
        let mut system = System::new();
        let a = system.add(node("a", &["role[a]"], &[]));
        let b = system.add(node("b", &[], &["role[a]"]));
        let c = system.add(node("c", &[], &[]));

        assert_eq!(system.roots(), vec![a, c]);
        assert_eq!(system.dependent_nodes(), vec![b]);
    }

    #[test]
    fn test_rebalance_links_parent_and_child() {
        let mut system = System::new();
        let parent = system.add(node("parent", &["role[a]"], &[]));
        let child = system.add(node("child", &[], &["role[a]"]));

        system.rebalance_nodes().unwrap();
        assert_eq!(system.children(parent).unwrap(), &[child]);
        assert_eq!(system.parents(child).unwrap(), &[parent]);
        assert!(system.parents(parent).unwrap().is_empty());
    }

    #[test]
    fn test_rebalance_prefers_lighter_provider() {
        let mut system = System::new();
        let target = system.add(node("target", &[], &["role[a]", "role[b]"]));
        let heavy = system.add(node("heavy", &["role[a]"], &["recipe[heavy]"]));
        let root = system.add(node("root", &["recipe[heavy]"], &[]));
        let light = system.add(node("light", &["role[a]", "role[b]"], &[]));

        system.rebalance_nodes().unwrap();

        assert_eq!(system.parents(target).unwrap(), &[light]);
        assert_eq!(system.parents(heavy).unwrap(), &[root]);
        assert_eq!(system.weight(heavy), 1 + 5);
        assert_eq!(system.weight(light), 1);
        assert!(!system.children(heavy).unwrap().contains(&target));
    }

    #[test]
    fn test_equal_weight_tie_goes_to_first_added() {
        let mut system = System::new();
        let first = system.add(node("first", &["role[db]"], &[]));
        let _second = system.add(node("second", &["role[db]"], &[]));
        let app = system.add(node("app", &[], &["role[db]"]));

        system.rebalance_nodes().unwrap();
        assert_eq!(system.parents(app).unwrap(), &[first]);
    }

    #[test]
    fn test_one_provider_for_several_tokens_is_added_once() {
        let mut system = System::new();
        let both = system.add(node("both", &["role[a]", "role[b]"], &[]));
        let app = system.add(node("app", &[], &["role[a]", "role[b]"]));

        system.rebalance_nodes().unwrap();
        assert_eq!(system.parents(app).unwrap(), &[both]);
        assert_eq!(system.children(both).unwrap(), &[app]);
    }

    #[test]
    fn test_rebalance_is_idempotent() {
        let mut system = System::new();
        system.add(node("db", &["role[db]"], &[]));
        system.add(node("cache", &["role[cache]"], &["role[db]"]));
        system.add(node("app", &["role[app]"], &["role[db]", "role[cache]"]));
        system.add(node("lb", &[], &["role[app]"]));

        system.rebalance_nodes().unwrap();
        let first: Vec<(Vec<NodeId>, Vec<NodeId>)> = system
            .nodes()
            .iter()
            .map(|n| (n.parents().to_vec(), n.children().to_vec()))
            .collect();

        system.rebalance_nodes().unwrap();
        let second: Vec<(Vec<NodeId>, Vec<NodeId>)> = system
            .nodes()
            .iter()
            .map(|n| (n.parents().to_vec(), n.children().to_vec()))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_rebalance_drops_stale_edges() {
        let mut system = System::new();
        let db = system.add(node("db", &["role[db]"], &[]));
        let app = system.add(node("app", &[], &["role[db]"]));
        system.rebalance_nodes().unwrap();
        assert_eq!(system.parents(app).unwrap(), &[db]);

        system.node_mut(app).unwrap().dependencies.clear();
        system.rebalance_nodes().unwrap();
        assert!(system.parents(app).unwrap().is_empty());
        assert!(system.children(db).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut system = System::new();
        system.add(node("a", &["role[a]"], &["role[b]"]));
        system.add(node("b", &["role[b]"], &["role[a]"]));
        system.add(node("c", &["role[c]"], &[]));

        let err = system.rebalance_nodes().unwrap_err();
        match err {
            ModelError::DependencyCycle { nodes } => {
                assert!(nodes.contains(&"a".to_string()));
                assert!(nodes.contains(&"b".to_string()));
                assert!(!nodes.contains(&"c".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(system
            .nodes()
            .iter()
            .all(|n| n.parents().is_empty() && n.children().is_empty()));
    }

    #[test]
    fn test_cycle_through_any_candidate_provider_is_rejected() {
        // b could hang from c instead of a, but a still provides role[x]
        let mut system = System::new();
        system.add(node("a", &["role[x]"], &["role[y]"]));
        system.add(node("b", &["role[y]"], &["role[x]"]));
        system.add(node("c", &["role[x]"], &[]));

        match system.rebalance_nodes() {
            Err(ModelError::DependencyCycle { nodes }) => {
                assert!(nodes.contains(&"a".to_string()));
                assert!(nodes.contains(&"b".to_string()));
            }
            other => panic!("expected a dependency cycle, got {other:?}"),
        }
        assert!(system.nodes().iter().all(|n| n.parents().is_empty()));
    }

    #[test]
    fn test_weight_grows_with_parents() {
        let mut system = System::new();
        let a = system.add(node("a", &["role[a]"], &[]));
        let b = system.add(node("b", &["role[b]"], &["role[a]"]));
        let c = system.add(node("c", &[], &["role[b]"]));
        system.rebalance_nodes().unwrap();

        assert_eq!(system.weight(a), 1);
        assert_eq!(system.weight(b), 6);
        assert_eq!(system.weight(c), 31);
    }

    #[test]
    fn test_add_child_validation() {
        let mut system = System::new();
        let a = system.add(Node::new("a"));
        let b = system.add(Node::new("b"));

        assert!(matches!(system.add_child(a, a), Err(ModelError::InvalidChild(_))));
        assert!(matches!(
            system.add_child(a, NodeId(9)),
            Err(ModelError::NodeNotFound(_))
        ));

        system.add_child(a, b).unwrap();
        system.add_child(a, b).unwrap();
        assert_eq!(system.children(a).unwrap(), &[b]);
        assert_eq!(system.parents(b).unwrap(), &[a]);

        assert!(matches!(
            system.add_child(b, a),
            Err(ModelError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_node_options_win_over_system_options() {
        let value = json!({
            "options": { "tag": "sys", "image": "base", "size": "small" },
            "nodes": [
                { "name": "web", "options": { "size": "large" } }
            ]
        });
        let system = System::from_value(value).unwrap();
        let web = system.find("web").unwrap();

        assert_eq!(system.node_option(web, "size"), Some(&json!("large")));
        assert_eq!(system.node_option(web, "image"), Some(&json!("base")));
        assert_eq!(system.node_option(web, "missing"), None);

        let merged = system.effective_options(web).unwrap();
        assert_eq!(merged.get("size"), Some(&json!("large")));
        assert_eq!(merged.get("tag"), Some(&json!("sys")));
        assert_eq!(system.log_prefix(web), "[sys: web]");
    }

    #[test]
    fn test_log_prefix_defaults_to_global() {
        let mut system = System::new();
        let id = system.add(Node::new("solo"));
        assert_eq!(system.log_prefix(id), "[global: solo]");
    }

    #[test]
    fn test_invalid_token_in_description() {
        let value = json!({ "nodes": [{ "name": "x", "run_list": ["role[bad name]"] }] });
        assert!(matches!(
            System::from_value(value),
            Err(ModelError::InvalidRunlistName { .. })
        ));
    }

    #[test]
    fn test_description_round_trip() {
        let value = json!({
            "options": { "provider": "local" },
            "nodes": [
                { "name": "db", "run_list": ["role[db]"], "dependencies": [], "options": {} },
                {
                    "name": "app",
                    "run_list": ["recipe[app]"],
                    "dependencies": ["role[db]"],
                    "options": { "size": 2 }
                }
            ]
        });
        let system = System::from_value(value.clone()).unwrap();
        assert_eq!(system.to_description().to_value(), value);
    }

    #[test]
    fn test_set_parent_multiplier() {
        let mut system = System::new();
        let a = system.add(node("a", &["role[a]"], &[]));
        let b = system.add(node("b", &[], &["role[a]"]));
        system.set_parent_multiplier(2);
        system.rebalance_nodes().unwrap();
        assert_eq!(system.weight(a), 1);
        assert_eq!(system.weight(b), 3);
        assert_eq!(system.node(b).unwrap().name, "b");
    }
}

//! `muster graph`: resolve and print a system's dependency graph

use std::fmt::Write as _;
use std::path::Path;

use muster_provisioner::DescriptionFormat;
use muster_types::{NodeId, System};
use serde::Serialize;

use super::read_description;
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

/// One node of the resolved graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub name: String,
    pub run_list: Vec<String>,
    pub dependencies: Vec<String>,
    pub weight: u64,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// Resolved dependency graph of a system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphView {
    pub roots: Vec<String>,
    pub nodes: Vec<GraphNode>,
}

impl GraphView {
    /// Snapshot the edges of a rebalanced system
    pub fn from_system(system: &System) -> CliResult<Self> {
        let names = |ids: &[NodeId]| -> CliResult<Vec<String>> {
            ids.iter()
                .map(|id| Ok(system.node(*id)?.name.clone()))
                .collect()
        };

        let roots = names(&system.roots())?;
        let nodes = system
            .iter()
            .map(|(id, node)| {
                Ok(GraphNode {
                    name: node.name.clone(),
                    run_list: node.run_list.to_strings(),
                    dependencies: node.dependencies.to_strings(),
                    weight: system.weight(id),
                    parents: names(node.parents())?,
                    children: names(node.children())?,
                })
            })
            .collect::<CliResult<Vec<_>>>()?;

        Ok(Self { roots, nodes })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Roots: {}", list(&self.roots));
        for node in &self.nodes {
            let _ = writeln!(out, "{} (weight {})", node.name, node.weight);
            let _ = writeln!(out, "  run_list:     {}", list(&node.run_list));
            let _ = writeln!(out, "  dependencies: {}", list(&node.dependencies));
            let _ = writeln!(out, "  parents:      {}", list(&node.parents));
            let _ = writeln!(out, "  children:     {}", list(&node.children));
        }
        out
    }
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Parse a description and rebalance it into a graph
pub fn resolve(
    text: &str,
    format: DescriptionFormat,
    parent_multiplier: u64,
) -> CliResult<System> {
    let value = format.parse(text)?;
    let mut system = System::from_value(value)?;
    system.set_parent_multiplier(parent_multiplier);
    system.rebalance_nodes()?;
    Ok(system)
}

pub fn execute(file: &Path, parent_multiplier: u64, format: OutputFormat) -> CliResult<()> {
    let (text, description_format) = read_description(file)?;
    let system = resolve(&text, description_format, parent_multiplier)?;
    tracing::debug!(file = %file.display(), nodes = system.len(), "System resolved");

    let view = GraphView::from_system(&system)?;
    output::print(format, &view, || view.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use muster_types::ModelError;

    const THREE_TIER: &str = r#"
nodes:
  - name: web
    dependencies: ["role[app]"]
  - name: app
    run_list: ["role[app]"]
    dependencies: ["role[db]"]
  - name: db
    run_list: ["role[db]"]
"#;

    #[test]
    fn test_graph_view() {
        let system = resolve(THREE_TIER, DescriptionFormat::Yaml, 5).unwrap();
        let view = GraphView::from_system(&system).unwrap();

        assert_eq!(view.roots, vec!["db"]);
        let web = &view.nodes[0];
        assert_eq!(web.parents, vec!["app"]);
        assert_eq!(web.weight, 31);
        let db = &view.nodes[2];
        assert_eq!(db.children, vec!["app"]);
        assert_eq!(db.weight, 1);
    }

    #[test]
    fn test_render_text() {
        let system = resolve(THREE_TIER, DescriptionFormat::Yaml, 5).unwrap();
        let text = GraphView::from_system(&system).unwrap().render();

        assert!(text.starts_with("Roots: db\n"));
        assert!(text.contains("app (weight 6)"));
        assert!(text.contains("  parents:      db\n"));
        assert!(text.contains("  children:     -\n"));
    }

    #[test]
    fn test_cycle_is_reported() {
        let json = r#"{ "nodes": [
            { "name": "a", "run_list": ["role[a]"], "dependencies": ["role[b]"] },
            { "name": "b", "run_list": ["role[b]"], "dependencies": ["role[a]"] }
        ] }"#;
        let result = resolve(json, DescriptionFormat::Json, 5);
        assert!(matches!(
            result,
            Err(CliError::Model(ModelError::DependencyCycle { .. }))
        ));
    }
}

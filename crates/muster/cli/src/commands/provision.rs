//! `muster provision`: provision a system from a description file

use std::fmt::Write as _;
use std::path::Path;

use muster_provisioner::{DescriptionFormat, ProvisionReport, Provisioner, ProvisionerConfig};
use serde::Serialize;

use super::read_description;
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

/// Per-node line of the summary
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub state: String,
    pub time_used_ms: u64,
    pub transitions: usize,
}

/// Outcome of a provisioning run
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionSummary {
    pub provider: String,
    pub tag: Option<String>,
    pub state: String,
    pub failures: u32,
    pub nodes: Vec<NodeSummary>,
}

impl ProvisionSummary {
    pub fn from_report(report: &ProvisionReport, provider: impl Into<String>) -> Self {
        let nodes = report
            .nodes
            .iter()
            .map(|node| NodeSummary {
                name: node.name.clone(),
                state: node.state.to_string(),
                time_used_ms: u64::try_from(node.time_used.as_millis()).unwrap_or(u64::MAX),
                transitions: node.history.len(),
            })
            .collect();

        Self {
            provider: provider.into(),
            tag: report
                .system
                .options
                .get("tag")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            state: report.state.to_string(),
            failures: report.failures,
            nodes,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "System {} {} via {} ({} failed attempts)",
            self.tag.as_deref().unwrap_or("(untagged)"),
            self.state,
            self.provider,
            self.failures
        );
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  {:<20} {:<12} {:>8} ms",
                node.name, node.state, node.time_used_ms
            );
        }
        out
    }
}

/// Provision the system described by `text` and summarize the run
pub async fn provision(
    text: &str,
    format: DescriptionFormat,
    config: &ProvisionerConfig,
) -> CliResult<ProvisionSummary> {
    let mut provisioner = Provisioner::new(config.clone())?;
    provisioner.setup_system_str(text, format)?;
    let provider = provisioner.provider().name().to_string();

    let report = provisioner.begin_provisioning().await?;
    Ok(ProvisionSummary::from_report(&report, provider))
}

pub async fn execute(
    file: &Path,
    config: &ProvisionerConfig,
    format: OutputFormat,
) -> CliResult<()> {
    let (text, description_format) = read_description(file)?;
    tracing::info!(file = %file.display(), provider = %config.provider, "Provisioning system");

    let summary = match provision(&text, description_format, config).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(file = %file.display(), error = %e, "Provisioning failed");
            return Err(e);
        }
    };
    output::print(format, &summary, || summary.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use muster_provisioner::ProvisionError;

    #[tokio::test(start_paused = true)]
    async fn test_provision_with_local_provider() {
        let json = r#"{
            "nodes": [
                { "name": "db", "run_list": ["role[db]"] },
                { "name": "app", "dependencies": ["role[db]"] }
            ]
        }"#;
        let summary = provision(json, DescriptionFormat::Json, &ProvisionerConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.provider, "local");
        assert_eq!(summary.state, "complete");
        assert_eq!(summary.failures, 0);
        assert!(summary.tag.as_deref().unwrap().starts_with("muster-"));
        assert!(summary.nodes.iter().all(|n| n.state == "complete"));

        let text = summary.render();
        assert!(text.contains("complete via local (0 failed attempts)"));
        assert!(text.contains("  db "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_provider_fails_before_provisioning() {
        let json = r#"{ "options": { "provider": "ec2" }, "nodes": [] }"#;
        let result = provision(json, DescriptionFormat::Json, &ProvisionerConfig::default()).await;
        assert!(matches!(
            result,
            Err(CliError::Provision(ProvisionError::InvalidProvider(_)))
        ));
    }
}

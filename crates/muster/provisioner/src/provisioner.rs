//! Top-level provisioning entry point
//!
//! [`Provisioner`] turns a declarative system description into a running
//! [`SystemProvisioner`]: it builds and validates the system, picks the
//! provider, tags the system and runs it to completion.

use std::path::Path;
use std::sync::Arc;

use muster_types::{ModelError, System};
use serde_json::Value;

use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, Result};
use crate::provider::{Provider, ProviderRegistry};
use crate::system::{ProvisionReport, SystemProvisioner};

/// Encoding of a system description document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionFormat {
    Json,
    Yaml,
}

impl DescriptionFormat {
    /// `.yaml` / `.yml` files are YAML, everything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DescriptionFormat::Yaml
            }
            _ => DescriptionFormat::Json,
        }
    }

    /// Decode a document into a JSON value.
    pub fn parse(&self, text: &str) -> Result<Value> {
        let value = match self {
            DescriptionFormat::Json => serde_json::from_str(text)
                .map_err(|e| ModelError::InvalidSystemHash(e.to_string()))?,
            DescriptionFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|e| ModelError::InvalidSystemHash(e.to_string()))?,
        };
        Ok(value)
    }
}

/// Builds systems and runs them against a provider
pub struct Provisioner {
    config: ProvisionerConfig,
    registry: ProviderRegistry,
    provider: Arc<dyn Provider>,
    system: Option<System>,
}

impl Provisioner {
    /// Provisioner using the built-in providers
    pub fn new(config: ProvisionerConfig) -> Result<Self> {
        Self::with_registry(config, ProviderRegistry::with_defaults())
    }

    /// Provisioner resolving providers from `registry`.
    ///
    /// The configured provider must exist in the registry.
    pub fn with_registry(config: ProvisionerConfig, registry: ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let provider = registry.create(&config.provider, &config)?;
        Ok(Self {
            config,
            registry,
            provider,
            system: None,
        })
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn system(&self) -> Option<&System> {
        self.system.as_ref()
    }

    /// Build the system to provision from its declarative description.
    ///
    /// The system option `provider`, when present, selects the provider.
    /// The dependency graph is rebalanced once so unresolvable systems are
    /// rejected before any infrastructure is created.
    pub fn setup_system(&mut self, description: Value) -> Result<&System> {
        let mut system = System::from_value(description)?;
        system.set_parent_multiplier(self.config.parent_multiplier);
        system.rebalance_nodes()?;

        if let Some(name) = system.options.get("provider").and_then(Value::as_str) {
            self.provider = self.registry.create(name, &self.config)?;
        }

        tracing::info!(
            provider = %self.provider.name(),
            nodes = system.len(),
            roots = system.roots().len(),
            "System set up"
        );
        let system: &System = self.system.insert(system);
        Ok(system)
    }

    /// Parse a document and set it up as the system to provision.
    pub fn setup_system_str(&mut self, text: &str, format: DescriptionFormat) -> Result<&System> {
        let value = format.parse(text)?;
        self.setup_system(value)
    }

    /// Create and tag the system with the provider and hand back its state
    /// machine without running it.
    pub async fn prepare(&mut self) -> Result<SystemProvisioner> {
        let mut system = self.system.take().ok_or(ProvisionError::NoSystem)?;

        self.provider.setup().await?;
        let tag = self
            .provider
            .create_system(&system, &self.config.tag_prefix)
            .await?;
        system.options.insert("tag".into(), Value::String(tag.clone()));
        tracing::info!(tag = %tag, provider = %self.provider.name(), "System created");

        Ok(SystemProvisioner::new(
            system,
            self.provider.clone(),
            self.config.clone(),
        ))
    }

    /// Provision the system set up with [`setup_system`](Self::setup_system).
    pub async fn begin_provisioning(&mut self) -> Result<ProvisionReport> {
        self.prepare().await?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DescriptionFormat::from_path(Path::new("system.yml")),
            DescriptionFormat::Yaml
        );
        assert_eq!(
            DescriptionFormat::from_path(Path::new("system.YAML")),
            DescriptionFormat::Yaml
        );
        assert_eq!(
            DescriptionFormat::from_path(Path::new("system.json")),
            DescriptionFormat::Json
        );
    }

    #[test]
    fn test_yaml_description() {
        let mut provisioner = Provisioner::new(ProvisionerConfig::default()).unwrap();
        let yaml = r#"
options:
  provider: Local
nodes:
  - name: db
    run_list: ["role[db]"]
  - name: app
    dependencies: ["role[db]"]
"#;
        let system = provisioner
            .setup_system_str(yaml, DescriptionFormat::Yaml)
            .unwrap();
        let db = system.find("db").unwrap();
        let app = system.find("app").unwrap();
        assert_eq!(system.children(db).unwrap(), &[app]);
        assert_eq!(provisioner.provider().name(), "local");
    }

    #[test]
    fn test_unknown_system_provider() {
        let mut provisioner = Provisioner::new(ProvisionerConfig::default()).unwrap();
        let result = provisioner.setup_system(json!({
            "options": { "provider": "rackspace" },
            "nodes": []
        }));
        assert!(matches!(result, Err(ProvisionError::InvalidProvider(_))));
    }

    #[test]
    fn test_unknown_configured_provider() {
        let config = ProvisionerConfig {
            provider: "vagrant".into(),
            ..Default::default()
        };
        assert!(matches!(
            Provisioner::new(config),
            Err(ProvisionError::InvalidProvider(_))
        ));
    }

    #[test]
    fn test_cyclic_system_is_rejected_up_front() {
        let mut provisioner = Provisioner::new(ProvisionerConfig::default()).unwrap();
        let result = provisioner.setup_system(json!({
            "nodes": [
                { "name": "a", "run_list": ["role[a]"], "dependencies": ["role[b]"] },
                { "name": "b", "run_list": ["role[b]"], "dependencies": ["role[a]"] }
            ]
        }));
        assert!(matches!(
            result,
            Err(ProvisionError::Model(ModelError::DependencyCycle { .. }))
        ));
        assert!(provisioner.system().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisioning_without_system() {
        let mut provisioner = Provisioner::new(ProvisionerConfig::default()).unwrap();
        assert!(matches!(
            provisioner.begin_provisioning().await,
            Err(ProvisionError::NoSystem)
        ));
    }
}

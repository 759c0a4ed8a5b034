//! Declarative system descriptions
//!
//! The shape consumed from front ends:
//!
//! ```json
//! {
//!   "options": { "provider": "local" },
//!   "nodes": [
//!     { "name": "db", "run_list": ["role[db]"], "dependencies": [], "options": {} }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::node::Options;

/// Declarative description of a whole system
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDescription {
    /// System-wide options
    #[serde(default)]
    pub options: Options,
    /// The nodes making up the system
    pub nodes: Vec<NodeDescription>,
}

/// Declarative description of a single node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    #[serde(default)]
    pub run_list: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub options: Options,
}

impl SystemDescription {
    /// Read a description out of an arbitrary JSON value.
    ///
    /// A value without a `nodes` key is rejected with
    /// [`ModelError::InvalidSystemHash`] before any other decoding happens.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value.get("nodes") {
            Some(serde_json::Value::Array(_)) => {}
            Some(_) => {
                return Err(ModelError::InvalidSystemHash(
                    "`nodes` must be a list of nodes".into(),
                ))
            }
            None => {
                return Err(ModelError::InvalidSystemHash(
                    "the system description must have a `nodes` key".into(),
                ))
            }
        }

        serde_json::from_value(value).map_err(|e| ModelError::InvalidSystemHash(e.to_string()))
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ModelError::InvalidSystemHash(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_nodes_key() {
        let result = SystemDescription::from_value(json!({ "options": {} }));
        assert!(matches!(result, Err(ModelError::InvalidSystemHash(_))));
    }

    #[test]
    fn test_nodes_must_be_a_list() {
        let result = SystemDescription::from_value(json!({ "nodes": "web" }));
        assert!(matches!(result, Err(ModelError::InvalidSystemHash(_))));
    }

    #[test]
    fn test_optional_fields_default() {
        let desc = SystemDescription::from_json_str(r#"{"nodes":[{"name":"solo"}]}"#).unwrap();
        assert!(desc.options.is_empty());
        assert_eq!(desc.nodes.len(), 1);
        assert!(desc.nodes[0].run_list.is_empty());
        assert!(desc.nodes[0].dependencies.is_empty());
    }

    #[test]
    fn test_node_without_name_is_invalid() {
        let result = SystemDescription::from_value(json!({ "nodes": [{ "run_list": [] }] }));
        assert!(matches!(result, Err(ModelError::InvalidSystemHash(_))));
    }
}

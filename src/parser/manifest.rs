//! Project manifest (`rill.yaml`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProjectError, Result, RillError};

/// Paths accepted for the project manifest.
pub const MANIFEST_PATHS: &[&str] = &["/rill.yaml", "/rill.yml"];

/// Returns true if the repo path is the project manifest.
#[must_use]
pub fn is_manifest_path(path: &str) -> bool {
    MANIFEST_PATHS.contains(&path)
}

/// Decoded `rill.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RillYaml {
    /// Compiler version the project targets.
    pub compiler: String,
    /// Project title.
    pub title: String,
    /// Project description.
    pub description: String,
    /// Connector definitions.
    pub connectors: Vec<ConnectorDef>,
    /// Default values of project variables.
    pub env: BTreeMap<String, serde_yaml::Value>,
}

/// Connector declared in `rill.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorDef {
    /// Connector name, referenced from resources.
    pub name: String,
    /// Driver type.
    #[serde(rename = "type")]
    pub driver: String,
    /// Default connector properties.
    pub defaults: BTreeMap<String, String>,
}

impl RillYaml {
    /// Decodes a manifest.
    ///
    /// An empty file decodes to the default manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::InvalidManifest`] if the YAML is invalid.
    pub fn parse(path: &str, content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            RillError::Project(ProjectError::InvalidManifest {
                path: path.to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Returns project variable defaults rendered as strings.
    #[must_use]
    pub fn variables(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Null => String::new(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                (k.clone(), value)
            })
            .collect()
    }

    /// Finds a connector by name.
    #[must_use]
    pub fn connector(&self, name: &str) -> Option<&ConnectorDef> {
        self.connectors.iter().find(|c| c.name == name)
    }
}

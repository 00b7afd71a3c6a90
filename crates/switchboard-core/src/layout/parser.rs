//! Layout parsing from YAML/JSON.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::defaults;

lazy_static! {
    /// Node ids: lowercase, digit/dash tail, at most 64 characters.
    static ref ID_PATTERN: Regex = Regex::new(r"^[a-z][a-z0-9-]{0,63}$").unwrap();
}

/// Errors that can occur when parsing layouts.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Failed to read layout file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Layout validation failed: {0}")]
    ValidationError(String),
}

/// Declaration of one circuit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitSpec {
    /// Unique identifier (e.g., "checkout-api").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Free-form grouping label.
    #[serde(default = "default_category")]
    pub category: String,

    /// Latency ceiling override, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
}

fn default_category() -> String {
    "general".to_string()
}

impl CircuitSpec {
    /// Create a spec with the default category and latency ceiling.
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            max_latency_ms: None,
        }
    }
}

/// Declaration of one panel and the circuits it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelSpec {
    /// Unique identifier (e.g., "payments").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Ordering position; panels are kept sorted by this.
    pub position: u32,

    /// Capacity override (default 50).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_circuits: Option<usize>,

    /// Circuits to register under this panel.
    #[serde(default)]
    pub circuits: Vec<CircuitSpec>,
}

impl PanelSpec {
    /// Create a spec with no circuits and the default capacity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, position: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            max_circuits: None,
            circuits: Vec::new(),
        }
    }
}

/// A full board declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardLayout {
    /// Layout format version (semver).
    pub layout_version: String,

    /// Human-readable board name.
    pub name: String,

    /// Detailed description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Panels in any order; position decides placement.
    pub panels: Vec<PanelSpec>,
}

impl BoardLayout {
    /// Parse a layout from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, LayoutError> {
        let layout: BoardLayout = serde_yaml::from_str(yaml)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Parse a layout from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        let layout: BoardLayout = serde_json::from_str(json)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Parse a layout from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a layout from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Validate the layout structure.
    fn validate(&self) -> Result<(), LayoutError> {
        if self.name.is_empty() {
            return Err(LayoutError::ValidationError("name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for panel in &self.panels {
            check_id(&panel.id)?;
            if !seen.insert(&panel.id) {
                return Err(LayoutError::ValidationError(format!(
                    "duplicate id: {}",
                    panel.id
                )));
            }

            let capacity = panel.max_circuits.unwrap_or(defaults::MAX_CIRCUITS_PER_PANEL);
            if capacity == 0 {
                return Err(LayoutError::ValidationError(format!(
                    "panel {} has zero capacity",
                    panel.id
                )));
            }
            if panel.circuits.len() > capacity {
                return Err(LayoutError::ValidationError(format!(
                    "panel {} declares {} circuits over its capacity of {}",
                    panel.id,
                    panel.circuits.len(),
                    capacity
                )));
            }

            for circuit in &panel.circuits {
                check_id(&circuit.id)?;
                if !seen.insert(&circuit.id) {
                    return Err(LayoutError::ValidationError(format!(
                        "duplicate id: {}",
                        circuit.id
                    )));
                }
                if let Some(max_ms) = circuit.max_latency_ms {
                    if max_ms <= 0.0 {
                        return Err(LayoutError::ValidationError(format!(
                            "circuit {} has a non-positive latency ceiling",
                            circuit.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn check_id(id: &str) -> Result<(), LayoutError> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(LayoutError::ValidationError(format!(
            "invalid id {:?}: must match ^[a-z][a-z0-9-]{{0,63}}$",
            id
        )))
    }
}

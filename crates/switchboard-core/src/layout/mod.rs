//! Board layout parsing and validation.
//!
//! A layout declares the breaker tree, panels and the circuits they own,
//! as structured data validated against JSON Schema. This module handles
//! parsing YAML/JSON layouts and validating them.

mod parser;
mod schema;

pub use parser::{BoardLayout, CircuitSpec, LayoutError, PanelSpec};
pub use schema::{check_layout, SchemaError};

//! Schema validation for layout documents.
//!
//! The layout schema ships embedded in the binary (spec/layout.schema.json)
//! and is compiled once on first use. Validating the raw document before
//! deserialization gives operators error locations that point into the file
//! they wrote; uniqueness and capacity rules a schema cannot express stay in
//! the parser.

use std::sync::OnceLock;
use thiserror::Error;

const LAYOUT_SCHEMA: &str = include_str!("../../../../spec/layout.schema.json");

static VALIDATOR: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Why a document failed schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The embedded schema itself failed to parse or compile.
    #[error("layout schema unusable: {0}")]
    Schema(String),

    /// The document does not conform; one message per violation.
    #[error("layout does not match the schema: {}", .0.join("; "))]
    Violations(Vec<String>),
}

fn validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    VALIDATOR
        .get_or_init(|| {
            let schema: serde_json::Value = serde_json::from_str(LAYOUT_SCHEMA)
                .map_err(|e| format!("embedded schema is not valid JSON: {e}"))?;
            jsonschema::options()
                .build(&schema)
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| SchemaError::Schema(e.clone()))
}

/// Validate a raw layout document against the embedded JSON schema.
///
/// Every violation is reported, each with the JSON pointer of the offending
/// value, so a layout with three bad ids surfaces all three at once.
pub fn check_layout(document: &serde_json::Value) -> Result<(), SchemaError> {
    let violations: Vec<String> = validator()?
        .iter_errors(document)
        .map(|err| format!("{} at {}", err, err.instance_path))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Violations(violations))
    }
}

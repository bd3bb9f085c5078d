//! JSON Schema validation for permissions configuration files.
//!
//! The schema catches structural mistakes (wrong types, missing names,
//! unknown or misspelled keys) before deserialization, so operators get every
//! structural error at once instead of serde's first-failure message.
//! Identifier safety is checked later by [`crate::config`].

use jsonschema::Validator;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// Configuration document validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Schema compilation failed during initialization
    #[error("JSON Schema compilation failed: {message}")]
    SchemaCompilation { message: String },

    /// A key the engine cannot run without is absent
    #[error("Missing required configuration key: {key}")]
    MissingKey { key: String },

    /// Validation failed with specific field errors
    #[error("Configuration validation failed with {error_count} error(s): {}", errors.join("; "))]
    ValidationFailed {
        error_count: usize,
        errors: Vec<String>,
    },
}

/// Keys that must be present at the top level.
const REQUIRED_KEYS: &[&str] = &["servers"];

/// Embedded JSON Schema for the configuration format
const CONFIG_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "SQLPerms permissions configuration",
  "type": "object",
  "required": ["servers"],
  "additionalProperties": false,
  "properties": {
    "servers": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name"],
        "additionalProperties": false,
        "properties": {
          "name": { "type": "string", "minLength": 1 },
          "auth_type": { "type": "string" },
          "username": { "type": "string" },
          "password": { "type": "string" },
          "password_env": { "type": "string", "minLength": 1 },
          "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
          "trust_server_certificate": { "type": "boolean" },
          "databases": {
            "type": "array",
            "items": {
              "type": "object",
              "required": ["name"],
              "additionalProperties": false,
              "properties": {
                "name": { "type": "string", "minLength": 1 },
                "permissions": {
                  "type": "array",
                  "items": {
                    "type": "object",
                    "required": ["login"],
                    "additionalProperties": false,
                    "properties": {
                      "login": { "type": "string", "minLength": 1 },
                      "user": { "type": "string", "minLength": 1 },
                      "login_type": { "type": "string" },
                      "roles": { "type": "array", "items": { "type": "string" } },
                      "grants": {
                        "type": "array",
                        "items": {
                          "type": "object",
                          "required": ["permission"],
                          "additionalProperties": false,
                          "properties": {
                            "permission": { "type": "string", "minLength": 1 },
                            "object": { "type": "string", "minLength": 1 }
                          }
                        }
                      }
                    }
                  }
                }
              }
            }
          }
        }
      }
    }
  }
}"#;

/// Compiled JSON Schema instance (initialized once)
static COMPILED_SCHEMA: OnceLock<Validator> = OnceLock::new();

fn compiled_schema() -> Result<&'static Validator, ValidationError> {
    if let Some(schema) = COMPILED_SCHEMA.get() {
        return Ok(schema);
    }

    let schema_json: Value =
        serde_json::from_str(CONFIG_SCHEMA).map_err(|e| ValidationError::SchemaCompilation {
            message: format!("Failed to parse embedded schema: {}", e),
        })?;

    let compiled = jsonschema::validator_for(&schema_json).map_err(|e| {
        ValidationError::SchemaCompilation {
            message: format!("Schema compilation error: {}", e),
        }
    })?;

    // Another caller may have won the race; either instance is equivalent.
    Ok(COMPILED_SCHEMA.get_or_init(|| compiled))
}

/// Validates a parsed configuration document against the embedded schema.
///
/// # Errors
/// Returns [`ValidationError::MissingKey`] when a required top-level key is
/// absent, or [`ValidationError::ValidationFailed`] listing every schema
/// violation.
///
/// # Example
/// ```rust
/// use sqlperms_core::validation::validate_config_document;
/// use serde_json::json;
///
/// let document = json!({ "servers": [ { "name": "SQL-SERVER-01" } ] });
/// assert!(validate_config_document(&document).is_ok());
/// assert!(validate_config_document(&json!({})).is_err());
/// ```
pub fn validate_config_document(document: &Value) -> Result<(), ValidationError> {
    if let Some(object) = document.as_object() {
        for key in REQUIRED_KEYS {
            if !object.contains_key(*key) {
                return Err(ValidationError::MissingKey {
                    key: (*key).to_string(),
                });
            }
        }
    }

    let schema = compiled_schema()?;
    let errors: Vec<String> = schema
        .iter_errors(document)
        .map(|error| error.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ValidationFailed {
            error_count: errors.len(),
            errors,
        })
    }
}

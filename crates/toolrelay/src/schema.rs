//! JSON Schema compilation and parameter validation for tool descriptors.

use jsonschema::JSONSchema;

use crate::error::{CoreError, CoreResult};

/// A compiled parameter schema.
pub struct ParameterSchema {
    compiled: JSONSchema,
}

impl ParameterSchema {
    /// Compile `schema`. An uncompilable schema is an `InvalidInput` error.
    pub fn compile(schema: &serde_json::Value) -> CoreResult<Self> {
        let compiled = JSONSchema::compile(schema).map_err(|error| {
            CoreError::InvalidInput(format!("invalid parameter schema: {error}"))
        })?;
        Ok(Self { compiled })
    }

    /// Validate parameters, returning every violation as a readable message.
    pub fn validate(&self, params: &serde_json::Value) -> Result<(), Vec<String>> {
        match self.compiled.validate(params) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{path}: {error}")
                    }
                })
                .collect()),
        }
    }
}

impl std::fmt::Debug for ParameterSchema {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("ParameterSchema").finish_non_exhaustive()
    }
}

//! Tool descriptors as declared by providers at registration time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of provider backing a tool.
///
/// Variant order is the tie-break order used by catalog resolution:
/// in-process first, then sandboxed, then remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    Sandboxed,
    Remote,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Local,
        ProviderKind::Sandboxed,
        ProviderKind::Remote,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Sandboxed => "sandboxed",
            ProviderKind::Remote => "remote",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single callable operation offered by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Exact, case-sensitive tool name.
    pub name: String,
    /// Provider that registered this descriptor. Overwritten by the catalog on
    /// registration so it always matches the registering provider.
    pub provider_kind: ProviderKind,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: i32,
    /// JSON Schema for the tool parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, provider_kind: ProviderKind, priority: i32) -> Self {
        Self {
            name: name.into(),
            provider_kind,
            priority,
            parameter_schema: None,
            category: None,
            description: None,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.parameter_schema = Some(schema);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

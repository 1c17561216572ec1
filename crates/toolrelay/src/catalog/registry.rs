//! Unified, priority-ordered tool name space across providers.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::schema::ParameterSchema;

use super::descriptor::{ProviderKind, ToolDescriptor};

/// One resolution candidate: the provider that offers the name plus its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: ProviderKind,
    pub descriptor: ToolDescriptor,
}

/// Catalog merging the descriptor sets of every provider kind.
///
/// Each provider kind owns exactly one descriptor set. Registering again
/// replaces that set wholesale. The same name may appear under several
/// kinds; [`ToolCatalog::resolve`] orders them by priority, then kind.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    providers: BTreeMap<ProviderKind, HashMap<String, ToolDescriptor>>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the descriptor set of `kind`.
    ///
    /// The whole batch is rejected (and the previous set kept) if any
    /// descriptor has an empty name, a name repeats within the batch, or a
    /// parameter schema fails to compile.
    pub fn register(
        &mut self,
        kind: ProviderKind,
        descriptors: Vec<ToolDescriptor>,
    ) -> CoreResult<()> {
        let mut replacement = HashMap::with_capacity(descriptors.len());
        for mut descriptor in descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "{kind} provider registered a tool without a name"
                )));
            }
            if let Some(schema) = &descriptor.parameter_schema {
                ParameterSchema::compile(schema).map_err(|error| {
                    CoreError::InvalidInput(format!("tool '{}': {error}", descriptor.name))
                })?;
            }
            if descriptor.provider_kind != kind {
                tracing::debug!(
                    tool = %descriptor.name,
                    declared = %descriptor.provider_kind,
                    registered = %kind,
                    "descriptor provider kind overridden by registering provider"
                );
                descriptor.provider_kind = kind;
            }
            let name = descriptor.name.clone();
            if replacement.insert(name.clone(), descriptor).is_some() {
                return Err(CoreError::InvalidInput(format!(
                    "{kind} provider registered '{name}' more than once"
                )));
            }
        }

        let previous = self.providers.insert(kind, replacement).map(|set| set.len()).unwrap_or(0);
        tracing::debug!(
            provider = %kind,
            previous,
            current = self.tool_count(kind),
            "provider descriptor set replaced"
        );
        Ok(())
    }

    /// Drop every descriptor registered by `kind`.
    pub fn unregister(&mut self, kind: ProviderKind) {
        self.providers.remove(&kind);
    }

    /// All candidates for `name`, best first. Empty when nothing claims the name.
    pub fn resolve(&self, name: &str) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .providers
            .iter()
            .filter_map(|(kind, tools)| {
                tools.get(name).map(|descriptor| Candidate {
                    kind: *kind,
                    descriptor: descriptor.clone(),
                })
            })
            .collect();
        candidates.sort_by_key(|candidate| (candidate.descriptor.priority, candidate.kind));
        candidates
    }

    /// Sorted, de-duplicated list of every invocable tool name.
    pub fn list(&self) -> Vec<String> {
        let names: HashSet<&str> = self
            .providers
            .values()
            .flat_map(|tools| tools.keys().map(|name| name.as_str()))
            .collect();
        let mut names: Vec<String> = names.into_iter().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Every descriptor, sorted by name then resolution order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut all: Vec<ToolDescriptor> = self
            .providers
            .values()
            .flat_map(|tools| tools.values().cloned())
            .collect();
        all.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.priority.cmp(&b.priority))
                .then(a.provider_kind.cmp(&b.provider_kind))
        });
        all
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.values().any(|tools| tools.contains_key(name))
    }

    /// Number of tools registered by `kind`.
    pub fn tool_count(&self, kind: ProviderKind) -> usize {
        self.providers.get(&kind).map(|tools| tools.len()).unwrap_or(0)
    }
}

//! Tool catalog: descriptors and priority-ordered name resolution.

pub mod descriptor;
pub mod registry;

pub use descriptor::{ProviderKind, ToolDescriptor};
pub use registry::{Candidate, ToolCatalog};

//! Resource graph module.
//!
//! This module turns declared resources into a dependency graph and orders
//! it:
//! - Reference extraction and resolution (`${type.name.attribute}`)
//! - Graph building with unknown-reference and cycle detection
//! - Deterministic topological ordering (Kahn's algorithm)

mod builder;
mod node;
mod reference;
mod resolver;

pub use builder::{GraphBuilder, ResourceGraph};
pub use node::{Lifecycle, ResourceId, ResourceNode};
pub use reference::{Reference, extract_references, resolve_value};
pub use resolver::{DependencyResolver, kahn_order};

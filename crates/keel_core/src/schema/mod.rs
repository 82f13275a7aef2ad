//! Record type schema.
//!
//! Types are described once, as data: an attribute table and a relationship
//! table per type, plus an optional base type for polymorphism. The
//! [`SchemaRegistry`] holds them and resolves relationship inverses.

mod model;
mod registry;

pub use model::{
    AttributeDescriptor, InverseSpec, ModelSchema, RelationshipDescriptor, RelationshipKind,
};
pub use registry::SchemaRegistry;

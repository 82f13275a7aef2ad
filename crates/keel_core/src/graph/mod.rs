//! Relationship graph.
//!
//! Edges between records, with a current and a canonical layer per edge and
//! synchronous inverse propagation on every mutation.

mod edge;
mod relationship_graph;

pub use edge::{Edge, Layer, Members};
pub(crate) use relationship_graph::{LinkContext, RelationshipGraph};

use crate::types::ClientId;

/// Concrete type of each record the graph links.
///
/// Inverses of polymorphic relationships resolve on the type of the record
/// actually linked, not on the declared base.
pub(crate) trait RecordTypes {
    fn type_of(&self, client_id: ClientId) -> Option<&str>;
}

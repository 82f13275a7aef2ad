//! Read-only record view handed to filter predicates.

use crate::graph::{Layer, RelationshipGraph};
use crate::record::{RecordData, RecordHandle, RecordState};
use crate::schema::ModelSchema;
use crate::types::{ClientId, StoreId};
use keel_value::Value;

/// A borrowed, read-only view of one record.
///
/// Filter predicates receive this instead of the store, so a predicate can
/// read attributes and relationships but cannot mutate anything or trigger
/// another re-evaluation while it runs. Relationship reads return whatever
/// the local view holds, loaded or not; a record whose relationship loads
/// later is re-evaluated then.
pub struct RecordView<'a> {
    pub(crate) store: StoreId,
    pub(crate) client_id: ClientId,
    pub(crate) record: &'a RecordData,
    pub(crate) model: &'a ModelSchema,
    pub(crate) graph: &'a RelationshipGraph,
}

impl<'a> RecordView<'a> {
    /// Handle of the record.
    pub fn handle(&self) -> RecordHandle {
        RecordHandle::new(self.store, self.client_id)
    }

    /// Concrete type.
    pub fn type_name(&self) -> &'a str {
        &self.record.type_name
    }

    /// Id, once assigned.
    pub fn id(&self) -> Option<&'a str> {
        self.record.id.as_deref()
    }

    /// Lifecycle state.
    pub fn state(&self) -> RecordState {
        self.record.state
    }

    /// Current value of an attribute, falling back to its declared default.
    pub fn attr(&self, name: &str) -> Option<&'a Value> {
        self.record.attributes.get(name).or_else(|| {
            self.model
                .attribute_named(name)
                .and_then(|attribute| attribute.default.as_ref())
        })
    }

    /// Current text value of an attribute.
    pub fn text(&self, name: &str) -> Option<&'a str> {
        self.attr(name).and_then(Value::as_text)
    }

    /// Current target of a to-one relationship.
    pub fn belongs_to(&self, name: &str) -> Option<RecordHandle> {
        self.graph
            .get_one(self.client_id, name, Layer::Current)
            .map(|target| RecordHandle::new(self.store, target))
    }

    /// Current members of a to-many relationship.
    pub fn has_many(&self, name: &str) -> Vec<RecordHandle> {
        self.graph
            .members(self.client_id, name, Layer::Current)
            .into_iter()
            .map(|member| RecordHandle::new(self.store, member))
            .collect()
    }
}

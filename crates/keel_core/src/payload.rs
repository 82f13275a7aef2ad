//! Normalized record data exchanged with the persistence collaborator.

use crate::types::ClientId;
use keel_value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to a record by type and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    /// Concrete type of the referenced record.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Id of the referenced record.
    pub id: String,
}

impl ResourceIdentifier {
    /// Creates an identifier.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

/// Relationship data carried by a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipData {
    /// A to-one reference, or an explicit empty reference.
    One(Option<ResourceIdentifier>),
    /// A to-many reference list, in order.
    Many(Vec<ResourceIdentifier>),
    /// Membership is unknown; it can be fetched from this link.
    Link(String),
    /// Related records included in full.
    Embedded(Vec<RawRecordPayload>),
}

/// One record as produced by the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecordPayload {
    /// Concrete type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Record id.
    pub id: String,
    /// Persisted attribute values.
    #[serde(default)]
    pub attributes: Attributes,
    /// Persisted relationship data.
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipData>,
}

impl RawRecordPayload {
    /// Starts a payload with no attributes or relationships.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            attributes: Attributes::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Sets a to-one relationship.
    #[must_use]
    pub fn one(mut self, name: &str, target: Option<ResourceIdentifier>) -> Self {
        self.relationships
            .insert(name.to_string(), RelationshipData::One(target));
        self
    }

    /// Sets a to-many relationship.
    #[must_use]
    pub fn many(mut self, name: &str, targets: Vec<ResourceIdentifier>) -> Self {
        self.relationships
            .insert(name.to_string(), RelationshipData::Many(targets));
        self
    }

    /// Sets a relationship link.
    #[must_use]
    pub fn link(mut self, name: &str, url: impl Into<String>) -> Self {
        self.relationships
            .insert(name.to_string(), RelationshipData::Link(url.into()));
        self
    }

    /// Embeds related records.
    #[must_use]
    pub fn embed(mut self, name: &str, records: Vec<RawRecordPayload>) -> Self {
        self.relationships
            .insert(name.to_string(), RelationshipData::Embedded(records));
        self
    }

    /// Identifier of this payload.
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(&self.type_name, &self.id)
    }
}

/// Reference to a record in a snapshot.
///
/// Records that have not been persisted yet have no id; their client id
/// still identifies them within the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Concrete type.
    pub type_name: String,
    /// Id, once assigned.
    pub id: Option<String>,
    /// Client id within the store.
    pub client_id: ClientId,
}

/// Relationship state of a record in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRelationship {
    /// A to-one reference.
    One(Option<SnapshotRef>),
    /// A to-many reference list.
    Many(Vec<SnapshotRef>),
}

/// Read-only copy of a record handed to the collaborator for a save.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    /// Client id within the store.
    pub client_id: ClientId,
    /// Concrete type.
    pub type_name: String,
    /// Id, absent for records being created.
    pub id: Option<String>,
    /// Current attribute values, defaults included.
    pub attributes: Attributes,
    /// Names of attributes that differ from the persisted values.
    pub changed: Vec<String>,
    /// Current relationship membership.
    pub relationships: BTreeMap<String, SnapshotRelationship>,
}

impl RecordSnapshot {
    /// Returns an attribute value.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns the to-one reference of a relationship.
    pub fn belongs_to(&self, name: &str) -> Option<&SnapshotRef> {
        match self.relationships.get(name) {
            Some(SnapshotRelationship::One(target)) => target.as_ref(),
            _ => None,
        }
    }

    /// Returns the members of a to-many relationship.
    pub fn has_many(&self, name: &str) -> &[SnapshotRef] {
        match self.relationships.get(name) {
            Some(SnapshotRelationship::Many(members)) => members,
            _ => &[],
        }
    }

    /// Builds a payload echoing this snapshot under the given id.
    ///
    /// Relationships are not echoed; the store keeps its own view of them.
    pub fn to_payload(&self, id: impl Into<String>) -> RawRecordPayload {
        RawRecordPayload {
            type_name: self.type_name.clone(),
            id: id.into(),
            attributes: self.attributes.clone(),
            relationships: BTreeMap::new(),
        }
    }
}

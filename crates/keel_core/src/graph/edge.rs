//! Relationship edges.

use crate::schema::RelationshipKind;
use crate::types::ClientId;

/// Which view of an edge an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Local view, including unsaved edits.
    Current,
    /// Last membership confirmed by the collaborator.
    Canonical,
}

/// Members of one layer of an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    /// To-one reference.
    One(Option<ClientId>),
    /// Ordered to-many references, without duplicates.
    Many(Vec<ClientId>),
}

impl Members {
    pub(crate) fn empty(kind: RelationshipKind) -> Self {
        if kind.is_to_many() {
            Members::Many(Vec::new())
        } else {
            Members::One(None)
        }
    }

    /// Returns true if the record is a member.
    pub fn contains(&self, client_id: ClientId) -> bool {
        match self {
            Members::One(target) => *target == Some(client_id),
            Members::Many(targets) => targets.contains(&client_id),
        }
    }

    /// Members as a list.
    pub fn to_vec(&self) -> Vec<ClientId> {
        match self {
            Members::One(target) => target.iter().copied().collect(),
            Members::Many(targets) => targets.clone(),
        }
    }

    /// Compares membership, ignoring to-many order.
    pub fn same_members(&self, other: &Members) -> bool {
        match (self, other) {
            (Members::One(a), Members::One(b)) => a == b,
            (Members::Many(a), Members::Many(b)) => {
                a.len() == b.len() && a.iter().all(|c| b.contains(c))
            }
            _ => false,
        }
    }

    /// Adds a member. A to-one layer is overwritten. Returns false if the
    /// record was already a member.
    pub(crate) fn insert(&mut self, client_id: ClientId) -> bool {
        match self {
            Members::One(target) => {
                if *target == Some(client_id) {
                    return false;
                }
                *target = Some(client_id);
                true
            }
            Members::Many(targets) => {
                if targets.contains(&client_id) {
                    return false;
                }
                targets.push(client_id);
                true
            }
        }
    }

    /// Removes a member. Returns false if it was not present.
    pub(crate) fn remove(&mut self, client_id: ClientId) -> bool {
        match self {
            Members::One(target) => {
                if *target == Some(client_id) {
                    *target = None;
                    true
                } else {
                    false
                }
            }
            Members::Many(targets) => {
                let before = targets.len();
                targets.retain(|c| *c != client_id);
                targets.len() != before
            }
        }
    }
}

/// Runtime state of one relationship of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub(crate) current: Members,
    pub(crate) canonical: Members,
    /// Link to fetch membership from, when the server supplied one.
    pub(crate) link: Option<String>,
    /// Membership is only known through `link` and has not been fetched.
    pub(crate) needs_link_fetch: bool,
}

impl Edge {
    pub(crate) fn new(kind: RelationshipKind) -> Self {
        Self {
            current: Members::empty(kind),
            canonical: Members::empty(kind),
            link: None,
            needs_link_fetch: false,
        }
    }

    /// Returns one layer.
    pub fn layer(&self, layer: Layer) -> &Members {
        match layer {
            Layer::Current => &self.current,
            Layer::Canonical => &self.canonical,
        }
    }

    pub(crate) fn layer_mut(&mut self, layer: Layer) -> &mut Members {
        match layer {
            Layer::Current => &mut self.current,
            Layer::Canonical => &mut self.canonical,
        }
    }

    /// The local view has no unsaved membership changes.
    pub fn is_clean(&self) -> bool {
        self.current.same_members(&self.canonical)
    }

    /// The record appears in either layer.
    pub(crate) fn references(&self, client_id: ClientId) -> bool {
        self.current.contains(client_id) || self.canonical.contains(client_id)
    }
}

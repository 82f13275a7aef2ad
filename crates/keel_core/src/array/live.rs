//! Live record array types.

use crate::array::view::RecordView;
use crate::record::RecordHandle;
use crate::types::{ClientId, RecordArrayId};
use keel_value::Value;
use std::fmt;
use std::sync::Arc;

/// Membership test of a filtered array.
pub type RecordPredicate = Arc<dyn Fn(&RecordView<'_>) -> bool + Send + Sync>;

/// Where an array's membership comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArraySource {
    /// Every loaded, non-deleted record of the type.
    All,
    /// Records of the type that pass a predicate.
    Filtered,
    /// The collaborator's response to a query.
    Query(Value),
}

/// One membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayChange {
    /// A record was inserted at `index`.
    Inserted {
        /// Position after insertion.
        index: usize,
        /// The inserted record.
        record: RecordHandle,
    },
    /// The record at `index` was removed.
    Removed {
        /// Position before removal.
        index: usize,
        /// The removed record.
        record: RecordHandle,
    },
}

/// Membership changes of one array since the last flush.
///
/// Applying `changes` in order to the membership at the previous flush
/// yields the current membership.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayNotification {
    /// The array.
    pub array: RecordArrayId,
    /// Record type of the array.
    pub type_name: String,
    /// Changes, in the order they happened.
    pub changes: Vec<ArrayChange>,
}

impl ArrayNotification {
    /// Number of inserted records.
    pub fn inserted(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, ArrayChange::Inserted { .. }))
            .count()
    }

    /// Number of removed records.
    pub fn removed(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, ArrayChange::Removed { .. }))
            .count()
    }
}

/// Point-in-time copy of a live array.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordArray {
    /// Array id.
    pub id: RecordArrayId,
    /// Record type.
    pub type_name: String,
    /// Membership source.
    pub source: ArraySource,
    /// Members, in array order.
    pub records: Vec<RecordHandle>,
    /// The initial membership is known.
    pub is_loaded: bool,
    /// A query refresh is outstanding.
    pub is_updating: bool,
    /// Server-provided metadata of the last query response.
    pub meta: Option<Value>,
}

impl RecordArray {
    /// Number of members.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if there are no members.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True if the record is a member.
    pub fn contains(&self, record: RecordHandle) -> bool {
        self.records.contains(&record)
    }

    /// Member at a position.
    pub fn get(&self, index: usize) -> Option<RecordHandle> {
        self.records.get(index).copied()
    }

    /// Iterates members.
    pub fn iter(&self) -> impl Iterator<Item = RecordHandle> + '_ {
        self.records.iter().copied()
    }
}

#[derive(Clone)]
pub(crate) enum ArrayKind {
    All,
    Filtered(RecordPredicate),
    Query(Value),
}

impl fmt::Debug for ArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKind::All => write!(f, "All"),
            ArrayKind::Filtered(_) => write!(f, "Filtered(..)"),
            ArrayKind::Query(params) => write!(f, "Query({params})"),
        }
    }
}

impl ArrayKind {
    pub fn source(&self) -> ArraySource {
        match self {
            ArrayKind::All => ArraySource::All,
            ArrayKind::Filtered(_) => ArraySource::Filtered,
            ArrayKind::Query(params) => ArraySource::Query(params.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingChange {
    Inserted(usize, ClientId),
    Removed(usize, ClientId),
}

#[derive(Debug)]
pub(crate) struct LiveArray {
    pub id: RecordArrayId,
    pub type_name: String,
    pub kind: ArrayKind,
    pub members: Vec<ClientId>,
    pub is_loaded: bool,
    pub is_updating: bool,
    pub meta: Option<Value>,
    pub pending: Vec<PendingChange>,
}

impl LiveArray {
    pub fn new(id: RecordArrayId, type_name: &str, kind: ArrayKind) -> Self {
        Self {
            id,
            type_name: type_name.to_string(),
            kind,
            members: Vec::new(),
            is_loaded: false,
            is_updating: false,
            meta: None,
            pending: Vec::new(),
        }
    }

    /// Inserts at `index`. Returns false if already a member.
    pub fn insert_at(&mut self, index: usize, client_id: ClientId) -> bool {
        if self.members.contains(&client_id) {
            return false;
        }
        let index = index.min(self.members.len());
        self.members.insert(index, client_id);
        self.pending.push(PendingChange::Inserted(index, client_id));
        true
    }

    /// Inserts keeping the array sorted by client id, which is creation
    /// order.
    pub fn insert_sorted(&mut self, client_id: ClientId) -> bool {
        match self.members.binary_search(&client_id) {
            Ok(_) => false,
            Err(index) => self.insert_at(index, client_id),
        }
    }

    pub fn remove(&mut self, client_id: ClientId) -> bool {
        let Some(index) = self.members.iter().position(|c| *c == client_id) else {
            return false;
        };
        self.members.remove(index);
        self.pending.push(PendingChange::Removed(index, client_id));
        true
    }

    /// Replaces the membership with `wanted`, recording a minimal-ish
    /// sequence of removals and insertions.
    pub fn replace(&mut self, wanted: &[ClientId]) {
        let stale: Vec<ClientId> = self
            .members
            .iter()
            .filter(|c| !wanted.contains(c))
            .copied()
            .collect();
        for client_id in stale {
            self.remove(client_id);
        }

        let mut deduped: Vec<ClientId> = Vec::with_capacity(wanted.len());
        for client_id in wanted {
            if !deduped.contains(client_id) {
                deduped.push(*client_id);
            }
        }

        for (index, client_id) in deduped.iter().enumerate() {
            if self.members.get(index) == Some(client_id) {
                continue;
            }
            self.remove(*client_id);
            self.insert_at(index, *client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array() -> LiveArray {
        LiveArray::new(RecordArrayId(1), "person", ArrayKind::All)
    }

    fn replay(changes: &[PendingChange], start: &[ClientId]) -> Vec<ClientId> {
        let mut members = start.to_vec();
        for change in changes {
            match *change {
                PendingChange::Inserted(index, c) => members.insert(index, c),
                PendingChange::Removed(index, c) => {
                    assert_eq!(members.remove(index), c);
                }
            }
        }
        members
    }

    #[test]
    fn sorted_insert_follows_creation_order() {
        let mut array = array();
        array.insert_sorted(ClientId(3));
        array.insert_sorted(ClientId(1));
        array.insert_sorted(ClientId(2));
        assert!(!array.insert_sorted(ClientId(2)));
        assert_eq!(array.members, vec![ClientId(1), ClientId(2), ClientId(3)]);
        assert_eq!(array.pending[1], PendingChange::Inserted(0, ClientId(1)));
    }

    #[test]
    fn replace_changes_replay_to_target() {
        let mut array = array();
        let start = vec![ClientId(1), ClientId(2), ClientId(3)];
        array.members = start.clone();

        let wanted = vec![ClientId(3), ClientId(4), ClientId(1)];
        array.replace(&wanted);

        assert_eq!(array.members, wanted);
        assert_eq!(replay(&array.pending, &start), wanted);
    }

    #[test]
    fn notification_counts() {
        let store = crate::types::StoreId::new();
        let record = RecordHandle::new(store, ClientId(1));
        let notification = ArrayNotification {
            array: RecordArrayId(1),
            type_name: "person".into(),
            changes: vec![
                ArrayChange::Inserted { index: 0, record },
                ArrayChange::Removed { index: 0, record },
            ],
        };
        assert_eq!(notification.inserted(), 1);
        assert_eq!(notification.removed(), 1);
    }
}

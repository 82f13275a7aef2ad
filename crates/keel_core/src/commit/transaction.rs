//! Transactions: a working set of records with a restorable checkpoint.

use crate::graph::Members;
use crate::record::{RecordHandle, RecordState};
use crate::types::{ClientId, StoreId, TransactionId};
use keel_value::Attributes;
use std::collections::BTreeMap;

/// State of one record when it joined a transaction.
#[derive(Debug, Clone)]
pub(crate) struct RecordCheckpoint {
    pub state: RecordState,
    pub modified: Attributes,
    pub edges: BTreeMap<String, Members>,
}

/// A group of records that are committed or rolled back together.
///
/// Beginning a transaction checkpoints each record's local attribute edits
/// and the current membership of its relationships. Rolling it back
/// restores exactly that, including edits made to the other side of an
/// inverse relationship.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    store: StoreId,
    pub(crate) checkpoints: BTreeMap<ClientId, RecordCheckpoint>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, store: StoreId) -> Self {
        Self {
            id,
            store,
            checkpoints: BTreeMap::new(),
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Store the transaction belongs to.
    pub fn store_id(&self) -> StoreId {
        self.store
    }

    /// Records in the transaction, in creation order.
    pub fn records(&self) -> Vec<RecordHandle> {
        self.checkpoints
            .keys()
            .map(|c| RecordHandle::new(self.store, *c))
            .collect()
    }

    /// True if the record is part of the transaction.
    pub fn contains(&self, record: RecordHandle) -> bool {
        record.store_id() == self.store && self.checkpoints.contains_key(&record.client_id())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// True if the transaction holds no records.
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

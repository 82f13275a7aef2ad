//! Live record array bookkeeping.

use crate::array::live::{
    ArrayChange, ArrayKind, ArrayNotification, LiveArray, PendingChange, RecordArray,
    RecordPredicate,
};
use crate::error::{CoreError, CoreResult};
use crate::record::RecordHandle;
use crate::types::{ClientId, RecordArrayId, StoreId};
use keel_value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Every live array of one store, with a reverse index from records to the
/// arrays that contain them.
#[derive(Debug)]
pub(crate) struct RecordArrayManager {
    store: StoreId,
    next_id: u64,
    arrays: BTreeMap<RecordArrayId, LiveArray>,
    all_by_type: HashMap<String, RecordArrayId>,
    by_type: HashMap<String, BTreeSet<RecordArrayId>>,
    memberships: HashMap<ClientId, BTreeSet<RecordArrayId>>,
}

impl RecordArrayManager {
    pub fn new(store: StoreId) -> Self {
        Self {
            store,
            next_id: 1,
            arrays: BTreeMap::new(),
            all_by_type: HashMap::new(),
            by_type: HashMap::new(),
            memberships: HashMap::new(),
        }
    }

    /// The "all records" array of a type, if it exists.
    pub fn all_of(&self, type_name: &str) -> Option<RecordArrayId> {
        self.all_by_type.get(type_name).copied()
    }

    /// Creates an array with an initial membership. No change is recorded
    /// for the initial members.
    pub fn create(
        &mut self,
        type_name: &str,
        kind: ArrayKind,
        initial: Vec<ClientId>,
    ) -> RecordArrayId {
        let id = RecordArrayId::new(self.next_id);
        self.next_id += 1;

        let is_query = matches!(kind, ArrayKind::Query(_));
        if matches!(kind, ArrayKind::All) {
            self.all_by_type.insert(type_name.to_string(), id);
        }

        let mut array = LiveArray::new(id, type_name, kind);
        for client_id in &initial {
            self.memberships.entry(*client_id).or_default().insert(id);
        }
        array.members = initial;
        array.is_loaded = !is_query;

        self.by_type
            .entry(type_name.to_string())
            .or_default()
            .insert(id);
        self.arrays.insert(id, array);
        debug!(array = %id, type_name, "created record array");
        id
    }

    fn array_mut(&mut self, id: RecordArrayId) -> CoreResult<&mut LiveArray> {
        self.arrays
            .get_mut(&id)
            .ok_or(CoreError::ArrayNotFound { array: id })
    }

    fn note_membership(&mut self, id: RecordArrayId, client_id: ClientId, member: bool) {
        if member {
            self.memberships.entry(client_id).or_default().insert(id);
        } else if let Some(set) = self.memberships.get_mut(&client_id) {
            set.remove(&id);
            if set.is_empty() {
                self.memberships.remove(&client_id);
            }
        }
    }

    /// Re-evaluates one record against every array of its type.
    ///
    /// `present` is false for records that are unloaded, deleted or not yet
    /// loaded. `matches` runs a filter predicate against the record. Query
    /// arrays only ever lose records here.
    pub fn reconcile(
        &mut self,
        type_name: &str,
        client_id: ClientId,
        present: bool,
        mut matches: impl FnMut(&RecordPredicate) -> bool,
    ) {
        let Some(ids) = self.by_type.get(type_name).cloned() else {
            return;
        };
        for id in ids {
            let Some(array) = self.arrays.get_mut(&id) else {
                continue;
            };
            let wanted = match &array.kind {
                ArrayKind::All => present,
                ArrayKind::Filtered(predicate) => present && matches(predicate),
                ArrayKind::Query(_) => present && array.members.contains(&client_id),
            };
            let changed = if wanted {
                array.insert_sorted(client_id)
            } else {
                array.remove(client_id)
            };
            if changed {
                trace!(array = %id, %client_id, member = wanted, "array membership changed");
                self.note_membership(id, client_id, wanted);
            }
        }
    }

    /// Removes a record from every array containing it.
    pub fn remove_record(&mut self, client_id: ClientId) {
        let Some(ids) = self.memberships.remove(&client_id) else {
            return;
        };
        for id in ids {
            if let Some(array) = self.arrays.get_mut(&id) {
                array.remove(client_id);
            }
        }
    }

    /// Replaces the membership of a query array.
    pub fn replace_members(
        &mut self,
        id: RecordArrayId,
        members: &[ClientId],
        meta: Option<Value>,
    ) -> CoreResult<()> {
        let array = self.array_mut(id)?;
        let before: Vec<ClientId> = array.members.clone();
        array.replace(members);
        array.meta = meta;
        array.is_loaded = true;
        array.is_updating = false;
        let after = array.members.clone();

        for client_id in before.iter().filter(|c| !after.contains(c)) {
            self.note_membership(id, *client_id, false);
        }
        for client_id in after {
            self.note_membership(id, client_id, true);
        }
        Ok(())
    }

    pub fn set_updating(&mut self, id: RecordArrayId, updating: bool) -> CoreResult<()> {
        self.array_mut(id)?.is_updating = updating;
        Ok(())
    }

    /// Query parameters of a query array.
    pub fn query_params(&self, id: RecordArrayId) -> CoreResult<(String, Value)> {
        match self.arrays.get(&id) {
            Some(LiveArray {
                kind: ArrayKind::Query(params),
                type_name,
                ..
            }) => Ok((type_name.clone(), params.clone())),
            Some(_) => Err(CoreError::invalid_operation(format!(
                "{id} is not a query array"
            ))),
            None => Err(CoreError::ArrayNotFound { array: id }),
        }
    }

    /// Destroys an array and forgets every membership it held.
    pub fn destroy(&mut self, id: RecordArrayId) -> CoreResult<()> {
        let array = self
            .arrays
            .remove(&id)
            .ok_or(CoreError::ArrayNotFound { array: id })?;

        for client_id in &array.members {
            self.note_membership(id, *client_id, false);
        }
        if let Some(set) = self.by_type.get_mut(&array.type_name) {
            set.remove(&id);
        }
        if self.all_by_type.get(&array.type_name) == Some(&id) {
            self.all_by_type.remove(&array.type_name);
        }
        debug!(array = %id, type_name = %array.type_name, "destroyed record array");
        Ok(())
    }

    pub fn snapshot(&self, id: RecordArrayId) -> CoreResult<RecordArray> {
        let array = self
            .arrays
            .get(&id)
            .ok_or(CoreError::ArrayNotFound { array: id })?;
        Ok(RecordArray {
            id,
            type_name: array.type_name.clone(),
            source: array.kind.source(),
            records: array
                .members
                .iter()
                .map(|c| RecordHandle::new(self.store, *c))
                .collect(),
            is_loaded: array.is_loaded,
            is_updating: array.is_updating,
            meta: array.meta.clone(),
        })
    }

    /// Arrays that currently contain the record.
    pub fn arrays_containing(&self, client_id: ClientId) -> Vec<RecordArrayId> {
        self.memberships
            .get(&client_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live arrays.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Drains buffered changes, one notification per array that changed.
    pub fn take_notifications(&mut self) -> Vec<ArrayNotification> {
        let store = self.store;
        self.arrays
            .values_mut()
            .filter(|array| !array.pending.is_empty())
            .map(|array| ArrayNotification {
                array: array.id,
                type_name: array.type_name.clone(),
                changes: array
                    .pending
                    .drain(..)
                    .map(|change| match change {
                        PendingChange::Inserted(index, c) => ArrayChange::Inserted {
                            index,
                            record: RecordHandle::new(store, c),
                        },
                        PendingChange::Removed(index, c) => ArrayChange::Removed {
                            index,
                            record: RecordHandle::new(store, c),
                        },
                    })
                    .collect(),
            })
            .collect()
    }
}

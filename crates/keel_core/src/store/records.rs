//! Record lifecycle: identity, attributes, delete, rollback, unload and the
//! live arrays that follow them.

use super::{Store, StoreInner};
use crate::adapter::AdapterError;
use crate::array::{ArrayKind, RecordArray, RecordView};
use crate::change_feed::RecordChange;
use crate::error::{CoreError, CoreResult};
use crate::graph::{Layer, LinkContext};
use crate::record::{FieldErrors, RecordHandle, RecordState, StateEvent};
use crate::types::{ClientId, RecordArrayId};
use keel_value::{Attributes, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

impl StoreInner {
    pub fn create_local(
        &mut self,
        type_name: &str,
        attributes: Attributes,
    ) -> CoreResult<ClientId> {
        let model = Arc::clone(self.schema.model(type_name)?);
        if let Some(name) = attributes
            .keys()
            .find(|name| model.attribute_named(name).is_none())
        {
            return Err(CoreError::unknown_attribute(type_name, name.as_str()));
        }

        let client_id = self.identity.create_local(type_name);
        if let Some(record) = self.identity.get_mut(client_id) {
            for (name, value) in attributes {
                record.attributes.set_local(&name, value);
            }
        }
        debug!(%client_id, type_name, "created local record");
        self.note(client_id, RecordChange::Created);
        Ok(client_id)
    }

    pub fn assign_id(&mut self, client_id: ClientId, id: &str) -> CoreResult<()> {
        let had_id = self.record(client_id)?.id.is_some();
        self.identity.assign_id(client_id, id)?;
        if !had_id {
            self.note(client_id, RecordChange::IdAssigned(id.to_string()));
        }
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        client_id: ClientId,
        name: &str,
        value: Value,
    ) -> CoreResult<()> {
        let type_name = self.type_of(client_id)?;
        self.ensure_editable(client_id, format!("set attribute {name} on").as_str())?;
        if self.schema.model(&type_name)?.attribute_named(name).is_none() {
            return Err(CoreError::unknown_attribute(type_name, name));
        }

        let record = self.record_mut(client_id)?;
        if !record.attributes.set_local(name, value) {
            return Ok(());
        }
        record.errors.remove(name);
        let now_valid = record.errors.is_empty() && !record.state.is_valid();

        self.note(client_id, RecordChange::AttributeChanged(name.to_string()));
        self.edited.insert(client_id);
        if now_valid {
            self.record_mut(client_id)?.adapter_error = None;
            self.transition(client_id, StateEvent::BecameValid)?;
        }
        Ok(())
    }

    pub fn rollback_record(&mut self, client_id: ClientId) -> CoreResult<()> {
        let state = self.record(client_id)?.state;
        let next = state.transition(StateEvent::Rollback)?;

        let record = self.record_mut(client_id)?;
        let reverted = record.attributes.rollback();
        record.errors.clear();
        record.adapter_error = None;
        for name in reverted {
            self.note(client_id, RecordChange::AttributeChanged(name));
        }

        if next == RecordState::DeletedSaved {
            self.discard_new(client_id)?;
        } else {
            self.restore_edges(client_id)?;
            let touched: Vec<ClientId> = self
                .graph
                .referrers(client_id)
                .into_iter()
                .map(|(referrer, _)| referrer)
                .chain(std::iter::once(client_id))
                .collect();
            self.normalize_order(touched);
        }
        self.transition(client_id, StateEvent::Rollback)
    }

    /// Detaches a never-persisted record from every edge and frees its key.
    fn discard_new(&mut self, client_id: ClientId) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let type_name = self.type_of(client_id)?;
        for layer in [Layer::Current, Layer::Canonical] {
            self.graph.unlink(
                LinkContext::new(&schema, &self.identity),
                &type_name,
                client_id,
                layer,
            )?;
        }
        self.identity.release_key(client_id);
        self.arrays.remove_record(client_id);
        Ok(())
    }

    pub fn delete(&mut self, client_id: ClientId) -> CoreResult<()> {
        let state = self.record(client_id)?.state;
        let next = state.transition(StateEvent::Delete)?;

        if next == RecordState::DeletedSaved {
            self.discard_new(client_id)?;
        } else {
            let schema = Arc::clone(&self.schema);
            let type_name = self.type_of(client_id)?;
            self.graph.unlink(
                LinkContext::new(&schema, &self.identity),
                &type_name,
                client_id,
                Layer::Current,
            )?;
        }
        self.transition(client_id, StateEvent::Delete)?;
        self.note(client_id, RecordChange::Deleted);
        Ok(())
    }

    pub fn unload(&mut self, client_id: ClientId) -> CoreResult<()> {
        let state = self.record(client_id)?.state;
        if state.is_saving() {
            warn!(
                %client_id,
                state = state.path(),
                "refusing to unload a record with a save in flight"
            );
            return Err(CoreError::invalid_state(state.path(), "unload"));
        }
        debug!(%client_id, "unloading record");
        self.purge(client_id);
        Ok(())
    }

    fn present_of(&self, type_name: &str) -> Vec<ClientId> {
        self.identity
            .records_of(type_name)
            .iter()
            .copied()
            .filter(|c| self.identity.get(*c).is_some_and(|r| r.is_present()))
            .collect()
    }

    fn matching(
        &self,
        type_name: &str,
        predicate: &crate::array::RecordPredicate,
    ) -> CoreResult<Vec<ClientId>> {
        let model = self.schema.model(type_name)?;
        Ok(self
            .present_of(type_name)
            .into_iter()
            .filter(|client_id| {
                self.identity.get(*client_id).is_some_and(|record| {
                    predicate(&RecordView {
                        store: self.store,
                        client_id: *client_id,
                        record,
                        model,
                        graph: &self.graph,
                    })
                })
            })
            .collect())
    }
}

impl Store {
    /// Creates a new local record. It is dirty from the start, even without
    /// attributes.
    ///
    /// # Errors
    ///
    /// `UnknownType` for an unregistered type, `UnknownAttribute` for an
    /// attribute the type does not declare.
    pub fn create_record(
        &self,
        type_name: &str,
        attributes: Attributes,
    ) -> CoreResult<RecordHandle> {
        self.mutate(|inner| {
            let client_id = inner.create_local(type_name, attributes)?;
            self.stats.record_created();
            Ok(inner.handle(client_id))
        })
    }

    /// Returns the handle for `(type, id)`, creating an empty record if the
    /// store has never seen it. Never returns two handles for one identity.
    pub fn identity_for(&self, type_name: &str, id: &str) -> CoreResult<RecordHandle> {
        self.mutate(|inner| {
            inner.schema.model(type_name)?;
            let (client_id, _) = inner.identity.identity_for(type_name, id);
            Ok(inner.handle(client_id))
        })
    }

    /// Gives an id-less record its id, making it addressable by `(type, id)`.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if another record of the type already owns the id.
    pub fn assign_id(&self, record: RecordHandle, id: &str) -> CoreResult<()> {
        self.mutate(|inner| {
            let client_id = inner.live(record)?;
            inner.assign_id(client_id, id)
        })
    }

    /// The loaded record for `(type, id)`, without fetching.
    pub fn peek(&self, type_name: &str, id: &str) -> Option<RecordHandle> {
        let inner = self.inner.lock();
        let client_id = inner.identity.lookup(type_name, id)?;
        inner
            .identity
            .get(client_id)
            .filter(|record| record.state.is_loaded())
            .map(|_| inner.handle(client_id))
    }

    /// True if `(type, id)` is loaded.
    pub fn has_record(&self, type_name: &str, id: &str) -> bool {
        self.peek(type_name, id).is_some()
    }

    /// Loaded, non-deleted records of a type, in creation order.
    pub fn records_of(&self, type_name: &str) -> Vec<RecordHandle> {
        let inner = self.inner.lock();
        inner
            .present_of(type_name)
            .into_iter()
            .map(|client_id| inner.handle(client_id))
            .collect()
    }

    /// True while the handle refers to a record of this store.
    pub fn is_live(&self, record: RecordHandle) -> bool {
        self.inner.lock().live(record).is_ok()
    }

    fn read<T>(
        &self,
        record: RecordHandle,
        f: impl FnOnce(&StoreInner, ClientId) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let inner = self.inner.lock();
        let client_id = inner.live(record)?;
        f(&inner, client_id)
    }

    /// Record type.
    pub fn type_of(&self, record: RecordHandle) -> CoreResult<String> {
        self.read(record, |inner, c| inner.type_of(c))
    }

    /// Record id, once assigned.
    pub fn id_of(&self, record: RecordHandle) -> CoreResult<Option<String>> {
        self.read(record, |inner, c| Ok(inner.record(c)?.id.clone()))
    }

    /// Current value of an attribute: the local edit, else the persisted
    /// value, else the declared default, else null.
    pub fn attr(&self, record: RecordHandle, name: &str) -> CoreResult<Value> {
        self.read(record, |inner, c| inner.attribute(c, name))
    }

    /// Every current attribute value, defaults included.
    pub fn attributes(&self, record: RecordHandle) -> CoreResult<Attributes> {
        self.read(record, |inner, c| inner.attributes(c))
    }

    /// Edits one attribute.
    ///
    /// Clears the field's errors. When the last field error clears, an
    /// invalid record becomes editable-dirty again.
    ///
    /// # Errors
    ///
    /// `InvalidState` while the record is being saved or is deleted.
    pub fn set(&self, record: RecordHandle, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.mutate(|inner| {
            let client_id = inner.live(record)?;
            inner.set_attribute(client_id, name, value)
        })
    }

    /// Locally changed attributes: name to (persisted, current).
    pub fn changed_attributes(
        &self,
        record: RecordHandle,
    ) -> CoreResult<BTreeMap<String, (Option<Value>, Value)>> {
        self.read(record, |inner, c| Ok(inner.record(c)?.attributes.changed()))
    }

    /// Lifecycle state.
    pub fn state(&self, record: RecordHandle) -> CoreResult<RecordState> {
        self.read(record, |inner, c| Ok(inner.record(c)?.state))
    }

    /// True if the record has local state not confirmed persisted.
    pub fn is_dirty(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_dirty())
    }

    /// True if the record was never persisted.
    pub fn is_new(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_new())
    }

    /// True while a save is in flight.
    pub fn is_saving(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_saving())
    }

    /// True once the record is deleted, locally or remotely.
    pub fn is_deleted(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_deleted())
    }

    /// True unless the last save was rejected with field errors.
    pub fn is_valid(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_valid())
    }

    /// True if the last save failed with a non-validation error.
    pub fn is_error(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_error())
    }

    /// True once the record has data.
    pub fn is_loaded(&self, record: RecordHandle) -> CoreResult<bool> {
        Ok(self.state(record)?.is_loaded())
    }

    /// True while a reload is outstanding.
    pub fn is_reloading(&self, record: RecordHandle) -> CoreResult<bool> {
        self.read(record, |inner, c| Ok(inner.record(c)?.is_reloading))
    }

    /// Field errors from the last rejected save.
    pub fn errors(&self, record: RecordHandle) -> CoreResult<FieldErrors> {
        self.read(record, |inner, c| Ok(inner.record(c)?.errors.clone()))
    }

    /// Error from the last failed save.
    pub fn adapter_error(&self, record: RecordHandle) -> CoreResult<Option<AdapterError>> {
        self.read(record, |inner, c| Ok(inner.record(c)?.adapter_error.clone()))
    }

    /// Discards local changes to attributes and relationships.
    ///
    /// A deleted record is undeleted; a never-persisted record is discarded.
    ///
    /// # Errors
    ///
    /// `InvalidState` while a save is in flight.
    pub fn rollback(&self, record: RecordHandle) -> CoreResult<()> {
        self.mutate(|inner| {
            let client_id = inner.live(record)?;
            inner.rollback_record(client_id)
        })
    }

    /// Deletes a record locally. A never-persisted record is discarded at
    /// once; any other record waits for a commit.
    pub fn delete_record(&self, record: RecordHandle) -> CoreResult<()> {
        self.mutate(|inner| {
            let client_id = inner.live(record)?;
            inner.delete(client_id)
        })
    }

    /// Forgets a record: removes it from the identity map, from every edge
    /// and from every live array.
    ///
    /// # Errors
    ///
    /// `InvalidState` while a save is in flight; the record is left alone.
    pub fn unload(&self, record: RecordHandle) -> CoreResult<()> {
        self.mutate(|inner| {
            let client_id = inner.live(record)?;
            inner.unload(client_id)?;
            self.stats.record_unloaded();
            Ok(())
        })
    }

    /// Unloads every record of a type that is not being saved. Returns how
    /// many were unloaded.
    pub fn unload_all(&self, type_name: &str) -> CoreResult<usize> {
        self.mutate(|inner| {
            inner.schema.model(type_name)?;
            let candidates: Vec<ClientId> = inner
                .identity
                .iter()
                .filter(|(_, record)| record.type_name == type_name)
                .map(|(client_id, _)| client_id)
                .collect();
            let mut unloaded = 0;
            for client_id in candidates {
                if inner.unload(client_id).is_ok() {
                    self.stats.record_unloaded();
                    unloaded += 1;
                }
            }
            Ok(unloaded)
        })
    }

    /// The array of every loaded, non-deleted record of a type. Created on
    /// first use; the same array afterwards.
    pub fn all_records_of(&self, type_name: &str) -> CoreResult<RecordArrayId> {
        self.mutate(|inner| {
            if let Some(id) = inner.arrays.all_of(type_name) {
                return Ok(id);
            }
            inner.schema.model(type_name)?;
            let initial = inner.present_of(type_name);
            Ok(inner.arrays.create(type_name, ArrayKind::All, initial))
        })
    }

    /// An array of the records of a type that pass `predicate`.
    ///
    /// The predicate is re-run for a record whenever that record changes.
    /// It receives a read-only view and cannot reach back into the store.
    pub fn filter<F>(&self, type_name: &str, predicate: F) -> CoreResult<RecordArrayId>
    where
        F: Fn(&RecordView<'_>) -> bool + Send + Sync + 'static,
    {
        let predicate: crate::array::RecordPredicate = Arc::new(predicate);
        self.mutate(|inner| {
            let initial = inner.matching(type_name, &predicate)?;
            Ok(inner
                .arrays
                .create(type_name, ArrayKind::Filtered(predicate), initial))
        })
    }

    /// Snapshot of an array's current membership and flags.
    pub fn array(&self, id: RecordArrayId) -> CoreResult<RecordArray> {
        self.inner.lock().arrays.snapshot(id)
    }

    /// Destroys an array. It receives no further updates and disappears
    /// from every record's membership bookkeeping.
    pub fn destroy_array(&self, id: RecordArrayId) -> CoreResult<()> {
        self.mutate(|inner| inner.arrays.destroy(id))
    }

    /// Arrays that currently contain the record.
    pub fn arrays_containing(&self, record: RecordHandle) -> CoreResult<Vec<RecordArrayId>> {
        self.read(record, |inner, c| Ok(inner.arrays.arrays_containing(c)))
    }
}

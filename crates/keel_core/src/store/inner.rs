//! Mutable state of a store and the bookkeeping shared by every operation.

use crate::array::{RecordArrayManager, RecordView};
use crate::change_feed::{PendingRecordEvents, RecordChange, StoreEventKind};
use crate::error::{CoreError, CoreResult};
use crate::fetch::FetchRegistry;
use crate::graph::{Layer, LinkContext, Members, RelationshipGraph};
use crate::payload::{RecordSnapshot, SnapshotRef, SnapshotRelationship};
use crate::record::{RecordData, RecordHandle, RecordState, SaveKind, StateEvent};
use crate::schema::{ModelSchema, RelationshipDescriptor, RelationshipKind, SchemaRegistry};
use crate::types::{ClientId, StoreId};
use keel_value::{Attributes, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct StoreInner {
    pub store: StoreId,
    pub schema: Arc<SchemaRegistry>,
    pub identity: crate::identity::IdentityMap,
    pub graph: RelationshipGraph,
    pub arrays: RecordArrayManager,
    pub fetches: FetchRegistry,
    pub events: PendingRecordEvents,
    /// Records to re-evaluate at the end of the operation.
    pub touched: BTreeSet<ClientId>,
    /// Records edited directly by the caller during the operation.
    pub edited: BTreeSet<ClientId>,
    pub next_transaction: u64,
}

impl StoreInner {
    pub fn new(store: StoreId, schema: Arc<SchemaRegistry>) -> Self {
        Self {
            store,
            schema,
            identity: crate::identity::IdentityMap::new(),
            graph: RelationshipGraph::new(),
            arrays: RecordArrayManager::new(store),
            fetches: FetchRegistry::new(),
            events: PendingRecordEvents::default(),
            touched: BTreeSet::new(),
            edited: BTreeSet::new(),
            next_transaction: 1,
        }
    }

    pub fn handle(&self, client_id: ClientId) -> RecordHandle {
        RecordHandle::new(self.store, client_id)
    }

    /// Resolves a handle to a live record of this store.
    pub fn live(&self, handle: RecordHandle) -> CoreResult<ClientId> {
        let client_id = handle.client_id();
        if handle.store_id() != self.store || !self.identity.contains(client_id) {
            return Err(CoreError::RecordNotLive { client_id });
        }
        Ok(client_id)
    }

    pub fn record(&self, client_id: ClientId) -> CoreResult<&RecordData> {
        self.identity
            .get(client_id)
            .ok_or(CoreError::RecordNotLive { client_id })
    }

    pub fn record_mut(&mut self, client_id: ClientId) -> CoreResult<&mut RecordData> {
        self.identity
            .get_mut(client_id)
            .ok_or(CoreError::RecordNotLive { client_id })
    }

    pub fn model_of(&self, client_id: ClientId) -> CoreResult<Arc<ModelSchema>> {
        let record = self.record(client_id)?;
        self.schema.model(&record.type_name).map(Arc::clone)
    }

    pub fn type_of(&self, client_id: ClientId) -> CoreResult<String> {
        Ok(self.record(client_id)?.type_name.clone())
    }

    pub fn relationship_of(
        &self,
        client_id: ClientId,
        name: &str,
    ) -> CoreResult<(String, RelationshipDescriptor)> {
        let type_name = self.type_of(client_id)?;
        let descriptor = self.schema.relationship(&type_name, name)?.clone();
        Ok((type_name, descriptor))
    }

    pub fn note(&mut self, client_id: ClientId, change: RecordChange) {
        if let Some(record) = self.identity.get(client_id) {
            let type_name = record.type_name.clone();
            self.events.note(client_id, &type_name, change);
        }
        self.touched.insert(client_id);
    }

    /// Applies a state event, recording the state change.
    pub fn transition(&mut self, client_id: ClientId, event: StateEvent) -> CoreResult<()> {
        let record = self.record_mut(client_id)?;
        if let Some(from) = record.apply(event)? {
            let to = record.state;
            self.note(client_id, RecordChange::StateChanged { from, to });
        }
        Ok(())
    }

    /// Fails unless the record's state allows local edits.
    pub fn ensure_editable(&self, client_id: ClientId, operation: &str) -> CoreResult<()> {
        let state = self.record(client_id)?.state;
        if state.accepts_edits() {
            Ok(())
        } else {
            Err(CoreError::invalid_state(state.path(), operation))
        }
    }

    /// Fails if the record cannot become the target of a local edit.
    pub fn ensure_linkable(&self, client_id: ClientId) -> CoreResult<()> {
        let state = self.record(client_id)?.state;
        if state.is_saving() || state.is_deleted() {
            Err(CoreError::invalid_state(state.path(), "link"))
        } else {
            Ok(())
        }
    }

    /// True if changes to this edge make its owner dirty.
    ///
    /// To-one edges are owned by their record. A to-many edge is owned
    /// unless its inverse is to-one, in which case the to-one side records
    /// the change.
    pub fn is_owning(&self, type_name: &str, name: &str) -> bool {
        let Ok(descriptor) = self.schema.relationship(type_name, name) else {
            return false;
        };
        if descriptor.kind.is_to_one() {
            return true;
        }
        match self.schema.inverse_for(type_name, name) {
            Ok(Some(inverse)) => inverse.kind.is_to_many(),
            Ok(None) | Err(_) => true,
        }
    }

    pub fn relationships_dirty(&self, client_id: ClientId) -> bool {
        let Some(record) = self.identity.get(client_id) else {
            return false;
        };
        self.graph
            .edges_of(client_id)
            .any(|(name, edge)| !edge.is_clean() && self.is_owning(&record.type_name, name))
    }

    pub fn is_dirty_now(&self, client_id: ClientId) -> bool {
        self.identity
            .get(client_id)
            .is_some_and(|r| r.attributes.is_dirty())
            || self.relationships_dirty(client_id)
    }

    fn refresh_dirtiness(&mut self, client_id: ClientId) {
        let Some(record) = self.identity.get(client_id) else {
            return;
        };
        let eligible = match record.state {
            RecordState::Saved | RecordState::Updated | RecordState::Created => true,
            RecordState::Error(SaveKind::Create | SaveKind::Update) => {
                self.edited.contains(&client_id)
            }
            _ => false,
        };
        if !eligible {
            return;
        }

        let event = if self.is_dirty_now(client_id) {
            StateEvent::BecameDirty
        } else {
            StateEvent::BecameClean
        };
        if let Err(err) = self.transition(client_id, event) {
            trace!(%client_id, %err, "dirtiness refresh skipped");
        }
    }

    /// Settles the consequences of an operation: relationship change
    /// events, dirtiness of every touched record, and array membership.
    pub fn finish_operation(&mut self) {
        for (client_id, names) in self.graph.take_touched() {
            if !self.identity.contains(client_id) {
                continue;
            }
            for name in names {
                self.note(client_id, RecordChange::RelationshipChanged(name));
            }
            self.touched.insert(client_id);
        }

        let mut touched = std::mem::take(&mut self.touched);
        for client_id in &touched {
            self.refresh_dirtiness(*client_id);
        }
        touched.extend(std::mem::take(&mut self.touched));
        self.edited.clear();

        for client_id in touched {
            self.reconcile_arrays(client_id);
        }
    }

    fn reconcile_arrays(&mut self, client_id: ClientId) {
        let Some(record) = self.identity.get(client_id) else {
            self.arrays.remove_record(client_id);
            return;
        };
        let Ok(model) = self.schema.model(&record.type_name) else {
            return;
        };
        let view = RecordView {
            store: self.store,
            client_id,
            record,
            model,
            graph: &self.graph,
        };
        self.arrays
            .reconcile(&record.type_name, client_id, record.is_present(), |predicate| {
                predicate(&view)
            });
    }

    /// Drains buffered events for publication.
    pub fn take_events(&mut self) -> Vec<StoreEventKind> {
        let identity = &self.identity;
        let mut batch: Vec<StoreEventKind> = self
            .events
            .drain(self.store, |c| identity.get(c).and_then(|r| r.id.clone()))
            .into_iter()
            .map(StoreEventKind::Record)
            .collect();
        batch.extend(
            self.arrays
                .take_notifications()
                .into_iter()
                .map(StoreEventKind::Array),
        );
        batch
    }

    /// Current value of an attribute, with the schema default as fallback.
    pub fn attribute(&self, client_id: ClientId, name: &str) -> CoreResult<Value> {
        let record = self.record(client_id)?;
        let model = self.schema.model(&record.type_name)?;
        let declared = model.attribute_named(name);
        if let Some(value) = record.attributes.get(name) {
            return Ok(value.clone());
        }
        match declared {
            Some(attribute) => Ok(attribute.default.clone().unwrap_or_default()),
            None => Err(CoreError::unknown_attribute(&record.type_name, name)),
        }
    }

    /// Every current attribute value, defaults included.
    pub fn attributes(&self, client_id: ClientId) -> CoreResult<Attributes> {
        let record = self.record(client_id)?;
        let model = self.schema.model(&record.type_name)?;
        let mut attributes = record.attributes.current();
        for attribute in &model.attributes {
            if let Some(default) = &attribute.default {
                attributes
                    .entry(attribute.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        Ok(attributes)
    }

    fn snapshot_ref(&self, client_id: ClientId) -> Option<SnapshotRef> {
        self.identity.get(client_id).map(|record| SnapshotRef {
            type_name: record.type_name.clone(),
            id: record.id.clone(),
            client_id,
        })
    }

    /// Copies a record for the collaborator.
    pub fn snapshot(&self, client_id: ClientId, layer: Layer) -> CoreResult<RecordSnapshot> {
        let record = self.record(client_id)?;
        let model = self.schema.model(&record.type_name)?;

        let relationships = model
            .relationships
            .iter()
            .map(|descriptor| {
                let members = self.graph.members(client_id, &descriptor.name, layer);
                let value = if descriptor.kind.is_to_one() {
                    SnapshotRelationship::One(
                        members.first().and_then(|c| self.snapshot_ref(*c)),
                    )
                } else {
                    SnapshotRelationship::Many(
                        members.iter().filter_map(|c| self.snapshot_ref(*c)).collect(),
                    )
                };
                (descriptor.name.clone(), value)
            })
            .collect();

        Ok(RecordSnapshot {
            client_id,
            type_name: record.type_name.clone(),
            id: record.id.clone(),
            attributes: self.attributes(client_id)?,
            changed: record.attributes.changed().into_keys().collect(),
            relationships,
        })
    }

    /// BelongsTo targets of a record on one layer.
    pub fn parents_of(&self, client_id: ClientId, layer: Layer) -> Vec<ClientId> {
        let Ok(model) = self.model_of(client_id) else {
            return Vec::new();
        };
        model
            .relationships
            .iter()
            .filter(|d| d.kind == RelationshipKind::BelongsTo)
            .filter_map(|d| self.graph.get_one(client_id, &d.name, layer))
            .collect()
    }

    /// Sets the canonical layer of every edge of a record to its current
    /// layer, propagating to inverses.
    pub fn promote_edges(&mut self, client_id: ClientId) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let type_name = self.type_of(client_id)?;
        let edges: Vec<(String, Members)> = self
            .graph
            .edges_of(client_id)
            .map(|(name, edge)| (name.to_string(), edge.current.clone()))
            .collect();
        for (name, members) in edges {
            let descriptor = schema.relationship(&type_name, &name)?;
            self.graph.sync_layer(
                LinkContext::new(&schema, &self.identity),
                &type_name,
                client_id,
                descriptor,
                &members,
                Layer::Canonical,
            )?;
        }
        Ok(())
    }

    /// Sets the current layer of every edge of a record back to its
    /// canonical layer, propagating to inverses.
    pub fn restore_edges(&mut self, client_id: ClientId) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let type_name = self.type_of(client_id)?;
        let edges: Vec<(String, Members)> = self
            .graph
            .edges_of(client_id)
            .map(|(name, edge)| (name.to_string(), edge.canonical.clone()))
            .collect();
        for (name, members) in edges {
            let descriptor = schema.relationship(&type_name, &name)?;
            self.graph.sync_layer(
                LinkContext::new(&schema, &self.identity),
                &type_name,
                client_id,
                descriptor,
                &members,
                Layer::Current,
            )?;
        }

        // One-way edges elsewhere that dropped this record on delete.
        for (referrer, name) in self.graph.referrers(client_id) {
            let Some(edge) = self.graph.edge(referrer, &name) else {
                continue;
            };
            if !edge.canonical.contains(client_id) || edge.current.contains(client_id) {
                continue;
            }
            let referrer_type = self.type_of(referrer)?;
            if schema
                .inverse_toward(&referrer_type, &name, &type_name)?
                .is_some()
            {
                continue;
            }
            let descriptor = schema.relationship(&referrer_type, &name)?;
            self.graph.relate(
                LinkContext::new(&schema, &self.identity),
                &referrer_type,
                referrer,
                descriptor,
                client_id,
                Layer::Current,
            )?;
        }
        Ok(())
    }

    /// Puts to-many edges whose membership matches the canonical layer back
    /// into canonical order.
    pub fn normalize_order(&mut self, owners: impl IntoIterator<Item = ClientId>) {
        for owner in owners {
            let edges: Vec<(String, Vec<ClientId>)> = self
                .graph
                .edges_of(owner)
                .filter(|(_, edge)| matches!(edge.canonical, Members::Many(_)) && edge.is_clean())
                .map(|(name, edge)| (name.to_string(), edge.canonical.to_vec()))
                .collect();
            for (name, order) in edges {
                self.graph.reorder(owner, &name, &order, Layer::Current);
            }
        }
    }

    /// Removes a record from every structure of the store.
    pub fn purge(&mut self, client_id: ClientId) {
        if let Some(record) = self.identity.get(client_id) {
            let type_name = record.type_name.clone();
            self.events
                .note(client_id, &type_name, RecordChange::Unloaded);
        }
        self.graph.remove_record(client_id);
        self.arrays.remove_record(client_id);
        self.fetches.abandon_owner(client_id);
        self.identity.remove(client_id);
        self.touched.insert(client_id);
    }
}

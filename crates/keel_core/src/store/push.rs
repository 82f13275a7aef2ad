//! Applying collaborator payloads.
//!
//! Payloads are checked in full before anything is touched, so a malformed
//! payload leaves the store unchanged. Server data for a relationship always
//! lands on the canonical layer; the current layer follows only while it
//! has no unsaved edits.

use super::{Store, StoreInner};
use crate::change_feed::RecordChange;
use crate::error::{CoreError, CoreResult};
use crate::graph::{Layer, LinkContext, Members};
use crate::payload::{RawRecordPayload, RelationshipData};
use crate::record::{RecordHandle, StateEvent};
use crate::schema::RelationshipDescriptor;
use crate::stats::StoreStats;
use crate::types::ClientId;
use std::sync::Arc;
use tracing::trace;

impl StoreInner {
    /// Checks a payload against the schema without mutating anything.
    pub fn validate_payload(&self, payload: &RawRecordPayload) -> CoreResult<()> {
        let type_name = payload.type_name.as_str();
        let model = self.schema.model(type_name)?;

        for (name, data) in &payload.relationships {
            let descriptor = model
                .relationship_named(name)
                .ok_or_else(|| CoreError::unknown_relationship(type_name, name.as_str()))?;
            self.schema.inverse_for(type_name, name)?;

            let to_one = descriptor.kind.is_to_one();
            let cardinality = |fits: bool| {
                if fits {
                    Ok(())
                } else {
                    Err(CoreError::invalid_operation(format!(
                        "payload data for {type_name}.{name} does not match its cardinality"
                    )))
                }
            };
            let target = |target_type: &str| -> CoreResult<()> {
                self.schema
                    .check_assignable(type_name, descriptor, target_type)?;
                self.schema.inverse_toward(type_name, name, target_type)?;
                Ok(())
            };
            match data {
                RelationshipData::One(identifier) => {
                    cardinality(to_one)?;
                    if let Some(identifier) = identifier {
                        target(&identifier.type_name)?;
                    }
                }
                RelationshipData::Many(identifiers) => {
                    cardinality(!to_one)?;
                    for identifier in identifiers {
                        target(&identifier.type_name)?;
                    }
                }
                RelationshipData::Link(_) => {}
                RelationshipData::Embedded(records) => {
                    cardinality(!to_one || records.len() <= 1)?;
                    for record in records {
                        target(&record.type_name)?;
                        self.validate_payload(record)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies an already validated payload. Returns the record it landed on.
    pub fn apply_payload(
        &mut self,
        payload: &RawRecordPayload,
        stats: &StoreStats,
    ) -> CoreResult<ClientId> {
        let (client_id, created) = self
            .identity
            .identity_for(&payload.type_name, &payload.id);
        stats.record_pushed();
        trace!(%client_id, type_name = %payload.type_name, id = %payload.id, created, "push");

        let record = self.record_mut(client_id)?;
        let changed = record.attributes.set_raw(payload.attributes.clone());
        record.is_reloading = false;
        let state = record.state;
        for name in changed {
            self.note(client_id, RecordChange::AttributeChanged(name));
        }
        if !state.is_loaded() {
            self.transition(client_id, StateEvent::Loaded)?;
            self.note(client_id, RecordChange::Loaded);
        }

        let model = self.model_of(client_id)?;
        for (name, data) in &payload.relationships {
            let descriptor = model
                .relationship_named(name)
                .ok_or_else(|| CoreError::unknown_relationship(&payload.type_name, name.as_str()))?;
            self.apply_relationship_data(client_id, descriptor, data, stats)?;
        }
        self.touched.insert(client_id);
        Ok(client_id)
    }

    pub fn apply_relationship_data(
        &mut self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        data: &RelationshipData,
        stats: &StoreStats,
    ) -> CoreResult<()> {
        let members = match data {
            RelationshipData::One(target) => Members::One(
                target
                    .as_ref()
                    .map(|t| self.identity.identity_for(&t.type_name, &t.id).0),
            ),
            RelationshipData::Many(targets) => {
                let mut members = Members::Many(Vec::with_capacity(targets.len()));
                for target in targets {
                    members.insert(self.identity.identity_for(&target.type_name, &target.id).0);
                }
                members
            }
            RelationshipData::Embedded(records) => {
                let mut members = Members::empty(descriptor.kind);
                for record in records {
                    let client_id = self.apply_payload(record, stats)?;
                    members.insert(client_id);
                }
                members
            }
            RelationshipData::Link(url) => {
                let edge = self.graph.ensure(owner, descriptor);
                if edge.link.as_deref() != Some(url.as_str()) {
                    edge.link = Some(url.clone());
                    edge.needs_link_fetch = true;
                }
                return Ok(());
            }
        };
        self.apply_server_members(owner, descriptor, &members)
    }

    /// Sets the canonical layer of an edge from server data, and the current
    /// layer too if it had no unsaved edits.
    pub fn apply_server_members(
        &mut self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        members: &Members,
    ) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let owner_type = self.type_of(owner)?;
        let clean = self
            .graph
            .edge(owner, &descriptor.name)
            .is_none_or(|edge| edge.is_clean());

        self.graph.sync_layer(
            LinkContext::new(&schema, &self.identity),
            &owner_type,
            owner,
            descriptor,
            members,
            Layer::Canonical,
        )?;
        if clean {
            self.graph.sync_layer(
                LinkContext::new(&schema, &self.identity),
                &owner_type,
                owner,
                descriptor,
                members,
                Layer::Current,
            )?;
        }
        if let Some(edge) = self.graph.edge_mut(owner, &descriptor.name) {
            edge.needs_link_fetch = false;
        }
        self.touched.insert(owner);
        Ok(())
    }

    /// Validates and applies one payload.
    pub fn push_payload(
        &mut self,
        payload: &RawRecordPayload,
        stats: &StoreStats,
    ) -> CoreResult<ClientId> {
        self.validate_payload(payload)?;
        self.apply_payload(payload, stats)
    }
}

impl Store {
    /// Loads a payload into the store, creating or updating its record.
    ///
    /// Attributes follow reload rules: persisted values are replaced, and a
    /// local edit survives unless the new persisted value equals it.
    /// Embedded related payloads are pushed too.
    ///
    /// # Errors
    ///
    /// Schema errors (`UnknownType`, `RelationshipType`, ...) are raised
    /// before anything changes.
    pub fn push(&self, payload: RawRecordPayload) -> CoreResult<RecordHandle> {
        self.mutate(|inner| {
            let client_id = inner.push_payload(&payload, &self.stats)?;
            Ok(inner.handle(client_id))
        })
    }

    /// Loads several payloads as one batch: array notifications are
    /// coalesced across the batch and keep the payload order.
    ///
    /// # Errors
    ///
    /// Every payload is validated first; on error nothing is applied.
    pub fn push_many(&self, payloads: Vec<RawRecordPayload>) -> CoreResult<Vec<RecordHandle>> {
        self.mutate(|inner| {
            for payload in &payloads {
                inner.validate_payload(payload)?;
            }
            payloads
                .iter()
                .map(|payload| {
                    inner
                        .apply_payload(payload, &self.stats)
                        .map(|client_id| inner.handle(client_id))
                })
                .collect()
        })
    }
}

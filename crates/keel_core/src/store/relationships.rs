//! Reading and editing relationships.

use super::{Store, StoreInner};
use crate::error::{CoreError, CoreResult};
use crate::fetch::{BelongsTo, FetchKey, HasMany, Materialized, PendingFetch};
use crate::graph::{Layer, LinkContext, Members};
use crate::record::RecordHandle;
use crate::schema::RelationshipDescriptor;
use crate::stats::StoreStats;
use crate::types::ClientId;
use keel_value::Attributes;
use std::sync::Arc;
use tracing::trace;

/// Whether an edge can be handed out as-is.
enum Readiness {
    Ready,
    NeedsFetch,
}

impl StoreInner {
    fn readiness(
        &self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
    ) -> CoreResult<Readiness> {
        let edge = self.graph.edge(owner, &descriptor.name);
        let needs_link = edge.is_some_and(|e| e.needs_link_fetch);
        let unloaded = self
            .graph
            .members(owner, &descriptor.name, Layer::Current)
            .into_iter()
            .any(|member| {
                self.identity
                    .get(member)
                    .is_some_and(|record| !record.state.is_loaded())
            });

        if !needs_link && !unloaded {
            return Ok(Readiness::Ready);
        }
        if descriptor.is_async {
            Ok(Readiness::NeedsFetch)
        } else {
            Err(CoreError::RelationshipNotLoaded {
                type_name: self.type_of(owner)?,
                relationship: descriptor.name.clone(),
            })
        }
    }

    /// Returns the shared fetch for one relationship of one record.
    pub fn request_relationship(
        &mut self,
        owner: ClientId,
        name: &str,
        stats: &StoreStats,
    ) -> PendingFetch {
        let (pending, existed) = self.fetches.request(FetchKey::Relationship {
            owner,
            name: name.to_string(),
        });
        if existed {
            trace!(%owner, relationship = name, "joined outstanding relationship fetch");
            stats.record_dedupe();
        }
        pending
    }

    fn to_one(&self, owner: ClientId, name: &str) -> CoreResult<RelationshipDescriptor> {
        let (type_name, descriptor) = self.relationship_of(owner, name)?;
        if descriptor.kind.is_to_one() {
            Ok(descriptor)
        } else {
            Err(CoreError::invalid_operation(format!(
                "{type_name}.{name} is a to-many relationship"
            )))
        }
    }

    fn to_many(&self, owner: ClientId, name: &str) -> CoreResult<RelationshipDescriptor> {
        let (type_name, descriptor) = self.relationship_of(owner, name)?;
        if descriptor.kind.is_to_many() {
            Ok(descriptor)
        } else {
            Err(CoreError::invalid_operation(format!(
                "{type_name}.{name} is a to-one relationship"
            )))
        }
    }

    /// Checks that `target` may be linked into `owner.rel`.
    fn check_target(
        &self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        target: ClientId,
    ) -> CoreResult<()> {
        let owner_type = self.type_of(owner)?;
        let target_type = self.type_of(target)?;
        self.schema
            .check_assignable(&owner_type, descriptor, &target_type)?;
        self.schema
            .inverse_toward(&owner_type, &descriptor.name, &target_type)?;
        self.ensure_linkable(target)
    }

    /// Sets the current layer of an edge, with inverse propagation.
    fn edit_edge(
        &mut self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        edit: impl FnOnce(&mut StoreInner, &crate::schema::SchemaRegistry, &str) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        let owner_type = self.type_of(owner)?;
        self.ensure_editable(owner, format!("edit {} on", descriptor.name).as_str())?;
        schema.inverse_for(&owner_type, &descriptor.name)?;
        edit(self, &schema, &owner_type)?;
        self.edited.insert(owner);
        Ok(())
    }

    pub fn set_to_one(
        &mut self,
        owner: ClientId,
        name: &str,
        target: Option<ClientId>,
    ) -> CoreResult<()> {
        let descriptor = self.to_one(owner, name)?;
        if let Some(target) = target {
            self.check_target(owner, &descriptor, target)?;
        }
        self.edit_edge(owner, &descriptor, |inner, schema, owner_type| {
            inner.graph.sync_layer(
                LinkContext::new(schema, &inner.identity),
                owner_type,
                owner,
                &descriptor,
                &Members::One(target),
                Layer::Current,
            )
        })
    }

    pub fn add_member(&mut self, owner: ClientId, name: &str, member: ClientId) -> CoreResult<()> {
        let descriptor = self.to_many(owner, name)?;
        self.check_target(owner, &descriptor, member)?;
        self.edit_edge(owner, &descriptor, |inner, schema, owner_type| {
            inner.graph.relate(
                LinkContext::new(schema, &inner.identity),
                owner_type,
                owner,
                &descriptor,
                member,
                Layer::Current,
            )
        })
    }

    pub fn remove_member(
        &mut self,
        owner: ClientId,
        name: &str,
        member: ClientId,
    ) -> CoreResult<()> {
        let descriptor = self.to_many(owner, name)?;
        self.edit_edge(owner, &descriptor, |inner, schema, owner_type| {
            inner.graph.unrelate(
                LinkContext::new(schema, &inner.identity),
                owner_type,
                owner,
                &descriptor,
                member,
                Layer::Current,
            )
        })
    }

    pub fn replace_members(
        &mut self,
        owner: ClientId,
        name: &str,
        members: Vec<ClientId>,
    ) -> CoreResult<()> {
        let descriptor = self.to_many(owner, name)?;
        for member in &members {
            self.check_target(owner, &descriptor, *member)?;
        }
        let mut wanted = Members::Many(Vec::with_capacity(members.len()));
        for member in members {
            wanted.insert(member);
        }
        self.edit_edge(owner, &descriptor, |inner, schema, owner_type| {
            inner.graph.sync_layer(
                LinkContext::new(schema, &inner.identity),
                owner_type,
                owner,
                &descriptor,
                &wanted,
                Layer::Current,
            )
        })
    }

    pub fn create_member(
        &mut self,
        owner: ClientId,
        name: &str,
        attributes: Attributes,
    ) -> CoreResult<ClientId> {
        let descriptor = self.to_many(owner, name)?;
        if descriptor.polymorphic {
            return Err(CoreError::PolymorphicCreate {
                type_name: self.type_of(owner)?,
                relationship: descriptor.name,
            });
        }
        self.ensure_editable(owner, format!("edit {name} on").as_str())?;
        self.schema
            .inverse_for(&self.type_of(owner)?, name)?;

        let member = self.create_local(&descriptor.related_type, attributes)?;
        self.add_member(owner, name, member)?;
        Ok(member)
    }

    fn current_handles(&self, owner: ClientId, name: &str) -> Vec<RecordHandle> {
        self.graph
            .members(owner, name, Layer::Current)
            .into_iter()
            .map(|member| self.handle(member))
            .collect()
    }
}

impl Store {
    /// Reads a to-one relationship.
    ///
    /// Returns `NotYetLoaded` with a shared pending fetch when the target of
    /// an async relationship is not loaded yet; awaiting it with
    /// [`Store::resolve`] loads it.
    ///
    /// # Errors
    ///
    /// `RelationshipNotLoaded` when the target of a synchronous relationship
    /// is not loaded.
    pub fn belongs_to(&self, record: RecordHandle, name: &str) -> CoreResult<BelongsTo> {
        let mut inner = self.inner.lock();
        let owner = inner.live(record)?;
        let descriptor = inner.to_one(owner, name)?;
        match inner.readiness(owner, &descriptor)? {
            Readiness::Ready => Ok(Materialized::Loaded(
                inner
                    .graph
                    .get_one(owner, name, Layer::Current)
                    .map(|target| inner.handle(target)),
            )),
            Readiness::NeedsFetch => Ok(Materialized::NotYetLoaded(
                inner.request_relationship(owner, name, &self.stats),
            )),
        }
    }

    /// Reads a to-many relationship, in order.
    ///
    /// Same loaded / not-yet-loaded split as [`Store::belongs_to`]. Two reads
    /// of an unloaded async relationship share one fetch.
    pub fn has_many(&self, record: RecordHandle, name: &str) -> CoreResult<HasMany> {
        let mut inner = self.inner.lock();
        let owner = inner.live(record)?;
        let descriptor = inner.to_many(owner, name)?;
        match inner.readiness(owner, &descriptor)? {
            Readiness::Ready => Ok(Materialized::Loaded(inner.current_handles(owner, name))),
            Readiness::NeedsFetch => Ok(Materialized::NotYetLoaded(
                inner.request_relationship(owner, name, &self.stats),
            )),
        }
    }

    /// Current target of a to-one relationship, loaded or not.
    pub fn related_one(
        &self,
        record: RecordHandle,
        name: &str,
    ) -> CoreResult<Option<RecordHandle>> {
        let inner = self.inner.lock();
        let owner = inner.live(record)?;
        inner.to_one(owner, name)?;
        Ok(inner
            .graph
            .get_one(owner, name, Layer::Current)
            .map(|target| inner.handle(target)))
    }

    /// Current members of a to-many relationship, loaded or not.
    pub fn related_many(&self, record: RecordHandle, name: &str) -> CoreResult<Vec<RecordHandle>> {
        let inner = self.inner.lock();
        let owner = inner.live(record)?;
        inner.to_many(owner, name)?;
        Ok(inner.current_handles(owner, name))
    }

    /// Sets (or clears) a to-one relationship and updates the inverse.
    ///
    /// # Errors
    ///
    /// `RelationshipType` when `target` has the wrong type, `InvalidState`
    /// when either record is being saved. Nothing changes on error.
    pub fn set_belongs_to(
        &self,
        record: RecordHandle,
        name: &str,
        target: Option<RecordHandle>,
    ) -> CoreResult<()> {
        self.mutate(|inner| {
            let owner = inner.live(record)?;
            let target = target.map(|t| inner.live(t)).transpose()?;
            inner.set_to_one(owner, name, target)
        })
    }

    /// Appends a member to a to-many relationship and updates the inverse.
    /// Adding a member twice is a no-op.
    pub fn add_to_has_many(
        &self,
        record: RecordHandle,
        name: &str,
        member: RecordHandle,
    ) -> CoreResult<()> {
        self.mutate(|inner| {
            let owner = inner.live(record)?;
            let member = inner.live(member)?;
            inner.add_member(owner, name, member)
        })
    }

    /// Removes a member from a to-many relationship and updates the inverse.
    pub fn remove_from_has_many(
        &self,
        record: RecordHandle,
        name: &str,
        member: RecordHandle,
    ) -> CoreResult<()> {
        self.mutate(|inner| {
            let owner = inner.live(record)?;
            let member = inner.live(member)?;
            inner.remove_member(owner, name, member)
        })
    }

    /// Replaces the members of a to-many relationship, keeping the given
    /// order, and updates every affected inverse.
    pub fn replace_has_many(
        &self,
        record: RecordHandle,
        name: &str,
        members: Vec<RecordHandle>,
    ) -> CoreResult<()> {
        self.mutate(|inner| {
            let owner = inner.live(record)?;
            let members = members
                .into_iter()
                .map(|m| inner.live(m))
                .collect::<CoreResult<Vec<_>>>()?;
            inner.replace_members(owner, name, members)
        })
    }

    /// Creates a new local record and appends it to a to-many relationship.
    ///
    /// # Errors
    ///
    /// `PolymorphicCreate` when the relationship is polymorphic, since the
    /// concrete type to create is unknown.
    pub fn create_record_on(
        &self,
        record: RecordHandle,
        name: &str,
        attributes: Attributes,
    ) -> CoreResult<RecordHandle> {
        self.mutate(|inner| {
            let owner = inner.live(record)?;
            let member = inner.create_member(owner, name, attributes)?;
            self.stats.record_created();
            Ok(inner.handle(member))
        })
    }
}

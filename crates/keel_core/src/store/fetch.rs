//! Loading records through the collaborator.
//!
//! The lock is never held across a collaborator call: each operation takes
//! what it needs under the lock, releases it, awaits the call, then
//! re-checks the store before applying the result. A record unloaded while
//! its fetch was outstanding is left alone.

use super::{Store, StoreInner};
use crate::adapter::RelatedRef;
use crate::array::ArrayKind;
use crate::error::{CoreError, CoreResult};
use crate::fetch::{FetchKey, FetchStatus, PendingFetch, Start};
use crate::graph::{Layer, Members};
use crate::payload::{RawRecordPayload, ResourceIdentifier};
use crate::record::{RecordHandle, RecordState, StateEvent};
use crate::stats::{AdapterCall, StoreStats};
use crate::types::{ClientId, RecordArrayId};
use keel_value::Value;
use tracing::{debug, trace};

impl StoreInner {
    /// Moves records that are waiting on a fetch into `loading`.
    fn mark_loading(&mut self, records: &[ClientId]) {
        for client_id in records {
            if self
                .identity
                .get(*client_id)
                .is_some_and(|r| r.state == RecordState::Empty)
            {
                if let Err(err) = self.transition(*client_id, StateEvent::FetchStarted) {
                    trace!(%client_id, %err, "loading transition skipped");
                }
            }
        }
    }

    /// Returns records still `loading` to `empty`.
    fn clear_loading(&mut self, records: &[ClientId]) {
        for client_id in records {
            if self
                .identity
                .get(*client_id)
                .is_some_and(|r| r.state == RecordState::Loading)
            {
                if let Err(err) = self.transition(*client_id, StateEvent::FetchFailed) {
                    trace!(%client_id, %err, "fetch failure transition skipped");
                }
            }
        }
    }

    /// Validates every payload, then applies them in order.
    fn push_all(
        &mut self,
        payloads: &[RawRecordPayload],
        stats: &StoreStats,
    ) -> CoreResult<Vec<ClientId>> {
        for payload in payloads {
            self.validate_payload(payload)?;
        }
        payloads
            .iter()
            .map(|payload| self.apply_payload(payload, stats))
            .collect()
    }
}

/// What a relationship fetch asks for.
struct RelatedRequest {
    snapshot: crate::payload::RecordSnapshot,
    descriptor: crate::schema::RelationshipDescriptor,
    related: RelatedRef,
    waiting: Vec<ClientId>,
}

impl Store {
    /// Drives a pending fetch to completion, or waits for whoever is
    /// driving it.
    ///
    /// # Errors
    ///
    /// The collaborator's error when this caller drove the fetch,
    /// `FetchFailed` when it joined a fetch that failed.
    pub async fn resolve(&self, pending: PendingFetch) -> CoreResult<()> {
        let start = self.inner.lock().fetches.start(pending.key());
        match start {
            Start::Drive => self.run_fetch(pending.key().clone()).await,
            Start::Join(shared) => shared.wait().await,
            Start::Finished => pending.wait().await,
        }
    }

    /// Drives every queued fetch, including fetches queued while this call
    /// runs. Returns the first error after trying all of them.
    pub async fn settle(&self) -> CoreResult<()> {
        let mut first_error = None;
        loop {
            let queued = self.inner.lock().fetches.queued();
            if queued.is_empty() {
                break;
            }
            for key in queued {
                let start = self.inner.lock().fetches.start(&key);
                if let Start::Drive = start {
                    if let Err(err) = self.run_fetch(key).await {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn run_fetch(&self, key: FetchKey) -> CoreResult<()> {
        let result = match &key {
            FetchKey::Record { type_name, id } => self.fetch_record(type_name, id).await,
            FetchKey::Relationship { owner, name } => {
                self.fetch_relationship(*owner, name).await
            }
        };

        let status = match &result {
            Ok(()) => FetchStatus::Done,
            Err(err) => FetchStatus::Failed(err.to_string()),
        };
        {
            let mut inner = self.inner.lock();
            inner.fetches.finish(&key, status);
            inner.finish_operation();
        }
        self.after_operation();
        result
    }

    async fn fetch_record(&self, type_name: &str, id: &str) -> CoreResult<()> {
        self.stats.record_call(AdapterCall::Find, 1);
        let result = self.adapter.find_one(type_name, id).await;

        let mut inner = self.inner.lock();
        let Some(client_id) = inner.identity.lookup(type_name, id) else {
            debug!(type_name, id, "record unloaded while its fetch was outstanding");
            return Ok(());
        };
        if let Some(record) = inner.identity.get_mut(client_id) {
            record.is_reloading = false;
        }
        match result {
            Ok(Some(payload)) => {
                if let Err(err) = inner.push_payload(&payload, &self.stats) {
                    inner.clear_loading(&[client_id]);
                    return Err(err);
                }
                Ok(())
            }
            Ok(None) => {
                inner.clear_loading(&[client_id]);
                Err(CoreError::RecordNotFound {
                    type_name: type_name.to_string(),
                    id: id.to_string(),
                })
            }
            Err(err) => {
                inner.clear_loading(&[client_id]);
                Err(CoreError::Adapter(err))
            }
        }
    }

    fn related_request(&self, owner: ClientId, name: &str) -> CoreResult<Option<RelatedRequest>> {
        let mut inner = self.inner.lock();
        if !inner.identity.contains(owner) {
            return Err(CoreError::RecordNotLive { client_id: owner });
        }
        let (_, descriptor) = inner.relationship_of(owner, name)?;
        let link = inner
            .graph
            .edge(owner, name)
            .filter(|edge| edge.needs_link_fetch)
            .and_then(|edge| edge.link.clone());

        let (related, waiting) = match link {
            Some(url) => (RelatedRef::Link(url), Vec::new()),
            None => {
                let mut waiting = Vec::new();
                let mut ids = Vec::new();
                for member in inner.graph.members(owner, name, Layer::Current) {
                    let Some(record) = inner.identity.get(member) else {
                        continue;
                    };
                    if record.state.is_loaded() {
                        continue;
                    }
                    if let Some(id) = &record.id {
                        ids.push(ResourceIdentifier::new(record.type_name.clone(), id.clone()));
                        waiting.push(member);
                    }
                }
                if ids.is_empty() {
                    return Ok(None);
                }
                (RelatedRef::Ids(ids), waiting)
            }
        };

        inner.mark_loading(&waiting);
        let snapshot = inner.snapshot(owner, Layer::Current)?;
        Ok(Some(RelatedRequest {
            snapshot,
            descriptor,
            related,
            waiting,
        }))
    }

    async fn fetch_relationship(&self, owner: ClientId, name: &str) -> CoreResult<()> {
        let Some(request) = self.related_request(owner, name)? else {
            return Ok(());
        };

        self.stats.record_call(AdapterCall::Related, 1);
        trace!(%owner, relationship = name, "fetching relationship");
        let result = self
            .adapter
            .find_related(&request.snapshot, &request.descriptor, request.related.clone())
            .await;

        let mut inner = self.inner.lock();
        if !inner.identity.contains(owner) {
            debug!(
                %owner,
                relationship = name,
                "owner unloaded while its relationship was loading"
            );
            inner.clear_loading(&request.waiting);
            return Ok(());
        }

        let outcome = match result {
            Ok(payloads) => match inner.push_all(&payloads, &self.stats) {
                Ok(loaded) => {
                    if let RelatedRef::Link(_) = request.related {
                        let members = if request.descriptor.kind.is_to_one() {
                            Members::One(loaded.first().copied())
                        } else {
                            Members::Many(loaded)
                        };
                        inner.apply_server_members(owner, &request.descriptor, &members)
                    } else {
                        Ok(())
                    }
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(CoreError::Adapter(err)),
        };
        inner.clear_loading(&request.waiting);
        outcome
    }

    /// Returns the record for `(type, id)`, fetching it if it is not loaded.
    ///
    /// Concurrent finds for the same record share one collaborator call.
    ///
    /// # Errors
    ///
    /// `RecordNotFound` if the collaborator has no such record; the
    /// collaborator's error if the call fails. Either way the record goes
    /// back to `empty`.
    pub async fn find(&self, type_name: &str, id: &str) -> CoreResult<RecordHandle> {
        let pending = {
            let mut inner = self.inner.lock();
            inner.schema.model(type_name)?;
            let (client_id, _) = inner.identity.identity_for(type_name, id);
            if inner.record(client_id)?.state.is_loaded() {
                return Ok(inner.handle(client_id));
            }
            let (pending, existed) = inner.fetches.request(FetchKey::Record {
                type_name: type_name.to_string(),
                id: id.to_string(),
            });
            if existed {
                trace!(type_name, id, "joined outstanding fetch");
                self.stats.record_dedupe();
            }
            inner.mark_loading(&[client_id]);
            inner.finish_operation();
            pending
        };
        self.after_operation();

        self.resolve(pending).await?;

        let inner = self.inner.lock();
        inner
            .identity
            .lookup(type_name, id)
            .filter(|c| inner.identity.get(*c).is_some_and(|r| r.state.is_loaded()))
            .map(|c| inner.handle(c))
            .ok_or_else(|| CoreError::RecordNotFound {
                type_name: type_name.to_string(),
                id: id.to_string(),
            })
    }

    /// Returns the records for `ids`, in order, fetching the ones that are
    /// not loaded with a single collaborator call.
    pub async fn find_many(&self, type_name: &str, ids: &[&str]) -> CoreResult<Vec<RecordHandle>> {
        let (handles, missing, waiting) = {
            let mut inner = self.inner.lock();
            inner.schema.model(type_name)?;
            let mut handles = Vec::with_capacity(ids.len());
            let mut missing = Vec::new();
            let mut waiting = Vec::new();
            for id in ids {
                let (client_id, _) = inner.identity.identity_for(type_name, id);
                handles.push(inner.handle(client_id));
                if inner.record(client_id)?.state == RecordState::Empty {
                    missing.push((*id).to_string());
                    waiting.push(client_id);
                }
            }
            inner.mark_loading(&waiting);
            inner.finish_operation();
            (handles, missing, waiting)
        };
        self.after_operation();

        if !missing.is_empty() {
            self.stats.record_call(AdapterCall::Find, 1);
            let result = self.adapter.find_many(type_name, &missing).await;
            let outcome = {
                let mut inner = self.inner.lock();
                let outcome = result
                    .map_err(CoreError::Adapter)
                    .and_then(|payloads| inner.push_all(&payloads, &self.stats));
                inner.clear_loading(&waiting);
                inner.finish_operation();
                outcome
            };
            self.after_operation();
            outcome?;
        }
        Ok(handles)
    }

    /// Re-fetches a loaded record. Local edits survive unless the fresh
    /// persisted value equals them.
    pub async fn reload(&self, record: RecordHandle) -> CoreResult<()> {
        let pending = {
            let mut inner = self.inner.lock();
            let client_id = inner.live(record)?;
            let data = inner.record(client_id)?;
            let state = data.state;
            let Some(id) = data.id.clone() else {
                return Err(CoreError::invalid_state(state.path(), "reload"));
            };
            if !state.is_loaded() || state.is_saving() || state.is_deleted() {
                return Err(CoreError::invalid_state(state.path(), "reload"));
            }
            let type_name = data.type_name.clone();
            let (pending, existed) = inner.fetches.request(FetchKey::Record { type_name, id });
            if existed {
                self.stats.record_dedupe();
            }
            inner.record_mut(client_id)?.is_reloading = true;
            pending
        };
        self.resolve(pending).await
    }

    /// Loads the unloaded members of a relationship (or follows its link)
    /// and returns the members afterwards. Works for synchronous
    /// relationships too.
    pub async fn load_relationship(
        &self,
        record: RecordHandle,
        name: &str,
    ) -> CoreResult<Vec<RecordHandle>> {
        let pending = {
            let mut inner = self.inner.lock();
            let owner = inner.live(record)?;
            inner.relationship_of(owner, name)?;
            let needs_link = inner
                .graph
                .edge(owner, name)
                .is_some_and(|edge| edge.needs_link_fetch);
            let unloaded = inner
                .graph
                .members(owner, name, Layer::Current)
                .into_iter()
                .any(|m| inner.identity.get(m).is_some_and(|r| !r.state.is_loaded()));
            (needs_link || unloaded).then(|| inner.request_relationship(owner, name, &self.stats))
        };
        if let Some(pending) = pending {
            self.resolve(pending).await?;
        }
        self.related_many_or_one(record, name)
    }

    fn related_many_or_one(
        &self,
        record: RecordHandle,
        name: &str,
    ) -> CoreResult<Vec<RecordHandle>> {
        let inner = self.inner.lock();
        let owner = inner.live(record)?;
        Ok(inner
            .graph
            .members(owner, name, Layer::Current)
            .into_iter()
            .map(|member| inner.handle(member))
            .collect())
    }

    /// Runs a query and returns an array holding the response, in response
    /// order. Records loaded later never join it; deleted or unloaded
    /// records leave it.
    pub async fn query(&self, type_name: &str, params: Value) -> CoreResult<RecordArrayId> {
        let id = {
            let mut inner = self.inner.lock();
            inner.schema.model(type_name)?;
            let id = inner
                .arrays
                .create(type_name, ArrayKind::Query(params.clone()), Vec::new());
            inner.arrays.set_updating(id, true)?;
            id
        };
        if let Err(err) = self.run_query(id, type_name, &params).await {
            // A failed query leaves no array behind.
            if let Err(gone) = self.inner.lock().arrays.destroy(id) {
                trace!(%gone, "failed query array already destroyed");
            }
            return Err(err);
        }
        Ok(id)
    }

    /// Re-runs an array's query and swaps in the new membership. The array
    /// reports `is_updating` until the response is applied.
    pub async fn update_array(&self, id: RecordArrayId) -> CoreResult<()> {
        let (type_name, params) = {
            let mut inner = self.inner.lock();
            let (type_name, params) = inner.arrays.query_params(id)?;
            inner.arrays.set_updating(id, true)?;
            (type_name, params)
        };
        self.run_query(id, &type_name, &params).await
    }

    async fn run_query(
        &self,
        id: RecordArrayId,
        type_name: &str,
        params: &Value,
    ) -> CoreResult<()> {
        self.stats.record_call(AdapterCall::Query, 1);
        let result = self.adapter.query(type_name, params).await;

        let outcome = {
            let mut inner = self.inner.lock();
            let outcome = match result {
                Ok(response) => inner
                    .push_all(&response.records, &self.stats)
                    .and_then(|loaded| {
                        let members: Vec<ClientId> = loaded
                            .into_iter()
                            .filter(|c| inner.identity.get(*c).is_some_and(|r| r.is_present()))
                            .collect();
                        match inner.arrays.replace_members(id, &members, response.meta) {
                            Err(CoreError::ArrayNotFound { .. }) => {
                                debug!(
                                    array = %id,
                                    "array destroyed while its query was outstanding"
                                );
                                Ok(())
                            }
                            other => other,
                        }
                    }),
                Err(err) => Err(CoreError::Adapter(err)),
            };
            if outcome.is_err() {
                if let Err(err) = inner.arrays.set_updating(id, false) {
                    trace!(%err, "query array gone");
                }
            }
            inner.finish_operation();
            outcome
        };
        self.after_operation();
        outcome
    }
}

//! In-memory persistence collaborator.
//!
//! [`MemoryAdapter`] keeps records in a map and answers the store's calls
//! from it. Tests seed it with payloads, script failures, and read back the
//! call log afterwards. Replies can be held back (`pause` / `resume`) or
//! delayed by a number of scheduler yields, so tests can interleave store
//! operations with outstanding calls.

use async_trait::async_trait;
use keel_core::{
    Adapter, AdapterError, AdapterResult, Attributes, ClientId, FieldErrors, QueryResponse,
    RawRecordPayload, RecordSnapshot, RelatedRef, RelationshipData, RelationshipDescriptor,
    ResourceIdentifier, SnapshotRelationship, Value,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::trace;

/// Hook a call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `find_one`.
    FindOne,
    /// `find_many`.
    FindMany,
    /// `find_related`.
    FindRelated,
    /// `query`.
    Query,
    /// One record created, alone or inside a batch.
    Create,
    /// One record updated, alone or inside a batch.
    Update,
    /// One record deleted, alone or inside a batch.
    Delete,
    /// A batch hook.
    Batch,
}

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// A single record fetch.
    FindOne {
        /// Requested type.
        type_name: String,
        /// Requested id.
        id: String,
    },
    /// A multi-record fetch.
    FindMany {
        /// Requested type.
        type_name: String,
        /// Requested ids, in request order.
        ids: Vec<String>,
    },
    /// A relationship fetch.
    FindRelated {
        /// Owner type.
        owner: String,
        /// Relationship name.
        relationship: String,
        /// What was asked for.
        related: RelatedRef,
    },
    /// A query.
    Query {
        /// Queried type.
        type_name: String,
        /// Query parameters.
        params: Value,
    },
    /// A create.
    Create {
        /// Concrete type.
        type_name: String,
        /// Client id of the record being created.
        client_id: ClientId,
    },
    /// An update.
    Update {
        /// Concrete type.
        type_name: String,
        /// Record id.
        id: String,
    },
    /// A delete.
    Delete {
        /// Concrete type.
        type_name: String,
        /// Record id.
        id: String,
    },
    /// A batch hook, recorded before its per-record calls.
    Batch {
        /// Per-record kind of the batch.
        kind: CallKind,
        /// Concrete type.
        type_name: String,
        /// Number of records.
        size: usize,
    },
}

impl Call {
    /// Returns the kind of this call.
    pub fn kind(&self) -> CallKind {
        match self {
            Call::FindOne { .. } => CallKind::FindOne,
            Call::FindMany { .. } => CallKind::FindMany,
            Call::FindRelated { .. } => CallKind::FindRelated,
            Call::Query { .. } => CallKind::Query,
            Call::Create { .. } => CallKind::Create,
            Call::Update { .. } => CallKind::Update,
            Call::Delete { .. } => CallKind::Delete,
            Call::Batch { .. } => CallKind::Batch,
        }
    }

    /// Returns the type the call concerns.
    pub fn type_name(&self) -> &str {
        match self {
            Call::FindOne { type_name, .. }
            | Call::FindMany { type_name, .. }
            | Call::Query { type_name, .. }
            | Call::Create { type_name, .. }
            | Call::Update { type_name, .. }
            | Call::Delete { type_name, .. }
            | Call::Batch { type_name, .. } => type_name,
            Call::FindRelated { owner, .. } => owner,
        }
    }
}

/// Builds a validation failure with one field message.
pub fn invalid(field: &str, message: &str) -> AdapterError {
    AdapterError::ValidationFailed(FieldErrors::new().with(field, message))
}

struct ScriptedFailure {
    kind: CallKind,
    type_name: String,
    error: AdapterError,
}

struct CannedQuery {
    type_name: String,
    params: Value,
    records: Vec<ResourceIdentifier>,
    meta: Option<Value>,
}

#[derive(Default)]
struct Backend {
    records: BTreeMap<(String, String), RawRecordPayload>,
    links: HashMap<String, Vec<ResourceIdentifier>>,
    queries: Vec<CannedQuery>,
    stamps: HashMap<String, Attributes>,
    failures: VecDeque<ScriptedFailure>,
    calls: Vec<Call>,
    next_id: u64,
}

impl Backend {
    fn take_failure(&mut self, kind: CallKind, type_name: &str) -> AdapterResult<()> {
        let position = self
            .failures
            .iter()
            .position(|f| f.kind == kind && f.type_name == type_name);
        match position.and_then(|i| self.failures.remove(i)) {
            Some(failure) => {
                trace!(?kind, type_name, "scripted failure");
                Err(failure.error)
            }
            None => Ok(()),
        }
    }

    fn lookup(&self, ident: &ResourceIdentifier) -> Option<RawRecordPayload> {
        self.records
            .get(&(ident.type_name.clone(), ident.id.clone()))
            .cloned()
    }

    fn lookup_all(&self, idents: &[ResourceIdentifier]) -> Vec<RawRecordPayload> {
        idents.iter().filter_map(|i| self.lookup(i)).collect()
    }

    fn response(&self, type_name: &str, id: &str) -> Option<RawRecordPayload> {
        self.stamps.get(type_name).map(|stamped| {
            let mut payload = RawRecordPayload::new(type_name, id);
            payload.attributes = stamped.clone();
            payload
        })
    }

    fn store(&mut self, snapshot: &RecordSnapshot, id: &str) {
        let mut payload = snapshot.to_payload(id);
        if let Some(stamped) = self.stamps.get(&snapshot.type_name) {
            payload.attributes.extend(stamped.clone());
        }
        for (name, relationship) in &snapshot.relationships {
            let data = match relationship {
                SnapshotRelationship::One(target) => RelationshipData::One(
                    target.as_ref().and_then(|t| {
                        t.id.as_ref()
                            .map(|id| ResourceIdentifier::new(&t.type_name, id))
                    }),
                ),
                SnapshotRelationship::Many(members) => RelationshipData::Many(
                    members
                        .iter()
                        .filter_map(|m| {
                            m.id.as_ref()
                                .map(|id| ResourceIdentifier::new(&m.type_name, id))
                        })
                        .collect(),
                ),
            };
            payload.relationships.insert(name.clone(), data);
        }
        self.records
            .insert((snapshot.type_name.clone(), id.to_string()), payload);
    }

    fn create(&mut self, snapshot: &RecordSnapshot) -> AdapterResult<Option<RawRecordPayload>> {
        self.calls.push(Call::Create {
            type_name: snapshot.type_name.clone(),
            client_id: snapshot.client_id,
        });
        self.take_failure(CallKind::Create, &snapshot.type_name)?;

        let id = match &snapshot.id {
            Some(id) => id.clone(),
            None => {
                self.next_id += 1;
                self.next_id.to_string()
            }
        };
        self.store(snapshot, &id);
        Ok(Some(
            self.response(&snapshot.type_name, &id)
                .unwrap_or_else(|| RawRecordPayload::new(&snapshot.type_name, &id)),
        ))
    }

    fn update(&mut self, snapshot: &RecordSnapshot) -> AdapterResult<Option<RawRecordPayload>> {
        let id = snapshot
            .id
            .clone()
            .ok_or_else(|| AdapterError::fatal("update without an id"))?;
        self.calls.push(Call::Update {
            type_name: snapshot.type_name.clone(),
            id: id.clone(),
        });
        self.take_failure(CallKind::Update, &snapshot.type_name)?;
        self.store(snapshot, &id);
        Ok(self.response(&snapshot.type_name, &id))
    }

    fn delete(&mut self, snapshot: &RecordSnapshot) -> AdapterResult<()> {
        let id = snapshot
            .id
            .clone()
            .ok_or_else(|| AdapterError::fatal("delete without an id"))?;
        self.calls.push(Call::Delete {
            type_name: snapshot.type_name.clone(),
            id: id.clone(),
        });
        self.take_failure(CallKind::Delete, &snapshot.type_name)?;
        self.records.remove(&(snapshot.type_name.clone(), id));
        Ok(())
    }

    fn matches(payload: &RawRecordPayload, params: &Value) -> bool {
        match params.as_map() {
            Some(wanted) => wanted
                .iter()
                .all(|(name, value)| payload.attributes.get(name) == Some(value)),
            None => true,
        }
    }
}

/// In-memory [`Adapter`].
pub struct MemoryAdapter {
    backend: Mutex<Backend>,
    gate: watch::Sender<bool>,
    yields: AtomicUsize,
    bulk: AtomicBool,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            backend: Mutex::new(Backend {
                next_id: 1000,
                ..Backend::default()
            }),
            gate,
            yields: AtomicUsize::new(0),
            bulk: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = self.backend.lock();
        f.debug_struct("MemoryAdapter")
            .field("records", &backend.records.len())
            .field("calls", &backend.calls.len())
            .field("paused", &!*self.gate.borrow())
            .finish()
    }
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record.
    pub fn insert(&self, payload: RawRecordPayload) {
        let key = (payload.type_name.clone(), payload.id.clone());
        self.backend.lock().records.insert(key, payload);
    }

    /// Seeds several records.
    pub fn insert_all(&self, payloads: impl IntoIterator<Item = RawRecordPayload>) {
        for payload in payloads {
            self.insert(payload);
        }
    }

    /// Returns the stored copy of a record.
    pub fn stored(&self, type_name: &str, id: &str) -> Option<RawRecordPayload> {
        self.backend
            .lock()
            .records
            .get(&(type_name.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.backend.lock().records.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes `url` resolve to the given records.
    pub fn link(&self, url: &str, records: Vec<ResourceIdentifier>) {
        self.backend.lock().links.insert(url.to_string(), records);
    }

    /// Answers queries for `(type, params)` with the given records, in
    /// order. Unscripted queries match stored records by attribute.
    pub fn respond_to_query(
        &self,
        type_name: &str,
        params: Value,
        records: Vec<ResourceIdentifier>,
        meta: Option<Value>,
    ) {
        let mut backend = self.backend.lock();
        backend
            .queries
            .retain(|q| !(q.type_name == type_name && q.params == params));
        backend.queries.push(CannedQuery {
            type_name: type_name.to_string(),
            params,
            records,
            meta,
        });
    }

    /// Adds an attribute to every save response for `type_name`, as if
    /// the server stamped it.
    pub fn stamp(&self, type_name: &str, name: &str, value: impl Into<Value>) {
        self.backend
            .lock()
            .stamps
            .entry(type_name.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    /// Makes the next `kind` call for `type_name` fail with `error`.
    pub fn fail_next(&self, kind: CallKind, type_name: &str, error: AdapterError) {
        self.backend.lock().failures.push_back(ScriptedFailure {
            kind,
            type_name: type_name.to_string(),
            error,
        });
    }

    /// Enables or disables the batch hooks.
    pub fn set_bulk(&self, enabled: bool) {
        self.bulk.store(enabled, Ordering::SeqCst);
    }

    /// Delays every reply by `yields` scheduler yields.
    pub fn set_yields(&self, yields: usize) {
        self.yields.store(yields, Ordering::SeqCst);
    }

    /// Holds every reply until [`MemoryAdapter::resume`].
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Releases held replies.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Returns every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.backend.lock().calls.clone()
    }

    /// Number of calls of one kind.
    pub fn calls_of(&self, kind: CallKind) -> usize {
        self.backend
            .lock()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.backend.lock().calls.clear();
    }

    fn record_call(&self, call: Call) {
        self.backend.lock().calls.push(call);
    }

    async fn before_reply(&self) {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        for _ in 0..self.yields.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn find_one(
        &self,
        type_name: &str,
        id: &str,
    ) -> AdapterResult<Option<RawRecordPayload>> {
        self.record_call(Call::FindOne {
            type_name: type_name.to_string(),
            id: id.to_string(),
        });
        self.before_reply().await;

        let mut backend = self.backend.lock();
        backend.take_failure(CallKind::FindOne, type_name)?;
        Ok(backend.lookup(&ResourceIdentifier::new(type_name, id)))
    }

    async fn find_many(
        &self,
        type_name: &str,
        ids: &[String],
    ) -> AdapterResult<Vec<RawRecordPayload>> {
        self.record_call(Call::FindMany {
            type_name: type_name.to_string(),
            ids: ids.to_vec(),
        });
        self.before_reply().await;

        let mut backend = self.backend.lock();
        backend.take_failure(CallKind::FindMany, type_name)?;
        let idents: Vec<_> = ids
            .iter()
            .map(|id| ResourceIdentifier::new(type_name, id))
            .collect();
        Ok(backend.lookup_all(&idents))
    }

    async fn find_related(
        &self,
        owner: &RecordSnapshot,
        relationship: &RelationshipDescriptor,
        related: RelatedRef,
    ) -> AdapterResult<Vec<RawRecordPayload>> {
        self.record_call(Call::FindRelated {
            owner: owner.type_name.clone(),
            relationship: relationship.name.clone(),
            related: related.clone(),
        });
        self.before_reply().await;

        let mut backend = self.backend.lock();
        backend.take_failure(CallKind::FindRelated, &owner.type_name)?;
        match related {
            RelatedRef::Link(url) => {
                let idents = backend
                    .links
                    .get(&url)
                    .cloned()
                    .ok_or_else(|| AdapterError::fatal(format!("no such link: {url}")))?;
                Ok(backend.lookup_all(&idents))
            }
            RelatedRef::Ids(idents) => Ok(backend.lookup_all(&idents)),
        }
    }

    async fn query(&self, type_name: &str, params: &Value) -> AdapterResult<QueryResponse> {
        self.record_call(Call::Query {
            type_name: type_name.to_string(),
            params: params.clone(),
        });
        self.before_reply().await;

        let mut backend = self.backend.lock();
        backend.take_failure(CallKind::Query, type_name)?;
        let canned = backend
            .queries
            .iter()
            .find(|q| q.type_name == type_name && &q.params == params)
            .map(|q| (q.records.clone(), q.meta.clone()));
        match canned {
            Some((records, meta)) => Ok(QueryResponse {
                records: backend.lookup_all(&records),
                meta,
            }),
            None => Ok(QueryResponse::new(
                backend
                    .records
                    .values()
                    .filter(|p| p.type_name == type_name && Backend::matches(p, params))
                    .cloned()
                    .collect(),
            )),
        }
    }

    async fn create_one(
        &self,
        snapshot: &RecordSnapshot,
    ) -> AdapterResult<Option<RawRecordPayload>> {
        self.before_reply().await;
        self.backend.lock().create(snapshot)
    }

    async fn update_one(
        &self,
        snapshot: &RecordSnapshot,
    ) -> AdapterResult<Option<RawRecordPayload>> {
        self.before_reply().await;
        self.backend.lock().update(snapshot)
    }

    async fn delete_one(&self, snapshot: &RecordSnapshot) -> AdapterResult<()> {
        self.before_reply().await;
        self.backend.lock().delete(snapshot)
    }

    fn supports_bulk_commit(&self) -> bool {
        self.bulk.load(Ordering::SeqCst)
    }

    async fn create_many(
        &self,
        snapshots: &[RecordSnapshot],
    ) -> Vec<AdapterResult<Option<RawRecordPayload>>> {
        self.record_batch(CallKind::Create, snapshots);
        self.before_reply().await;
        let mut backend = self.backend.lock();
        snapshots.iter().map(|s| backend.create(s)).collect()
    }

    async fn update_many(
        &self,
        snapshots: &[RecordSnapshot],
    ) -> Vec<AdapterResult<Option<RawRecordPayload>>> {
        self.record_batch(CallKind::Update, snapshots);
        self.before_reply().await;
        let mut backend = self.backend.lock();
        snapshots.iter().map(|s| backend.update(s)).collect()
    }

    async fn delete_many(&self, snapshots: &[RecordSnapshot]) -> Vec<AdapterResult<()>> {
        self.record_batch(CallKind::Delete, snapshots);
        self.before_reply().await;
        let mut backend = self.backend.lock();
        snapshots.iter().map(|s| backend.delete(s)).collect()
    }
}

impl MemoryAdapter {
    fn record_batch(&self, kind: CallKind, snapshots: &[RecordSnapshot]) {
        if let Some(first) = snapshots.first() {
            self.record_call(Call::Batch {
                kind,
                type_name: first.type_name.clone(),
                size: snapshots.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::SnapshotRef;

    fn snapshot(type_name: &str, id: Option<&str>) -> RecordSnapshot {
        RecordSnapshot {
            client_id: ClientId(7),
            type_name: type_name.to_string(),
            id: id.map(str::to_string),
            attributes: Attributes::from([("name".to_string(), Value::from("Tom"))]),
            changed: vec!["name".to_string()],
            relationships: BTreeMap::from([(
                "group".to_string(),
                SnapshotRelationship::One(Some(SnapshotRef {
                    type_name: "group".to_string(),
                    id: Some("9".to_string()),
                    client_id: ClientId(3),
                })),
            )]),
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_stores_relationships() {
        let adapter = MemoryAdapter::new();
        let response = adapter
            .create_one(&snapshot("person", None))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.id, "1001");
        let stored = adapter.stored("person", "1001").unwrap();
        assert_eq!(stored.attributes.get("name"), Some(&Value::from("Tom")));
        assert_eq!(
            stored.relationships.get("group"),
            Some(&RelationshipData::One(Some(ResourceIdentifier::new("group", "9"))))
        );
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let adapter = MemoryAdapter::new();
        adapter.fail_next(CallKind::Update, "person", invalid("name", "is taken"));

        let err = adapter
            .update_one(&snapshot("person", Some("1")))
            .await
            .unwrap_err();
        assert_eq!(
            err.field_errors().unwrap().get("name").unwrap(),
            &["is taken".to_string()]
        );
        assert!(adapter.update_one(&snapshot("person", Some("1"))).await.is_ok());
        assert_eq!(adapter.calls_of(CallKind::Update), 2);
    }

    #[tokio::test]
    async fn unscripted_queries_match_attributes() {
        let adapter = MemoryAdapter::new();
        adapter.insert(RawRecordPayload::new("person", "1").attr("name", "Tom"));
        adapter.insert(RawRecordPayload::new("person", "2").attr("name", "Yehuda"));

        let params = Value::Map(BTreeMap::from([("name".to_string(), Value::from("Tom"))]));
        let response = adapter.query("person", &params).await.unwrap();
        assert_eq!(response.records.len(), 1);
        assert_eq!(response.records[0].id, "1");
    }

    #[tokio::test]
    async fn paused_replies_wait_for_resume() {
        let adapter = MemoryAdapter::new();
        adapter.insert(RawRecordPayload::new("person", "1"));
        adapter.pause();

        let (found, ()) = tokio::join!(adapter.find_one("person", "1"), async {
            tokio::task::yield_now().await;
            assert_eq!(adapter.calls_of(CallKind::FindOne), 1);
            adapter.resume();
        });
        assert!(found.unwrap().is_some());
    }
}

//! Identity registry.
//!
//! Maps `(type, id)` pairs and client ids to the single record the store
//! keeps for them. A record is addressable by client id for its whole life;
//! it becomes addressable by `(type, id)` once it has an id.

use crate::error::{CoreError, CoreResult};
use crate::graph::RecordTypes;
use crate::record::{RecordData, RecordState};
use crate::types::ClientId;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// The identity map of one store.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    next_client_id: u64,
    records: BTreeMap<ClientId, RecordData>,
    by_key: HashMap<(String, String), ClientId>,
    by_type: HashMap<String, Vec<ClientId>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self {
            next_client_id: 1,
            ..Self::default()
        }
    }

    fn allocate(&mut self) -> ClientId {
        let id = ClientId::new(self.next_client_id);
        self.next_client_id += 1;
        id
    }

    fn insert(&mut self, client_id: ClientId, data: RecordData) {
        self.by_type
            .entry(data.type_name.clone())
            .or_default()
            .push(client_id);
        self.records.insert(client_id, data);
    }

    /// Looks up `(type, id)`, creating an empty record on first reference.
    /// Returns the client id and whether it was created.
    pub fn identity_for(&mut self, type_name: &str, id: &str) -> (ClientId, bool) {
        let key = (type_name.to_string(), id.to_string());
        if let Some(client_id) = self.by_key.get(&key) {
            return (*client_id, false);
        }

        let client_id = self.allocate();
        self.insert(
            client_id,
            RecordData::new(type_name, Some(id.to_string()), RecordState::Empty),
        );
        self.by_key.insert(key, client_id);
        trace!(type_name, id, %client_id, "new identity");
        (client_id, true)
    }

    /// Allocates a record that has no id yet.
    pub fn create_local(&mut self, type_name: &str) -> ClientId {
        let client_id = self.allocate();
        self.insert(
            client_id,
            RecordData::new(type_name, None, RecordState::Created),
        );
        debug!(type_name, %client_id, "created local record");
        client_id
    }

    /// Makes a record addressable by `(type, id)`.
    ///
    /// Assigning the id the record already has is a no-op. Fails if another
    /// record of the same type owns the id, or if the record already has a
    /// different id.
    pub fn assign_id(&mut self, client_id: ClientId, id: &str) -> CoreResult<()> {
        let record = self
            .records
            .get(&client_id)
            .ok_or(CoreError::RecordNotLive { client_id })?;

        if record.id.as_deref() == Some(id) {
            return Ok(());
        }
        if let Some(existing) = &record.id {
            return Err(CoreError::invalid_operation(format!(
                "{client_id} already has id {existing:?}"
            )));
        }

        let key = (record.type_name.clone(), id.to_string());
        if self.by_key.contains_key(&key) {
            return Err(CoreError::duplicate_id(&record.type_name, id));
        }

        debug!(type_name = %record.type_name, id, %client_id, "assigned id");
        self.by_key.insert(key, client_id);
        if let Some(record) = self.records.get_mut(&client_id) {
            record.id = Some(id.to_string());
        }
        Ok(())
    }

    /// Drops the `(type, id)` key of a record while keeping the record
    /// itself, so the id can be used by a fresh record.
    pub fn release_key(&mut self, client_id: ClientId) {
        let Some(record) = self.records.get(&client_id) else {
            return;
        };
        if let Some(id) = &record.id {
            let key = (record.type_name.clone(), id.clone());
            if self.by_key.get(&key) == Some(&client_id) {
                self.by_key.remove(&key);
            }
        }
        if let Some(members) = self.by_type.get_mut(&record.type_name) {
            members.retain(|c| *c != client_id);
        }
    }

    /// Removes a record from every index.
    pub fn remove(&mut self, client_id: ClientId) -> Option<RecordData> {
        self.release_key(client_id);
        self.records.remove(&client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&RecordData> {
        self.records.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut RecordData> {
        self.records.get_mut(&client_id)
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.records.contains_key(&client_id)
    }

    /// Looks up `(type, id)` without creating anything.
    pub fn lookup(&self, type_name: &str, id: &str) -> Option<ClientId> {
        self.by_key
            .get(&(type_name.to_string(), id.to_string()))
            .copied()
    }

    /// Records of one type that are still indexed, in creation order.
    pub fn records_of(&self, type_name: &str) -> &[ClientId] {
        self.by_type.get(type_name).map_or(&[], Vec::as_slice)
    }

    /// Every record, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &RecordData)> {
        self.records.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl RecordTypes for IdentityMap {
    fn type_of(&self, client_id: ClientId) -> Option<&str> {
        self.get(client_id).map(|record| record.type_name.as_str())
    }
}

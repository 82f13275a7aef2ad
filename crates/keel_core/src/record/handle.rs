//! Record handle.

use crate::types::{ClientId, StoreId};
use std::fmt;

/// Canonical reference to one record of one store.
///
/// A handle is a small copyable key. The record it names lives in the
/// store; every read goes through the store, so a handle never holds a
/// stale copy of the record. In particular, when a new record is assigned
/// its id, every existing copy of its handle observes the id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHandle {
    store: StoreId,
    client_id: ClientId,
}

impl RecordHandle {
    pub(crate) const fn new(store: StoreId, client_id: ClientId) -> Self {
        Self { store, client_id }
    }

    /// Returns the client id.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Returns the id of the store that issued the handle.
    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.store
    }
}

impl fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordHandle({})", self.client_id)
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.client_id)
    }
}

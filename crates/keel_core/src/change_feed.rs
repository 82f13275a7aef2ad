//! Change feed for observing store activity.
//!
//! The store buffers record changes and array membership changes while it
//! works and publishes them here on `flush`, coalesced: one event per record
//! and one per array for each flush. The feed supports:
//! - push delivery to any number of subscribers
//! - polling a bounded history from a sequence cursor
//!
//! # Usage
//!
//! ```rust,ignore
//! let rx = store.subscribe();
//! store.push(RawRecordPayload::new("person", "1").attr("name", "Tom"))?;
//! store.flush();
//!
//! while let Ok(event) = rx.try_recv() {
//!     println!("{event:?}");
//! }
//! ```

use crate::array::ArrayNotification;
use crate::record::{RecordHandle, RecordState};
use crate::types::{ClientId, StoreId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};

/// One observable change to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// Created locally.
    Created,
    /// Data arrived from the collaborator.
    Loaded,
    /// An attribute's current value changed.
    AttributeChanged(String),
    /// A relationship's current membership changed.
    RelationshipChanged(String),
    /// The lifecycle state changed.
    StateChanged {
        /// State at the start of the batch.
        from: RecordState,
        /// State at the end of the batch.
        to: RecordState,
    },
    /// The record was given an id.
    IdAssigned(String),
    /// The record was deleted.
    Deleted,
    /// The record was unloaded from the store.
    Unloaded,
}

/// Changes to one record since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    /// The record.
    pub record: RecordHandle,
    /// Concrete type.
    pub type_name: String,
    /// Id at flush time.
    pub id: Option<String>,
    /// Changes, in the order first seen.
    pub changes: Vec<RecordChange>,
}

impl RecordEvent {
    /// Returns true if the batch contains the change.
    pub fn has(&self, change: &RecordChange) -> bool {
        self.changes.contains(change)
    }
}

/// What a store event is about.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEventKind {
    /// A record changed.
    Record(RecordEvent),
    /// An array's membership changed.
    Array(ArrayNotification),
}

/// A single event from the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Sequence number, increasing by one per event.
    pub sequence: u64,
    /// Payload.
    pub kind: StoreEventKind,
}

impl StoreEvent {
    /// The record event, if this is one.
    pub fn as_record(&self) -> Option<&RecordEvent> {
        match &self.kind {
            StoreEventKind::Record(event) => Some(event),
            StoreEventKind::Array(_) => None,
        }
    }

    /// The array notification, if this is one.
    pub fn as_array(&self) -> Option<&ArrayNotification> {
        match &self.kind {
            StoreEventKind::Array(notification) => Some(notification),
            StoreEventKind::Record(_) => None,
        }
    }
}

/// Record changes buffered between flushes, coalesced per record.
#[derive(Debug, Default)]
pub(crate) struct PendingRecordEvents {
    records: BTreeMap<ClientId, (String, Vec<RecordChange>)>,
}

impl PendingRecordEvents {
    pub fn note(&mut self, client_id: ClientId, type_name: &str, change: RecordChange) {
        let (_, changes) = self
            .records
            .entry(client_id)
            .or_insert_with(|| (type_name.to_string(), Vec::new()));

        if let RecordChange::StateChanged { to, .. } = &change {
            if let Some(RecordChange::StateChanged { to: last, .. }) = changes
                .iter_mut()
                .find(|c| matches!(c, RecordChange::StateChanged { .. }))
            {
                *last = *to;
                return;
            }
        }
        if !changes.contains(&change) {
            changes.push(change);
        }
    }

    /// Drains the buffer. `id_of` reports the id of a record at flush time.
    pub fn drain(
        &mut self,
        store: StoreId,
        mut id_of: impl FnMut(ClientId) -> Option<String>,
    ) -> Vec<RecordEvent> {
        std::mem::take(&mut self.records)
            .into_iter()
            .filter_map(|(client_id, (type_name, mut changes))| {
                changes.retain(|c| {
                    !matches!(c, RecordChange::StateChanged { from, to } if from == to)
                });
                if changes.is_empty() {
                    return None;
                }
                Some(RecordEvent {
                    record: RecordHandle::new(store, client_id),
                    type_name,
                    id: id_of(client_id),
                    changes,
                })
            })
            .collect()
    }
}

/// A change feed that distributes store events to subscribers.
///
/// The change feed:
/// - Emits events in flush order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
pub struct ChangeFeed {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
    /// History of recent events for polling.
    history: RwLock<Vec<StoreEvent>>,
    /// Maximum history size.
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to the change feed.
    ///
    /// Returns a receiver that will receive all future events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Assigns sequence numbers to a batch and delivers it.
    pub fn publish(&self, batch: Vec<StoreEventKind>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let events: Vec<StoreEvent> = {
            let mut history = self.history.write();
            let mut sequence = history.last().map_or(0, |e| e.sequence);
            let events: Vec<StoreEvent> = batch
                .into_iter()
                .map(|kind| {
                    sequence += 1;
                    StoreEvent { sequence, kind }
                })
                .collect();
            history.extend(events.iter().cloned());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
            events
        };

        // Send to subscribers (remove disconnected ones)
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
        events.len()
    }

    /// Polls events from a sequence cursor.
    ///
    /// Returns events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<StoreEvent> {
        let history = self.history.read();
        history
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest sequence number in history.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map_or(0, |e| e.sequence)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(10_000)
    }
}

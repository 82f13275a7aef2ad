//! Store facade.

mod commit;
mod fetch;
mod inner;
mod push;
mod records;
mod relationships;

pub(crate) use inner::StoreInner;

use crate::adapter::Adapter;
use crate::change_feed::{ChangeFeed, StoreEvent};
use crate::config::StoreConfig;
use crate::error::CoreResult;
use crate::schema::SchemaRegistry;
use crate::stats::{StatsSnapshot, StoreStats};
use crate::types::StoreId;
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::debug;

/// A client-side record store.
///
/// `Store` is the entry point for working with records. It provides:
/// - An identity map: one live record per `(type, id)`
/// - A relationship graph with automatic inverse maintenance
/// - Dirty tracking and a lifecycle state machine per record
/// - Commit coordination against an [`Adapter`]
/// - Live record arrays that follow record changes
///
/// # Example
///
/// ```rust,ignore
/// use keel_core::{Store, SchemaRegistry};
/// use std::sync::Arc;
///
/// let store = Store::new(Arc::new(schema), adapter);
///
/// let post = store.push(RawRecordPayload::new("post", "1").attr("title", "Hello"))?;
/// store.set(post, "title", "Hello again")?;
/// store.save(post).await?;
/// ```
///
/// Every operation locks the store's state for its synchronous part only.
/// Collaborator calls run without the lock held, so other callers keep
/// working while a fetch or save is outstanding.
///
/// Notifications are buffered and coalesced until [`Store::flush`] (or the
/// end of every mutating call, with `auto_flush`).
pub struct Store {
    /// Store id, carried by every handle it issues.
    id: StoreId,
    /// Configuration.
    config: StoreConfig,
    /// Model descriptors.
    schema: Arc<SchemaRegistry>,
    /// Persistence collaborator.
    adapter: Arc<dyn Adapter>,
    /// Records, edges, arrays and outstanding fetches.
    inner: Mutex<StoreInner>,
    /// Published notifications.
    feed: ChangeFeed,
    /// Counters.
    stats: StoreStats,
}

impl Store {
    /// Creates a store with default configuration.
    pub fn new(schema: Arc<SchemaRegistry>, adapter: Arc<dyn Adapter>) -> Self {
        Self::with_config(schema, adapter, StoreConfig::default())
    }

    /// Creates a store with custom configuration.
    pub fn with_config(
        schema: Arc<SchemaRegistry>,
        adapter: Arc<dyn Adapter>,
        config: StoreConfig,
    ) -> Self {
        let id = StoreId::new();
        debug!(store = %id, "opened store");
        Self {
            id,
            inner: Mutex::new(StoreInner::new(id, Arc::clone(&schema))),
            feed: ChangeFeed::with_max_history(config.max_event_history),
            stats: StoreStats::new(),
            config,
            schema,
            adapter,
        }
    }

    /// Store id.
    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the schema.
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Returns a snapshot of the store's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribes to flushed notifications.
    pub fn subscribe(&self) -> mpsc::Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    /// Returns flushed notifications after `cursor`, oldest first.
    pub fn poll_events(&self, cursor: u64, limit: usize) -> Vec<StoreEvent> {
        self.feed.poll(cursor, limit)
    }

    /// Sequence number of the latest flushed notification.
    pub fn latest_sequence(&self) -> u64 {
        self.feed.latest_sequence()
    }

    /// Publishes every buffered notification. Returns how many were
    /// published.
    pub fn flush(&self) -> usize {
        let batch = self.inner.lock().take_events();
        if batch.is_empty() {
            return 0;
        }
        let published = self.feed.publish(batch);
        self.stats.record_published(published);
        published
    }

    /// Number of records held by the identity map.
    pub fn record_count(&self) -> usize {
        self.inner.lock().identity.len()
    }

    /// Number of record arrays that have not been destroyed.
    pub fn array_count(&self) -> usize {
        self.inner.lock().arrays.len()
    }

    /// Runs the synchronous part of an operation under the lock, then
    /// settles its consequences.
    fn mutate<T>(&self, op: impl FnOnce(&mut StoreInner) -> CoreResult<T>) -> CoreResult<T> {
        let result = {
            let mut inner = self.inner.lock();
            let result = op(&mut inner);
            inner.finish_operation();
            result
        };
        self.after_operation();
        result
    }

    fn after_operation(&self) {
        if self.config.auto_flush {
            self.flush();
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("records", &self.record_count())
            .field("latest_sequence", &self.latest_sequence())
            .finish_non_exhaustive()
    }
}

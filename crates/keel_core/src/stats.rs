//! Store statistics.
//!
//! Counters for monitoring how much work a store does and how often it talks
//! to its collaborator.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = store.stats();
//! println!("find calls: {}", stats.find_calls);
//! println!("deduplicated fetches: {}", stats.fetches_deduplicated);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    // Record counters
    records_created: AtomicU64,
    records_pushed: AtomicU64,
    records_unloaded: AtomicU64,

    // Collaborator calls
    find_calls: AtomicU64,
    related_calls: AtomicU64,
    query_calls: AtomicU64,
    create_calls: AtomicU64,
    update_calls: AtomicU64,
    delete_calls: AtomicU64,
    fetches_deduplicated: AtomicU64,

    // Commit outcomes
    saves_succeeded: AtomicU64,
    saves_invalid: AtomicU64,
    saves_failed: AtomicU64,

    // Notifications
    events_published: AtomicU64,
}

/// What kind of collaborator call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdapterCall {
    Find,
    Related,
    Query,
    Create,
    Update,
    Delete,
}

/// Outcome of one record's save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveResult {
    Saved,
    Invalid,
    Failed,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self) {
        self.records_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pushed(&self) {
        self.records_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unloaded(&self) {
        self.records_unloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_call(&self, call: AdapterCall, count: u64) {
        let counter = match call {
            AdapterCall::Find => &self.find_calls,
            AdapterCall::Related => &self.related_calls,
            AdapterCall::Query => &self.query_calls,
            AdapterCall::Create => &self.create_calls,
            AdapterCall::Update => &self.update_calls,
            AdapterCall::Delete => &self.delete_calls,
        };
        counter.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_dedupe(&self) {
        self.fetches_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save(&self, result: SaveResult) {
        let counter = match result {
            SaveResult::Saved => &self.saves_succeeded,
            SaveResult::Invalid => &self.saves_invalid,
            SaveResult::Failed => &self.saves_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self, count: usize) {
        self.events_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot of all statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_created: self.records_created.load(Ordering::Relaxed),
            records_pushed: self.records_pushed.load(Ordering::Relaxed),
            records_unloaded: self.records_unloaded.load(Ordering::Relaxed),
            find_calls: self.find_calls.load(Ordering::Relaxed),
            related_calls: self.related_calls.load(Ordering::Relaxed),
            query_calls: self.query_calls.load(Ordering::Relaxed),
            create_calls: self.create_calls.load(Ordering::Relaxed),
            update_calls: self.update_calls.load(Ordering::Relaxed),
            delete_calls: self.delete_calls.load(Ordering::Relaxed),
            fetches_deduplicated: self.fetches_deduplicated.load(Ordering::Relaxed),
            saves_succeeded: self.saves_succeeded.load(Ordering::Relaxed),
            saves_invalid: self.saves_invalid.load(Ordering::Relaxed),
            saves_failed: self.saves_failed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records created locally.
    pub records_created: u64,
    /// Payloads pushed into the store, embedded ones included.
    pub records_pushed: u64,
    /// Records unloaded.
    pub records_unloaded: u64,
    /// `find_one` / `find_many` calls.
    pub find_calls: u64,
    /// `find_related` calls.
    pub related_calls: u64,
    /// `query` calls.
    pub query_calls: u64,
    /// Records sent for creation.
    pub create_calls: u64,
    /// Records sent for update.
    pub update_calls: u64,
    /// Records sent for deletion.
    pub delete_calls: u64,
    /// Requests that joined an outstanding fetch instead of starting one.
    pub fetches_deduplicated: u64,
    /// Saves acknowledged.
    pub saves_succeeded: u64,
    /// Saves rejected with field errors.
    pub saves_invalid: u64,
    /// Saves that failed otherwise.
    pub saves_failed: u64,
    /// Events published to the change feed.
    pub events_published: u64,
}

impl StatsSnapshot {
    /// Total collaborator calls.
    pub fn adapter_calls(&self) -> u64 {
        self.find_calls
            + self.related_calls
            + self.query_calls
            + self.create_calls
            + self.update_calls
            + self.delete_calls
    }
}

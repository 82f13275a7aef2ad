//! Outstanding fetches and the values handed out while they run.
//!
//! Every fetch is keyed; asking for a key that is already queued or in
//! flight joins the existing fetch instead of starting another one. Joiners
//! wait on a `tokio::sync::watch` channel that the fetch publishes its final
//! status to.

use crate::error::{CoreError, CoreResult};
use crate::record::RecordHandle;
use crate::types::ClientId;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// What a fetch loads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchKey {
    /// One record by identity.
    Record {
        /// Record type.
        type_name: String,
        /// Record id.
        id: String,
    },
    /// The members of one async relationship of one record.
    Relationship {
        /// Owning record.
        owner: ClientId,
        /// Relationship name.
        name: String,
    },
}

/// Status published by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Not finished yet.
    Pending,
    /// Finished and applied.
    Done,
    /// Finished with an error.
    Failed(String),
}

/// A fetch that may not have finished yet.
///
/// Pass it to `Store::resolve` to drive it (or join it, if another caller is
/// already driving it) and wait for the outcome.
#[derive(Debug, Clone)]
pub struct PendingFetch {
    key: FetchKey,
    rx: watch::Receiver<FetchStatus>,
}

impl PendingFetch {
    /// The key of the fetch.
    pub fn key(&self) -> &FetchKey {
        &self.key
    }

    /// Latest published status, without waiting.
    pub fn status(&self) -> FetchStatus {
        self.rx.borrow().clone()
    }

    /// Waits until the fetch publishes a final status.
    pub(crate) async fn wait(mut self) -> CoreResult<()> {
        loop {
            let status = self.rx.borrow_and_update().clone();
            match status {
                FetchStatus::Done => return Ok(()),
                FetchStatus::Failed(message) => return Err(CoreError::fetch_failed(message)),
                FetchStatus::Pending => {}
            }
            if self.rx.changed().await.is_err() {
                return match self.rx.borrow().clone() {
                    FetchStatus::Done => Ok(()),
                    FetchStatus::Failed(message) => Err(CoreError::fetch_failed(message)),
                    FetchStatus::Pending => Err(CoreError::fetch_failed("fetch was abandoned")),
                };
            }
        }
    }
}

/// A relationship value that may still be loading.
///
/// `NotYetLoaded` carries the pending fetch for callers that want to wait,
/// while [`Materialized::as_slice`] and [`Materialized::loaded`] give an
/// empty synchronous view for callers that treat the value as present.
#[derive(Debug, Clone)]
pub enum Materialized<T> {
    /// The value is available.
    Loaded(T),
    /// A fetch is needed; the value reads as empty until it completes.
    NotYetLoaded(PendingFetch),
}

/// Members of a to-many relationship.
pub type HasMany = Materialized<Vec<RecordHandle>>;

/// Target of a to-one relationship.
pub type BelongsTo = Materialized<Option<RecordHandle>>;

impl<T> Materialized<T> {
    /// Returns true if the value is available.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Materialized::Loaded(_))
    }

    /// Returns the value, if available.
    pub fn loaded(&self) -> Option<&T> {
        match self {
            Materialized::Loaded(value) => Some(value),
            Materialized::NotYetLoaded(_) => None,
        }
    }

    /// Returns the outstanding fetch, if any.
    pub fn pending(&self) -> Option<&PendingFetch> {
        match self {
            Materialized::Loaded(_) => None,
            Materialized::NotYetLoaded(pending) => Some(pending),
        }
    }

    /// Converts into the value, if available.
    pub fn into_loaded(self) -> Option<T> {
        match self {
            Materialized::Loaded(value) => Some(value),
            Materialized::NotYetLoaded(_) => None,
        }
    }
}

impl HasMany {
    /// Members, or an empty slice while loading.
    pub fn as_slice(&self) -> &[RecordHandle] {
        match self {
            Materialized::Loaded(members) => members,
            Materialized::NotYetLoaded(_) => &[],
        }
    }

    /// Number of members, zero while loading.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True when there are no members or the relationship is still loading.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl BelongsTo {
    /// Target, or `None` while loading.
    pub fn target(&self) -> Option<RecordHandle> {
        match self {
            Materialized::Loaded(target) => *target,
            Materialized::NotYetLoaded(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPhase {
    Queued,
    InFlight,
}

#[derive(Debug)]
struct FetchEntry {
    phase: FetchPhase,
    tx: watch::Sender<FetchStatus>,
}

/// Outcome of [`FetchRegistry::start`].
#[derive(Debug)]
pub(crate) enum Start {
    /// The caller now owns the fetch and must call `finish`.
    Drive,
    /// Someone else is running it; wait on the receiver.
    Join(PendingFetch),
    /// The fetch already finished.
    Finished,
}

/// Queued and in-flight fetches of one store.
#[derive(Debug, Default)]
pub(crate) struct FetchRegistry {
    entries: BTreeMap<FetchKey, FetchEntry>,
}

impl FetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle on the fetch for `key`, queueing it if nothing is
    /// outstanding. The second value is true if the fetch already existed.
    pub fn request(&mut self, key: FetchKey) -> (PendingFetch, bool) {
        if let Some(entry) = self.entries.get(&key) {
            let rx = entry.tx.subscribe();
            return (PendingFetch { key, rx }, true);
        }

        let (tx, rx) = watch::channel(FetchStatus::Pending);
        self.entries.insert(
            key.clone(),
            FetchEntry {
                phase: FetchPhase::Queued,
                tx,
            },
        );
        (PendingFetch { key, rx }, false)
    }

    /// Claims a queued fetch for the caller to run.
    pub fn start(&mut self, key: &FetchKey) -> Start {
        match self.entries.get_mut(key) {
            None => Start::Finished,
            Some(entry) if entry.phase == FetchPhase::InFlight => Start::Join(PendingFetch {
                key: key.clone(),
                rx: entry.tx.subscribe(),
            }),
            Some(entry) => {
                entry.phase = FetchPhase::InFlight;
                Start::Drive
            }
        }
    }

    /// Publishes the final status and forgets the fetch.
    pub fn finish(&mut self, key: &FetchKey, status: FetchStatus) {
        if let Some(entry) = self.entries.remove(key) {
            entry.tx.send_replace(status);
        }
    }

    /// Keys of fetches nobody has started yet.
    pub fn queued(&self) -> Vec<FetchKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.phase == FetchPhase::Queued)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Fails every fetch that belongs to `owner`.
    pub fn abandon_owner(&mut self, owner: ClientId) {
        let keys: Vec<FetchKey> = self
            .entries
            .keys()
            .filter(|key| matches!(key, FetchKey::Relationship { owner: o, .. } if *o == owner))
            .cloned()
            .collect();
        for key in keys {
            self.finish(&key, FetchStatus::Failed(format!("{owner} was unloaded")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FetchKey {
        FetchKey::Relationship {
            owner: ClientId(1),
            name: "comments".into(),
        }
    }

    #[test]
    fn second_request_joins_first() {
        let mut registry = FetchRegistry::new();
        let (_first, existed) = registry.request(key());
        assert!(!existed);
        let (_second, existed) = registry.request(key());
        assert!(existed);
        assert_eq!(registry.queued(), vec![key()]);
    }

    #[test]
    fn start_claims_once() {
        let mut registry = FetchRegistry::new();
        registry.request(key());
        assert!(matches!(registry.start(&key()), Start::Drive));
        assert!(matches!(registry.start(&key()), Start::Join(_)));
        assert!(registry.queued().is_empty());

        registry.finish(&key(), FetchStatus::Done);
        assert!(matches!(registry.start(&key()), Start::Finished));
    }

    #[tokio::test]
    async fn joiners_observe_final_status() {
        let mut registry = FetchRegistry::new();
        let (pending, _) = registry.request(key());
        registry.start(&key());
        registry.finish(&key(), FetchStatus::Failed("boom".into()));

        assert_eq!(pending.status(), FetchStatus::Failed("boom".into()));
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn abandon_owner_fails_its_fetches() {
        let mut registry = FetchRegistry::new();
        let (pending, _) = registry.request(key());
        registry.abandon_owner(ClientId(1));

        assert!(registry.queued().is_empty());
        assert!(pending.wait().await.is_err());
    }

    #[test]
    fn materialized_views() {
        let mut registry = FetchRegistry::new();
        let (pending, _) = registry.request(key());
        let members: HasMany = Materialized::NotYetLoaded(pending);
        assert!(!members.is_loaded());
        assert!(members.is_empty());
        assert!(members.pending().is_some());

        let target: BelongsTo = Materialized::Loaded(None);
        assert!(target.is_loaded());
        assert_eq!(target.target(), None);
    }
}

//! Commit coordination.
//!
//! A commit partitions dirty records into creates, updates and deletes,
//! orders creates parent-first (and deletes child-first) along belongsTo
//! edges, groups each level by type and hands it to the collaborator.
//! Outcomes are applied one record at a time.

mod set;
mod transaction;

pub use set::CommitSet;
pub use transaction::Transaction;

pub(crate) use set::levels;
pub(crate) use transaction::RecordCheckpoint;

use crate::adapter::AdapterError;
use crate::record::{FieldErrors, RecordHandle};

/// Which records a commit covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitScope {
    /// Every record that is created, updated or deleted locally.
    AllDirty,
    /// These records only.
    Records(Vec<RecordHandle>),
}

/// Outcome of one record in a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Acknowledged by the collaborator.
    Saved,
    /// Rejected with field errors; the record is now invalid.
    Invalid(FieldErrors),
    /// Failed otherwise; the record is now in the error state.
    Failed(AdapterError),
    /// The record was unloaded before its outcome arrived.
    Skipped,
    /// The record had nothing to save.
    Unchanged,
}

impl CommitOutcome {
    /// True for outcomes that leave the record persisted.
    pub fn is_success(&self) -> bool {
        matches!(self, CommitOutcome::Saved | CommitOutcome::Unchanged)
    }
}

/// Per-record outcomes of a commit, in the order they were applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Outcomes.
    pub outcomes: Vec<(RecordHandle, CommitOutcome)>,
}

impl CommitReport {
    pub(crate) fn push(&mut self, record: RecordHandle, outcome: CommitOutcome) {
        self.outcomes.push((record, outcome));
    }

    /// Outcome of one record.
    pub fn outcome(&self, record: RecordHandle) -> Option<&CommitOutcome> {
        self.outcomes
            .iter()
            .find(|(r, _)| *r == record)
            .map(|(_, outcome)| outcome)
    }

    /// True if every record was saved or had nothing to save.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_success())
    }

    /// Number of saved records.
    pub fn saved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CommitOutcome::Saved))
            .count()
    }

    /// Number of records that failed or were rejected.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CommitOutcome::Invalid(_) | CommitOutcome::Failed(_)))
            .count()
    }
}

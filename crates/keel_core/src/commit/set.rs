//! Partitioning and ordering of records for a commit.

use crate::record::{RecordState, SaveKind};
use crate::types::ClientId;
use std::collections::BTreeSet;
use tracing::warn;

/// Records of one commit, partitioned by the kind of save they need.
///
/// A record appears in exactly one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSet {
    /// Records to create.
    pub created: Vec<ClientId>,
    /// Records to update.
    pub updated: Vec<ClientId>,
    /// Records to delete.
    pub deleted: Vec<ClientId>,
}

impl CommitSet {
    /// Partitions committable records by state. Records in any other state
    /// are left out.
    pub(crate) fn partition(records: impl IntoIterator<Item = (ClientId, RecordState)>) -> Self {
        let mut set = CommitSet::default();
        for (client_id, state) in records {
            match state {
                RecordState::Created => set.created.push(client_id),
                RecordState::Updated => set.updated.push(client_id),
                RecordState::DeletedDirty => set.deleted.push(client_id),
                _ => {}
            }
        }
        set
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// True if nothing needs saving.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partition a record belongs to.
    pub fn kind_of(&self, client_id: ClientId) -> Option<SaveKind> {
        if self.created.contains(&client_id) {
            Some(SaveKind::Create)
        } else if self.updated.contains(&client_id) {
            Some(SaveKind::Update)
        } else if self.deleted.contains(&client_id) {
            Some(SaveKind::Delete)
        } else {
            None
        }
    }

    /// Every record, creates first, then updates, then deletes.
    pub fn iter(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.created
            .iter()
            .chain(self.updated.iter())
            .chain(self.deleted.iter())
            .copied()
    }
}

/// Orders records so every record comes after the records it depends on.
///
/// Returns levels: records within a level do not depend on each other and
/// may be sent together. Only dependencies inside `records` count. Records
/// caught in a cycle are put in a final level.
pub(crate) fn levels(
    records: &[ClientId],
    mut depends_on: impl FnMut(ClientId) -> Vec<ClientId>,
) -> Vec<Vec<ClientId>> {
    let members: BTreeSet<ClientId> = records.iter().copied().collect();
    let dependencies: Vec<(ClientId, BTreeSet<ClientId>)> = records
        .iter()
        .map(|record| {
            let deps = depends_on(*record)
                .into_iter()
                .filter(|d| d != record && members.contains(d))
                .collect();
            (*record, deps)
        })
        .collect();

    let mut placed: BTreeSet<ClientId> = BTreeSet::new();
    let mut remaining = dependencies;
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|(_, deps)| deps.iter().all(|d| placed.contains(d)));

        if ready.is_empty() {
            warn!(
                records = blocked.len(),
                "dependency cycle between records in one commit; sending them together"
            );
            levels.push(blocked.into_iter().map(|(record, _)| record).collect());
            break;
        }

        let level: Vec<ClientId> = ready.into_iter().map(|(record, _)| record).collect();
        placed.extend(level.iter().copied());
        levels.push(level);
        remaining = blocked;
    }
    levels
}

//! Record lifecycle state machine.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Kind of save a record is undergoing, or last underwent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveKind {
    /// The record has never been persisted.
    Create,
    /// The record exists remotely and has local changes.
    Update,
    /// The record is being removed.
    Delete,
}

/// Lifecycle state of a record.
///
/// ```text
/// empty -> loading -> saved <-> updated
/// created | updated -> in_flight -> saved | invalid | error
/// saved | updated -> deleted.dirty -> in_flight(delete) -> deleted.saved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Known only by identity; no data yet.
    Empty,
    /// A fetch for the record is outstanding.
    Loading,
    /// Loaded and identical to the persisted data.
    Saved,
    /// Loaded with local changes.
    Updated,
    /// Created locally and never persisted.
    Created,
    /// A save request is outstanding.
    InFlight(SaveKind),
    /// The collaborator rejected the last save with field errors.
    Invalid(SaveKind),
    /// The last save failed for a reason other than validation.
    Error(SaveKind),
    /// Deleted locally, not yet committed.
    DeletedDirty,
    /// Deletion acknowledged, or a new record was discarded. Terminal.
    DeletedSaved,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// A fetch was issued.
    FetchStarted,
    /// A fetch failed or returned nothing.
    FetchFailed,
    /// Data arrived from the collaborator.
    Loaded,
    /// Local state now differs from the persisted baseline.
    BecameDirty,
    /// Local state equals the persisted baseline again.
    BecameClean,
    /// The last field error was cleared by an edit.
    BecameValid,
    /// The record was handed to the collaborator.
    WillCommit,
    /// The collaborator acknowledged the save.
    DidCommit,
    /// The collaborator rejected the save with field errors.
    BecameInvalid,
    /// The collaborator failed the save.
    BecameError,
    /// The record was deleted locally.
    Delete,
    /// Local changes were discarded.
    Rollback,
}

impl RecordState {
    /// Applies an event, returning the next state.
    ///
    /// Events that are meaningless in the current state fail with
    /// `InvalidState` and leave the state unchanged.
    pub fn transition(self, event: StateEvent) -> CoreResult<RecordState> {
        use RecordState as S;
        use SaveKind as K;
        use StateEvent as E;

        let next = match (self, event) {
            (S::Empty, E::FetchStarted) => S::Loading,
            (S::Saved, E::FetchStarted) => S::Saved,
            (S::Loading, E::FetchFailed) => S::Empty,
            (S::Empty | S::Loading | S::Saved, E::Loaded) => S::Saved,

            (S::Saved | S::Updated, E::BecameDirty) => S::Updated,
            (S::Saved | S::Updated, E::BecameClean) => S::Saved,
            (S::Created, E::BecameDirty | E::BecameClean) => S::Created,

            (S::Invalid(K::Create), E::BecameValid) | (S::Error(K::Create), E::BecameDirty) => {
                S::Created
            }
            (S::Invalid(K::Update), E::BecameValid) | (S::Error(K::Update), E::BecameDirty) => {
                S::Updated
            }
            // Failed records stay failed until edited (error) or corrected (invalid).
            (S::Invalid(_) | S::Error(_), E::BecameClean) | (S::Invalid(_), E::BecameDirty) => {
                self
            }

            (S::Created, E::WillCommit) => S::InFlight(K::Create),
            (S::Updated, E::WillCommit) => S::InFlight(K::Update),
            (S::DeletedDirty, E::WillCommit) => S::InFlight(K::Delete),

            (S::InFlight(K::Create | K::Update), E::DidCommit) => S::Saved,
            (S::InFlight(K::Delete), E::DidCommit) => S::DeletedSaved,
            (S::InFlight(kind), E::BecameInvalid) => S::Invalid(kind),
            (S::InFlight(kind), E::BecameError) => S::Error(kind),

            (S::Saved | S::Updated | S::Invalid(K::Update) | S::Error(K::Update), E::Delete) => {
                S::DeletedDirty
            }
            (S::Created | S::Invalid(K::Create) | S::Error(K::Create), E::Delete) => {
                S::DeletedSaved
            }

            (S::Saved, E::Rollback) => S::Saved,
            (
                S::Updated
                | S::DeletedDirty
                | S::Invalid(K::Update | K::Delete)
                | S::Error(K::Update | K::Delete),
                E::Rollback,
            ) => S::Saved,
            (S::Created | S::Invalid(K::Create) | S::Error(K::Create), E::Rollback) => {
                S::DeletedSaved
            }

            (state, event) => {
                return Err(CoreError::invalid_state(
                    state.path(),
                    format!("apply {event:?} to"),
                ))
            }
        };

        Ok(next)
    }

    /// Returns the nested state path, e.g. `root.loaded.updated.uncommitted`.
    #[must_use]
    pub const fn path(self) -> &'static str {
        use RecordState as S;
        use SaveKind as K;

        match self {
            S::Empty => "root.empty",
            S::Loading => "root.loading",
            S::Saved => "root.loaded.saved",
            S::Updated => "root.loaded.updated.uncommitted",
            S::Created => "root.loaded.created.uncommitted",
            S::InFlight(K::Create) => "root.loaded.created.inFlight",
            S::InFlight(K::Update) => "root.loaded.updated.inFlight",
            S::InFlight(K::Delete) => "root.deleted.inFlight",
            S::Invalid(K::Create) => "root.loaded.created.invalid",
            S::Invalid(K::Update) => "root.loaded.updated.invalid",
            S::Invalid(K::Delete) => "root.deleted.invalid",
            S::Error(K::Create) => "root.loaded.created.error",
            S::Error(K::Update) => "root.loaded.updated.error",
            S::Error(K::Delete) => "root.deleted.error",
            S::DeletedDirty => "root.deleted.uncommitted",
            S::DeletedSaved => "root.deleted.saved",
        }
    }

    /// No data has been loaded yet.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, RecordState::Empty)
    }

    /// A fetch is outstanding.
    #[must_use]
    pub const fn is_loading(self) -> bool {
        matches!(self, RecordState::Loading)
    }

    /// The record has data (loaded or created locally).
    #[must_use]
    pub const fn is_loaded(self) -> bool {
        !matches!(self, RecordState::Empty | RecordState::Loading)
    }

    /// The record has local state not yet confirmed persisted.
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        matches!(
            self,
            RecordState::Updated
                | RecordState::Created
                | RecordState::InFlight(_)
                | RecordState::Invalid(_)
                | RecordState::Error(_)
                | RecordState::DeletedDirty
        )
    }

    /// The record has never been persisted.
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(
            self,
            RecordState::Created
                | RecordState::InFlight(SaveKind::Create)
                | RecordState::Invalid(SaveKind::Create)
                | RecordState::Error(SaveKind::Create)
        )
    }

    /// A save request is outstanding.
    #[must_use]
    pub const fn is_saving(self) -> bool {
        matches!(self, RecordState::InFlight(_))
    }

    /// The record is deleted, locally or remotely.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        matches!(
            self,
            RecordState::DeletedDirty
                | RecordState::DeletedSaved
                | RecordState::InFlight(SaveKind::Delete)
                | RecordState::Invalid(SaveKind::Delete)
                | RecordState::Error(SaveKind::Delete)
        )
    }

    /// The record has no outstanding field errors.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, RecordState::Invalid(_))
    }

    /// The last save failed with a non-validation error.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, RecordState::Error(_))
    }

    /// Attributes and relationships may be edited.
    #[must_use]
    pub const fn accepts_edits(self) -> bool {
        matches!(
            self,
            RecordState::Saved
                | RecordState::Updated
                | RecordState::Created
                | RecordState::Invalid(SaveKind::Create | SaveKind::Update)
                | RecordState::Error(SaveKind::Create | SaveKind::Update)
        )
    }

    /// The record can be handed to the collaborator as-is.
    #[must_use]
    pub const fn is_committable(self) -> bool {
        matches!(
            self,
            RecordState::Created | RecordState::Updated | RecordState::DeletedDirty
        )
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(start: RecordState, events: &[StateEvent]) -> CoreResult<RecordState> {
        events
            .iter()
            .try_fold(start, |state, event| state.transition(*event))
    }

    #[test]
    fn load_then_edit_then_save() {
        let state = run(
            RecordState::Empty,
            &[
                StateEvent::FetchStarted,
                StateEvent::Loaded,
                StateEvent::BecameDirty,
            ],
        )
        .unwrap();
        assert_eq!(state, RecordState::Updated);
        assert!(state.is_dirty());

        let state = state.transition(StateEvent::WillCommit).unwrap();
        assert!(state.is_saving());
        assert!(!state.accepts_edits());

        let state = state.transition(StateEvent::DidCommit).unwrap();
        assert_eq!(state, RecordState::Saved);
        assert!(!state.is_dirty());
    }

    #[test]
    fn created_record_is_new_and_dirty() {
        let state = RecordState::Created;
        assert!(state.is_new());
        assert!(state.is_dirty());
        assert!(state.is_committable());
        assert_eq!(state.path(), "root.loaded.created.uncommitted");
    }

    #[test]
    fn invalid_then_valid_edit_returns_to_dirty() {
        let state = run(
            RecordState::Created,
            &[StateEvent::WillCommit, StateEvent::BecameInvalid],
        )
        .unwrap();
        assert_eq!(state, RecordState::Invalid(SaveKind::Create));
        assert!(!state.is_valid());
        assert!(!state.is_committable());

        assert_eq!(
            state.transition(StateEvent::BecameDirty).unwrap(),
            RecordState::Invalid(SaveKind::Create)
        );
        assert_eq!(
            state.transition(StateEvent::BecameValid).unwrap(),
            RecordState::Created
        );
    }

    #[test]
    fn error_then_edit_returns_to_dirty() {
        let state = run(
            RecordState::Updated,
            &[StateEvent::WillCommit, StateEvent::BecameError],
        )
        .unwrap();
        assert!(state.is_error());
        assert_eq!(
            state.transition(StateEvent::BecameDirty).unwrap(),
            RecordState::Updated
        );
        assert_eq!(
            state.transition(StateEvent::BecameClean).unwrap(),
            state
        );
    }

    #[test]
    fn delete_paths() {
        let state = run(
            RecordState::Saved,
            &[StateEvent::Delete, StateEvent::WillCommit, StateEvent::DidCommit],
        )
        .unwrap();
        assert_eq!(state, RecordState::DeletedSaved);
        assert!(state.is_deleted());
        assert!(!state.is_dirty());

        assert_eq!(
            RecordState::Created.transition(StateEvent::Delete).unwrap(),
            RecordState::DeletedSaved
        );
    }

    #[test]
    fn rollback_targets_baseline() {
        assert_eq!(
            RecordState::Updated.transition(StateEvent::Rollback).unwrap(),
            RecordState::Saved
        );
        assert_eq!(
            RecordState::DeletedDirty
                .transition(StateEvent::Rollback)
                .unwrap(),
            RecordState::Saved
        );
        assert_eq!(
            RecordState::Created.transition(StateEvent::Rollback).unwrap(),
            RecordState::DeletedSaved
        );
        assert!(RecordState::InFlight(SaveKind::Update)
            .transition(StateEvent::Rollback)
            .is_err());
    }

    #[test]
    fn in_flight_rejects_edits_and_delete() {
        let state = RecordState::InFlight(SaveKind::Update);
        assert!(state.transition(StateEvent::Delete).is_err());
        assert!(state.transition(StateEvent::WillCommit).is_err());
    }

    #[test]
    fn failed_fetch_returns_to_empty() {
        let state = run(
            RecordState::Empty,
            &[StateEvent::FetchStarted, StateEvent::FetchFailed],
        )
        .unwrap();
        assert!(state.is_empty());
    }
}

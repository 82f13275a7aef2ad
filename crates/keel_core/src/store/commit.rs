//! Saving records through the collaborator.

use super::{Store, StoreInner};
use crate::adapter::{AdapterError, AdapterResult};
use crate::change_feed::RecordChange;
use crate::commit::{
    levels, CommitOutcome, CommitReport, CommitScope, CommitSet, RecordCheckpoint, Transaction,
};
use crate::error::{CoreError, CoreResult};
use crate::graph::{Layer, LinkContext, Members};
use crate::payload::{RawRecordPayload, RecordSnapshot};
use crate::record::{RecordHandle, RecordState, SaveKind, StateEvent};
use crate::stats::{AdapterCall, SaveResult, StoreStats};
use crate::types::{ClientId, TransactionId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

impl StoreInner {
    /// Resolves a commit scope. Records with nothing to save are returned
    /// separately.
    fn collect_commit(&self, scope: &CommitScope) -> CoreResult<(CommitSet, Vec<ClientId>)> {
        let handles = match scope {
            CommitScope::AllDirty => {
                let set = CommitSet::partition(self.identity.iter().map(|(c, r)| (c, r.state)));
                return Ok((set, Vec::new()));
            }
            CommitScope::Records(handles) => handles,
        };

        let mut seen = BTreeSet::new();
        let mut committable = Vec::new();
        let mut unchanged = Vec::new();
        for handle in handles {
            let client_id = self.live(*handle)?;
            if !seen.insert(client_id) {
                continue;
            }
            let state = self.record(client_id)?.state;
            match state {
                s if s.is_committable() => committable.push((client_id, s)),
                RecordState::Saved | RecordState::DeletedSaved => unchanged.push(client_id),
                s => return Err(CoreError::invalid_state(s.path(), "save")),
            }
        }
        Ok((CommitSet::partition(committable), unchanged))
    }

    fn begin_save(&mut self, client_id: ClientId) -> CoreResult<()> {
        let record = self.record_mut(client_id)?;
        record.attributes.will_commit();
        record.errors.clear();
        record.adapter_error = None;
        self.transition(client_id, StateEvent::WillCommit)
    }

    /// A belongsTo target of a record that has not been persisted yet.
    fn unsaved_parent(&self, client_id: ClientId) -> Option<ClientId> {
        self.parents_of(client_id, Layer::Current)
            .into_iter()
            .find(|parent| self.identity.get(*parent).is_some_and(|r| r.id.is_none()))
    }

    fn commit_succeeded(
        &mut self,
        kind: SaveKind,
        client_id: ClientId,
        payload: Option<RawRecordPayload>,
        stats: &StoreStats,
    ) -> CoreResult<()> {
        if kind == SaveKind::Delete {
            self.transition(client_id, StateEvent::DidCommit)?;
            self.graph.remove_record(client_id);
            self.identity.release_key(client_id);
            self.arrays.remove_record(client_id);
            return Ok(());
        }

        let record = self.record(client_id)?;
        let had_id = record.id.is_some();
        if let Some(payload) = &payload {
            if payload.type_name != record.type_name {
                return Err(CoreError::invalid_operation(format!(
                    "collaborator answered a {} save with a {} payload",
                    record.type_name, payload.type_name
                )));
            }
            self.validate_payload(payload)?;
        }
        match (&payload, had_id) {
            (_, true) => {}
            (Some(payload), false) => self.identity.assign_id(client_id, &payload.id)?,
            (None, false) => {
                return Err(CoreError::invalid_operation(
                    "collaborator did not assign an id to a created record",
                ))
            }
        }

        let record = self.record_mut(client_id)?;
        record
            .attributes
            .commit_success(payload.as_ref().map(|p| p.attributes.clone()));
        let id = record.id.clone();
        self.transition(client_id, StateEvent::DidCommit)?;
        if let (false, Some(id)) = (had_id, id) {
            self.note(client_id, RecordChange::IdAssigned(id));
        }

        self.promote_edges(client_id)?;
        if let Some(payload) = payload {
            let model = self.model_of(client_id)?;
            for (name, data) in &payload.relationships {
                if let Some(descriptor) = model.relationship_named(name) {
                    self.apply_relationship_data(client_id, descriptor, data, stats)?;
                }
            }
        }
        Ok(())
    }

    fn commit_failed(
        &mut self,
        client_id: ClientId,
        error: AdapterError,
        stats: &StoreStats,
    ) -> CoreResult<CommitOutcome> {
        let record = self.record_mut(client_id)?;
        record.attributes.commit_failed();
        record.adapter_error = Some(error.clone());
        match error {
            AdapterError::ValidationFailed(errors) => {
                record.errors = errors.clone();
                self.transition(client_id, StateEvent::BecameInvalid)?;
                stats.record_save(SaveResult::Invalid);
                Ok(CommitOutcome::Invalid(errors))
            }
            fatal @ AdapterError::Fatal(_) => {
                self.transition(client_id, StateEvent::BecameError)?;
                stats.record_save(SaveResult::Failed);
                Ok(CommitOutcome::Failed(fatal))
            }
        }
    }

    /// Applies one record's outcome. Only that record (and its edges)
    /// changes.
    fn apply_outcome(
        &mut self,
        kind: SaveKind,
        client_id: ClientId,
        result: AdapterResult<Option<RawRecordPayload>>,
        stats: &StoreStats,
    ) -> CommitOutcome {
        let Some(record) = self.identity.get(client_id) else {
            debug!(%client_id, "dropping commit outcome for an unloaded record");
            return CommitOutcome::Skipped;
        };
        if !record.state.is_saving() {
            warn!(
                %client_id,
                state = record.state.path(),
                "dropping commit outcome for a record that is not being saved"
            );
            return CommitOutcome::Skipped;
        }

        let error = match result {
            Ok(payload) => match self.commit_succeeded(kind, client_id, payload, stats) {
                Ok(()) => {
                    debug!(%client_id, ?kind, "saved");
                    stats.record_save(SaveResult::Saved);
                    return CommitOutcome::Saved;
                }
                Err(err) => AdapterError::fatal(err.to_string()),
            },
            Err(err) => err,
        };

        debug!(%client_id, ?kind, %error, "save failed");
        match self.commit_failed(client_id, error.clone(), stats) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%client_id, %err, "could not record a failed save");
                CommitOutcome::Failed(error)
            }
        }
    }

    fn checkpoint(&self, client_id: ClientId) -> CoreResult<RecordCheckpoint> {
        let record = self.record(client_id)?;
        Ok(RecordCheckpoint {
            state: record.state,
            modified: record.attributes.modified().clone(),
            edges: self.graph.current_of(client_id),
        })
    }

    /// Drops members that are no longer in the store.
    fn live_members(&self, members: &Members) -> Members {
        match members {
            Members::One(target) => {
                Members::One(target.filter(|t| self.identity.contains(*t)))
            }
            Members::Many(targets) => Members::Many(
                targets
                    .iter()
                    .copied()
                    .filter(|t| self.identity.contains(*t))
                    .collect(),
            ),
        }
    }

    fn restore_checkpoints(
        &mut self,
        checkpoints: &BTreeMap<ClientId, RecordCheckpoint>,
    ) -> CoreResult<()> {
        for client_id in checkpoints.keys() {
            if let Some(record) = self.identity.get(*client_id) {
                if record.state.is_saving() {
                    return Err(CoreError::invalid_state(record.state.path(), "roll back"));
                }
            }
        }

        let schema = Arc::clone(&self.schema);
        for (client_id, checkpoint) in checkpoints {
            let client_id = *client_id;
            let Some(record) = self.identity.get(client_id) else {
                continue;
            };
            let state = record.state;
            if state == RecordState::DeletedSaved {
                continue;
            }
            if state == RecordState::DeletedDirty && checkpoint.state != RecordState::DeletedDirty {
                self.transition(client_id, StateEvent::Rollback)?;
            }

            let record = self.record_mut(client_id)?;
            let before = record.attributes.modified().clone();
            record.attributes.restore_modified(checkpoint.modified.clone());
            let changed: BTreeSet<String> = before
                .keys()
                .chain(checkpoint.modified.keys())
                .filter(|name| before.get(*name) != checkpoint.modified.get(*name))
                .cloned()
                .collect();
            for name in changed {
                self.note(client_id, RecordChange::AttributeChanged(name));
            }

            let type_name = self.type_of(client_id)?;
            let current = self.graph.current_of(client_id);
            for (name, members) in current {
                let descriptor = schema.relationship(&type_name, &name)?;
                let wanted = match checkpoint.edges.get(&name) {
                    Some(saved) => self.live_members(saved),
                    None => match members {
                        Members::One(_) => Members::One(None),
                        Members::Many(_) => Members::Many(Vec::new()),
                    },
                };
                self.graph.sync_layer(
                    LinkContext::new(&schema, &self.identity),
                    &type_name,
                    client_id,
                    descriptor,
                    &wanted,
                    Layer::Current,
                )?;
            }
            self.edited.insert(client_id);
        }
        Ok(())
    }
}

fn adapter_call(kind: SaveKind) -> AdapterCall {
    match kind {
        SaveKind::Create => AdapterCall::Create,
        SaveKind::Update => AdapterCall::Update,
        SaveKind::Delete => AdapterCall::Delete,
    }
}

impl Store {
    /// Which records a commit of `scope` would send, by kind of save.
    pub fn commit_set(&self, scope: &CommitScope) -> CoreResult<CommitSet> {
        let inner = self.inner.lock();
        inner.collect_commit(scope).map(|(set, _)| set)
    }

    /// Saves every record in scope.
    ///
    /// Creates go first, parent before child along belongsTo edges, then
    /// updates, then deletes, child before parent. Each level is grouped by
    /// type; groups use the collaborator's batch hooks when it supports them
    /// and `bulk_commit` is on. Outcomes are applied record by record.
    ///
    /// # Errors
    ///
    /// `InvalidState` when an explicitly named record is being saved, is
    /// invalid or failed, or is not loaded. Nothing is sent in that case.
    /// Per-record failures are reported in the [`CommitReport`], not as an
    /// error.
    pub async fn commit(&self, scope: CommitScope) -> CoreResult<CommitReport> {
        let (set, mut report) = self.mutate(|inner| {
            let (set, unchanged) = inner.collect_commit(&scope)?;
            let mut report = CommitReport::default();
            for client_id in unchanged {
                report.push(inner.handle(client_id), CommitOutcome::Unchanged);
            }
            for client_id in set.iter() {
                inner.begin_save(client_id)?;
            }
            Ok((set, report))
        })?;
        if set.is_empty() {
            return Ok(report);
        }
        debug!(
            created = set.created.len(),
            updated = set.updated.len(),
            deleted = set.deleted.len(),
            "committing"
        );

        let create_levels = {
            let inner = self.inner.lock();
            levels(&set.created, |c| inner.parents_of(c, Layer::Current))
        };
        for level in create_levels {
            self.commit_level(SaveKind::Create, level, &mut report).await;
        }

        if !set.updated.is_empty() {
            self.commit_level(SaveKind::Update, set.updated.clone(), &mut report)
                .await;
        }

        let delete_levels = {
            let inner = self.inner.lock();
            levels(&set.deleted, |c| inner.parents_of(c, Layer::Canonical))
        };
        for level in delete_levels.into_iter().rev() {
            self.commit_level(SaveKind::Delete, level, &mut report).await;
        }
        Ok(report)
    }

    async fn commit_level(&self, kind: SaveKind, level: Vec<ClientId>, report: &mut CommitReport) {
        let groups = {
            let mut inner = self.inner.lock();
            let mut groups: BTreeMap<String, Vec<RecordSnapshot>> = BTreeMap::new();
            for client_id in level {
                if !inner.identity.contains(client_id) {
                    report.push(inner.handle(client_id), CommitOutcome::Skipped);
                    continue;
                }
                if kind == SaveKind::Create {
                    if let Some(parent) = inner.unsaved_parent(client_id) {
                        let error =
                            AdapterError::fatal(format!("depends on unsaved record {parent}"));
                        let outcome = inner.apply_outcome(kind, client_id, Err(error), &self.stats);
                        report.push(inner.handle(client_id), outcome);
                        continue;
                    }
                }
                let layer = if kind == SaveKind::Delete {
                    Layer::Canonical
                } else {
                    Layer::Current
                };
                match inner.snapshot(client_id, layer) {
                    Ok(snapshot) => groups
                        .entry(snapshot.type_name.clone())
                        .or_default()
                        .push(snapshot),
                    Err(err) => {
                        let error = AdapterError::fatal(err.to_string());
                        let outcome = inner.apply_outcome(kind, client_id, Err(error), &self.stats);
                        report.push(inner.handle(client_id), outcome);
                    }
                }
            }
            inner.finish_operation();
            groups
        };
        self.after_operation();

        let bulk = self.config.bulk_commit && self.adapter.supports_bulk_commit();
        for (type_name, snapshots) in groups {
            debug!(
                type_name = %type_name,
                records = snapshots.len(),
                ?kind,
                bulk,
                "sending commit group"
            );
            self.stats
                .record_call(adapter_call(kind), snapshots.len() as u64);
            if bulk {
                let results = match kind {
                    SaveKind::Create => self.adapter.create_many(&snapshots).await,
                    SaveKind::Update => self.adapter.update_many(&snapshots).await,
                    SaveKind::Delete => self
                        .adapter
                        .delete_many(&snapshots)
                        .await
                        .into_iter()
                        .map(|r| r.map(|()| None))
                        .collect(),
                };
                self.apply_outcomes(kind, &snapshots, results, report);
            } else {
                for snapshot in &snapshots {
                    let result = match kind {
                        SaveKind::Create => self.adapter.create_one(snapshot).await,
                        SaveKind::Update => self.adapter.update_one(snapshot).await,
                        SaveKind::Delete => self.adapter.delete_one(snapshot).await.map(|()| None),
                    };
                    self.apply_outcomes(kind, std::slice::from_ref(snapshot), vec![result], report);
                }
            }
        }
    }

    fn apply_outcomes(
        &self,
        kind: SaveKind,
        snapshots: &[RecordSnapshot],
        results: Vec<AdapterResult<Option<RawRecordPayload>>>,
        report: &mut CommitReport,
    ) {
        {
            let mut inner = self.inner.lock();
            let mut results = results.into_iter();
            for snapshot in snapshots {
                let result = results.next().unwrap_or_else(|| {
                    Err(AdapterError::fatal("collaborator returned no outcome"))
                });
                let outcome = inner.apply_outcome(kind, snapshot.client_id, result, &self.stats);
                report.push(inner.handle(snapshot.client_id), outcome);
            }
            inner.finish_operation();
        }
        self.after_operation();
    }

    /// Saves one record.
    ///
    /// # Errors
    ///
    /// `Adapter(ValidationFailed)` when the collaborator rejected it (the
    /// record is now invalid and carries the field errors),
    /// `Adapter(Fatal)` when the save failed otherwise.
    pub async fn save(&self, record: RecordHandle) -> CoreResult<()> {
        let report = self.commit(CommitScope::Records(vec![record])).await?;
        match report.outcome(record) {
            None | Some(CommitOutcome::Saved | CommitOutcome::Unchanged) => Ok(()),
            Some(CommitOutcome::Invalid(errors)) => Err(CoreError::Adapter(
                AdapterError::ValidationFailed(errors.clone()),
            )),
            Some(CommitOutcome::Failed(error)) => Err(CoreError::Adapter(error.clone())),
            Some(CommitOutcome::Skipped) => Err(CoreError::RecordNotLive {
                client_id: record.client_id(),
            }),
        }
    }

    /// Starts a transaction over `records`, checkpointing their local
    /// attribute edits and relationship membership.
    pub fn begin_transaction(&self, records: &[RecordHandle]) -> CoreResult<Transaction> {
        let mut inner = self.inner.lock();
        let id = TransactionId::new(inner.next_transaction);
        inner.next_transaction += 1;
        let mut transaction = Transaction::new(id, self.id);
        for record in records {
            let client_id = inner.live(*record)?;
            transaction
                .checkpoints
                .insert(client_id, inner.checkpoint(client_id)?);
        }
        debug!(transaction = %id, records = transaction.len(), "began transaction");
        Ok(transaction)
    }

    /// Adds a record to a transaction, checkpointing it now. A record that
    /// is already part of it keeps its original checkpoint.
    pub fn add_to_transaction(
        &self,
        transaction: &mut Transaction,
        record: RecordHandle,
    ) -> CoreResult<()> {
        self.check_transaction(transaction)?;
        let inner = self.inner.lock();
        let client_id = inner.live(record)?;
        if !transaction.checkpoints.contains_key(&client_id) {
            let checkpoint = inner.checkpoint(client_id)?;
            transaction.checkpoints.insert(client_id, checkpoint);
        }
        Ok(())
    }

    /// Restores every record of the transaction to its checkpoint:
    /// attribute edits, relationship membership (inverses included) and
    /// local deletion.
    ///
    /// # Errors
    ///
    /// `InvalidState` if any record is being saved; nothing is restored.
    pub fn rollback_transaction(&self, transaction: &Transaction) -> CoreResult<()> {
        self.check_transaction(transaction)?;
        debug!(transaction = %transaction.id(), "rolling back transaction");
        self.mutate(|inner| inner.restore_checkpoints(&transaction.checkpoints))
    }

    /// Saves every live record of the transaction.
    pub async fn commit_transaction(&self, transaction: &Transaction) -> CoreResult<CommitReport> {
        self.check_transaction(transaction)?;
        let records = {
            let inner = self.inner.lock();
            transaction
                .records()
                .into_iter()
                .filter(|record| inner.live(*record).is_ok())
                .collect()
        };
        self.commit(CommitScope::Records(records)).await
    }

    fn check_transaction(&self, transaction: &Transaction) -> CoreResult<()> {
        if transaction.store_id() == self.id {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} belongs to another store",
                transaction.id()
            )))
        }
    }
}

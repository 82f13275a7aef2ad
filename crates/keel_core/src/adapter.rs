//! Persistence collaborator interface.
//!
//! The store never talks to a transport itself. Everything that leaves the
//! process goes through an [`Adapter`]: fetching records, fetching related
//! records, running queries and saving. Wire formats and transport errors
//! stay on the adapter's side; the store only sees normalized payloads and
//! the two-way [`AdapterError`] classification.

use crate::payload::{RawRecordPayload, RecordSnapshot, ResourceIdentifier};
use crate::record::FieldErrors;
use crate::schema::RelationshipDescriptor;
use async_trait::async_trait;
use keel_value::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for collaborator calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Classification of a collaborator rejection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The record was rejected with field-level messages.
    #[error("validation failed: {0}")]
    ValidationFailed(FieldErrors),

    /// Any other failure.
    #[error("{0}")]
    Fatal(String),
}

impl AdapterError {
    /// Creates a fatal error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    /// Returns the field errors of a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            AdapterError::ValidationFailed(errors) => Some(errors),
            AdapterError::Fatal(_) => None,
        }
    }
}

/// How the members of an async relationship are to be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedRef {
    /// Fetch the link the server supplied.
    Link(String),
    /// Fetch these records.
    Ids(Vec<ResourceIdentifier>),
}

/// Response to a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Matching records, in response order.
    pub records: Vec<RawRecordPayload>,
    /// Server-provided metadata.
    pub meta: Option<Value>,
}

impl QueryResponse {
    /// Creates a response without metadata.
    pub fn new(records: Vec<RawRecordPayload>) -> Self {
        Self {
            records,
            meta: None,
        }
    }
}

/// Persistence collaborator.
///
/// The single-record save hooks return an optional payload: `Some` carries
/// authoritative values (and, for creates, the assigned id), `None` means
/// the snapshot was accepted as sent.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Fetches one record. `None` means it does not exist.
    async fn find_one(&self, type_name: &str, id: &str)
        -> AdapterResult<Option<RawRecordPayload>>;

    /// Fetches several records of one type.
    async fn find_many(&self, type_name: &str, ids: &[String])
        -> AdapterResult<Vec<RawRecordPayload>>;

    /// Fetches the members of an async relationship.
    ///
    /// The default resolves id lists through [`Adapter::find_many`], one
    /// call per concrete type. Links need an override.
    async fn find_related(
        &self,
        owner: &RecordSnapshot,
        relationship: &RelationshipDescriptor,
        related: RelatedRef,
    ) -> AdapterResult<Vec<RawRecordPayload>> {
        match related {
            RelatedRef::Link(url) => Err(AdapterError::fatal(format!(
                "{}.{} has link {url} but the adapter cannot follow links",
                owner.type_name, relationship.name
            ))),
            RelatedRef::Ids(ids) => {
                let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for ident in ids {
                    by_type.entry(ident.type_name).or_default().push(ident.id);
                }
                let mut payloads = Vec::new();
                for (type_name, ids) in by_type {
                    payloads.extend(self.find_many(&type_name, &ids).await?);
                }
                Ok(payloads)
            }
        }
    }

    /// Runs a query for records of one type.
    async fn query(&self, type_name: &str, params: &Value) -> AdapterResult<QueryResponse>;

    /// Persists a new record.
    async fn create_one(&self, snapshot: &RecordSnapshot)
        -> AdapterResult<Option<RawRecordPayload>>;

    /// Persists changes to an existing record.
    async fn update_one(&self, snapshot: &RecordSnapshot)
        -> AdapterResult<Option<RawRecordPayload>>;

    /// Removes a record.
    async fn delete_one(&self, snapshot: &RecordSnapshot) -> AdapterResult<()>;

    /// Whether the batch hooks should be used for groups of one type.
    fn supports_bulk_commit(&self) -> bool {
        false
    }

    /// Persists several new records of one type. Returns one outcome per
    /// snapshot, in order.
    async fn create_many(
        &self,
        snapshots: &[RecordSnapshot],
    ) -> Vec<AdapterResult<Option<RawRecordPayload>>> {
        let mut outcomes = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            outcomes.push(self.create_one(snapshot).await);
        }
        outcomes
    }

    /// Persists changes to several records of one type.
    async fn update_many(
        &self,
        snapshots: &[RecordSnapshot],
    ) -> Vec<AdapterResult<Option<RawRecordPayload>>> {
        let mut outcomes = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            outcomes.push(self.update_one(snapshot).await);
        }
        outcomes
    }

    /// Removes several records of one type.
    async fn delete_many(&self, snapshots: &[RecordSnapshot]) -> Vec<AdapterResult<()>> {
        let mut outcomes = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            outcomes.push(self.delete_one(snapshot).await);
        }
        outcomes
    }
}

//! # Keel Core
//!
//! Client-side record store.
//!
//! This crate provides:
//! - An identity map guaranteeing one record per `(type, id)`
//! - Attribute storage with persisted, in-flight and local layers
//! - A relationship graph that keeps inverses in sync
//! - A record lifecycle state machine with dirtiness tracking
//! - Commit coordination against a persistence collaborator
//! - Live record arrays that follow record changes without refresh
//!
//! Persistence itself is delegated to an [`Adapter`]; this crate knows
//! nothing about transports or wire formats.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod array;
mod change_feed;
mod commit;
mod config;
mod error;
mod fetch;
mod graph;
mod identity;
mod payload;
mod record;
mod schema;
mod stats;
mod store;
mod types;

pub use adapter::{Adapter, AdapterError, AdapterResult, QueryResponse, RelatedRef};
pub use array::{
    ArrayChange, ArrayNotification, ArraySource, RecordArray, RecordPredicate, RecordView,
};
pub use change_feed::{ChangeFeed, RecordChange, RecordEvent, StoreEvent, StoreEventKind};
pub use commit::{CommitOutcome, CommitReport, CommitScope, CommitSet, Transaction};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use fetch::{BelongsTo, FetchKey, FetchStatus, HasMany, Materialized, PendingFetch};
pub use graph::{Edge, Layer, Members};
pub use payload::{
    RawRecordPayload, RecordSnapshot, RelationshipData, ResourceIdentifier, SnapshotRef,
    SnapshotRelationship,
};
pub use record::{FieldErrors, RecordHandle, RecordState, SaveKind, StateEvent};
pub use schema::{
    AttributeDescriptor, InverseSpec, ModelSchema, RelationshipDescriptor, RelationshipKind,
    SchemaRegistry,
};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::Store;
pub use types::{ClientId, RecordArrayId, StoreId, TransactionId};

pub use keel_value::{Attributes, Value};

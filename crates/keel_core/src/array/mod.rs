//! Live record arrays.
//!
//! Three kinds of array are kept up to date without any refresh call:
//! - **all**: every loaded, non-deleted record of a type, in creation order
//! - **filtered**: the records of a type that pass a predicate
//! - **query**: the collaborator's response to a query, in response order
//!
//! Membership changes are applied synchronously at the end of each store
//! operation and buffered per array; `Store::flush` delivers them as one
//! [`ArrayNotification`] per changed array.

mod live;
mod manager;
mod view;

pub use live::{ArrayChange, ArrayNotification, ArraySource, RecordArray, RecordPredicate};
pub use view::RecordView;

pub(crate) use live::ArrayKind;
pub(crate) use manager::RecordArrayManager;

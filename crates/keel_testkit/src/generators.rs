//! Property-based test generators using proptest.
//!
//! Provides strategies for attribute values, payloads, and sequences of
//! store operations.

use keel_core::{RawRecordPayload, Value};
use proptest::prelude::*;

/// Strategy for scalar attribute values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Integer),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}

/// Strategy for record ids.
pub fn id_strategy() -> impl Strategy<Value = String> {
    (1u32..500).prop_map(|n| n.to_string())
}

/// Strategy for person payloads.
pub fn person_payload_strategy() -> impl Strategy<Value = RawRecordPayload> {
    (id_strategy(), "[A-Z][a-z]{1,8}")
        .prop_map(|(id, name)| RawRecordPayload::new("person", id).attr("name", name))
}

/// An edit against a fixed pool of posts and comments, by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOp {
    /// Point a comment at a post, or at nothing.
    SetPost {
        /// Comment index.
        comment: usize,
        /// Post index.
        post: Option<usize>,
    },
    /// Append a comment to a post's comments.
    AddComment {
        /// Post index.
        post: usize,
        /// Comment index.
        comment: usize,
    },
    /// Remove a comment from a post's comments.
    RemoveComment {
        /// Post index.
        post: usize,
        /// Comment index.
        comment: usize,
    },
    /// Roll back a comment.
    RollbackComment {
        /// Comment index.
        comment: usize,
    },
    /// Roll back a post.
    RollbackPost {
        /// Post index.
        post: usize,
    },
}

/// Strategy for a single graph edit over `posts` posts and `comments`
/// comments.
pub fn graph_op_strategy(posts: usize, comments: usize) -> impl Strategy<Value = GraphOp> {
    prop_oneof![
        3 => (0..comments, prop::option::of(0..posts))
            .prop_map(|(comment, post)| GraphOp::SetPost { comment, post }),
        3 => (0..posts, 0..comments)
            .prop_map(|(post, comment)| GraphOp::AddComment { post, comment }),
        2 => (0..posts, 0..comments)
            .prop_map(|(post, comment)| GraphOp::RemoveComment { post, comment }),
        1 => (0..comments).prop_map(|comment| GraphOp::RollbackComment { comment }),
        1 => (0..posts).prop_map(|post| GraphOp::RollbackPost { post }),
    ]
}

/// Strategy for a sequence of graph edits.
pub fn graph_ops_strategy(
    posts: usize,
    comments: usize,
    len: usize,
) -> impl Strategy<Value = Vec<GraphOp>> {
    prop::collection::vec(graph_op_strategy(posts, comments), 1..len)
}

/// An attribute-level operation on one record.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeOp {
    /// Local edit.
    Set(Value),
    /// Server push of a new persisted value.
    Push(Value),
    /// Discard local edits.
    Rollback,
}

/// Strategy for a sequence of attribute operations.
pub fn attribute_ops_strategy(len: usize) -> impl Strategy<Value = Vec<AttributeOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => value_strategy().prop_map(AttributeOp::Set),
            2 => value_strategy().prop_map(AttributeOp::Push),
            1 => Just(AttributeOp::Rollback),
        ],
        1..len,
    )
}

/// Case counts for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Few cases, for properties that build a store per case.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 48,
            max_shrink_iters: 200,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

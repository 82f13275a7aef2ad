//! Test fixtures and store helpers.
//!
//! Provides the schemas the test suites share and a [`TestStore`] that
//! pairs a store with the in-memory adapter behind it.

use crate::adapter::MemoryAdapter;
use keel_core::{
    Adapter, Attributes, ModelSchema, RawRecordPayload, RelationshipDescriptor,
    ResourceIdentifier, SchemaRegistry, Store, StoreConfig, Value,
};
use std::sync::Arc;

/// A store with its adapter.
pub struct TestStore {
    /// The store.
    pub store: Store,
    /// The adapter the store talks to.
    pub adapter: Arc<MemoryAdapter>,
}

impl TestStore {
    /// Creates a store over `schema` with a fresh adapter.
    pub fn new(schema: SchemaRegistry) -> Self {
        Self::with_config(schema, StoreConfig::default())
    }

    /// Creates a store with a custom configuration.
    pub fn with_config(schema: SchemaRegistry, config: StoreConfig) -> Self {
        Self::sharing(Arc::new(schema), config)
    }

    /// Creates a store over an already shared schema.
    pub fn sharing(schema: Arc<SchemaRegistry>, config: StoreConfig) -> Self {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = Store::with_config(
            schema,
            Arc::clone(&adapter) as Arc<dyn Adapter>,
            config,
        );
        Self { store, adapter }
    }

    /// Store over [`blog_schema`].
    pub fn blog() -> Self {
        Self::new(blog_schema())
    }

    /// Store over [`async_blog_schema`].
    pub fn async_blog() -> Self {
        Self::new(async_blog_schema())
    }

    /// Store over [`messaging_schema`].
    pub fn messaging() -> Self {
        Self::new(messaging_schema())
    }

    /// Store over [`commentable_schema`].
    pub fn commentable() -> Self {
        Self::new(commentable_schema())
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Builds attributes from `(name, value)` pairs.
pub fn attrs<V: Into<Value>>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> Attributes {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.into()))
        .collect()
}

/// Shorthand for a resource identifier.
pub fn ident(type_name: &str, id: &str) -> ResourceIdentifier {
    ResourceIdentifier::new(type_name, id)
}

fn blog_models(is_async: bool) -> SchemaRegistry {
    let comments = RelationshipDescriptor::has_many("comments", "comment");
    let post = RelationshipDescriptor::belongs_to("post", "post");
    let (comments, post) = if is_async {
        (comments.asynchronous(), post.asynchronous())
    } else {
        (comments, post)
    };

    let models = [
        ModelSchema::new("person")
            .attribute("name")
            .attribute_with_default("role", "reader")
            .relationship(RelationshipDescriptor::has_many("posts", "post")),
        ModelSchema::new("tag")
            .attribute("name")
            .relationship(RelationshipDescriptor::has_many("posts", "post")),
        ModelSchema::new("post")
            .attribute("title")
            .attribute("body")
            .relationship(comments)
            .relationship(RelationshipDescriptor::belongs_to("author", "person"))
            .relationship(RelationshipDescriptor::has_many("tags", "tag")),
        ModelSchema::new("comment")
            .attribute("body")
            .relationship(post),
    ];

    register_all(models)
}

/// Blog schema with synchronous relationships.
///
/// - `person { name, role = "reader" }` has many `posts`
/// - `post { title, body }` has many `comments` and `tags`, belongs to
///   `author` (a person)
/// - `comment { body }` belongs to `post`
/// - `tag { name }` has many `posts` (many-to-many with `post.tags`)
pub fn blog_schema() -> SchemaRegistry {
    blog_models(false)
}

/// Blog schema where `post.comments` and `comment.post` are async.
pub fn async_blog_schema() -> SchemaRegistry {
    blog_models(true)
}

/// Polymorphic schema.
///
/// - `user { name }` has many `messages` (polymorphic over `message`)
/// - `message { created_at }` belongs to `user`
/// - `post_message { title }` and `comment_message { body }` extend
///   `message`
pub fn messaging_schema() -> SchemaRegistry {
    let models = [
        ModelSchema::new("user")
            .attribute("name")
            .relationship(
                RelationshipDescriptor::has_many("messages", "message").polymorphic(),
            ),
        ModelSchema::new("message")
            .attribute("created_at")
            .relationship(RelationshipDescriptor::belongs_to("user", "user")),
        ModelSchema::new("post_message")
            .extends("message")
            .attribute("title"),
        ModelSchema::new("comment_message")
            .extends("message")
            .attribute("body"),
    ];

    register_all(models)
}

/// Polymorphic belongsTo whose inverses live on the subtypes.
///
/// - `commentable` is a base type with nothing declared on it
/// - `article { title }` extends it and has many `comments`
/// - `video { url }` extends it and has many `remarks`
/// - `note { body }` belongs to `commentable` (polymorphic)
pub fn commentable_schema() -> SchemaRegistry {
    let models = [
        ModelSchema::new("commentable"),
        ModelSchema::new("article")
            .extends("commentable")
            .attribute("title")
            .relationship(RelationshipDescriptor::has_many("comments", "note")),
        ModelSchema::new("video")
            .extends("commentable")
            .attribute("url")
            .relationship(RelationshipDescriptor::has_many("remarks", "note")),
        ModelSchema::new("note").attribute("body").relationship(
            RelationshipDescriptor::belongs_to("commentable", "commentable").polymorphic(),
        ),
    ];
    register_all(models)
}

fn register_all(models: impl IntoIterator<Item = ModelSchema>) -> SchemaRegistry {
    let mut schema = SchemaRegistry::new();
    for model in models {
        if let Err(err) = schema.register(model) {
            panic!("fixture schema is invalid: {err}");
        }
    }
    schema
}

/// Common payloads.
pub mod payloads {
    use super::ident;
    use keel_core::RawRecordPayload;

    /// A person.
    pub fn person(id: &str, name: &str) -> RawRecordPayload {
        RawRecordPayload::new("person", id).attr("name", name)
    }

    /// A post with comment ids.
    pub fn post(id: &str, title: &str, comments: &[&str]) -> RawRecordPayload {
        RawRecordPayload::new("post", id)
            .attr("title", title)
            .many(
                "comments",
                comments.iter().map(|c| ident("comment", c)).collect(),
            )
    }

    /// A comment belonging to a post.
    pub fn comment(id: &str, body: &str, post: &str) -> RawRecordPayload {
        RawRecordPayload::new("comment", id)
            .attr("body", body)
            .one("post", Some(ident("post", post)))
    }

    /// A tag.
    pub fn tag(id: &str, name: &str) -> RawRecordPayload {
        RawRecordPayload::new("tag", id).attr("name", name)
    }
}

/// Seeds `adapter` with a post and its comments, returning the post
/// payload so it can also be pushed.
pub fn seed_post_with_comments(
    adapter: &MemoryAdapter,
    post_id: &str,
    comment_ids: &[&str],
) -> RawRecordPayload {
    let post = payloads::post(post_id, "Rails is omakase", comment_ids);
    adapter.insert(post.clone());
    for id in comment_ids {
        adapter.insert(payloads::comment(id, &format!("comment {id}"), post_id));
    }
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::RelationshipKind;

    #[test]
    fn blog_inverses_resolve() {
        let schema = blog_schema();
        assert_eq!(
            schema.inverse_for("post", "comments").unwrap().unwrap().name,
            "post"
        );
        assert_eq!(
            schema.inverse_for("post", "author").unwrap().unwrap().name,
            "posts"
        );
        let tags = schema.inverse_for("post", "tags").unwrap().unwrap();
        assert_eq!(tags.name, "posts");
        assert_eq!(tags.kind, RelationshipKind::HasMany);
    }

    #[test]
    fn subtypes_inherit_the_user_relationship() {
        let schema = messaging_schema();
        assert!(schema.is_a("post_message", "message"));
        assert_eq!(
            schema.inverse_for("post_message", "user").unwrap().unwrap().name,
            "messages"
        );
    }

    #[test]
    fn commentable_inverses_resolve_per_subtype() {
        let schema = commentable_schema();
        assert_eq!(schema.inverse_for("note", "commentable").unwrap(), None);
        assert_eq!(
            schema
                .inverse_toward("note", "commentable", "video")
                .unwrap()
                .unwrap()
                .name,
            "remarks"
        );
        assert_eq!(
            schema.inverse_for("article", "comments").unwrap().unwrap().name,
            "commentable"
        );
    }
}

//! Static, data-only model descriptors.

use keel_value::Value;

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Single reference held by this side.
    BelongsTo,
    /// Ordered set of references.
    HasMany,
    /// Single reference, usually mirrored by a `BelongsTo` on the other side.
    HasOne,
}

impl RelationshipKind {
    /// Returns true for `BelongsTo` and `HasOne`.
    #[must_use]
    pub const fn is_to_one(self) -> bool {
        matches!(self, RelationshipKind::BelongsTo | RelationshipKind::HasOne)
    }

    /// Returns true for `HasMany`.
    #[must_use]
    pub const fn is_to_many(self) -> bool {
        matches!(self, RelationshipKind::HasMany)
    }
}

/// How the inverse of a relationship is determined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InverseSpec {
    /// Scan the related type for a single matching relationship.
    #[default]
    Auto,
    /// The relationship has no inverse.
    None,
    /// The named relationship on the related type is the inverse.
    Named(String),
}

/// Schema-level description of one relationship of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    /// Relationship name on the owning type.
    pub name: String,
    /// Cardinality.
    pub kind: RelationshipKind,
    /// Concrete related type, or the polymorphic base type.
    pub related_type: String,
    /// Inverse declaration.
    pub inverse: InverseSpec,
    /// Accepts any subtype of `related_type`.
    pub polymorphic: bool,
    /// Materialization may require a fetch.
    pub is_async: bool,
}

impl RelationshipDescriptor {
    fn new(name: &str, kind: RelationshipKind, related_type: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            related_type: related_type.to_string(),
            inverse: InverseSpec::Auto,
            polymorphic: false,
            is_async: false,
        }
    }

    /// Declares a belongsTo relationship.
    #[must_use]
    pub fn belongs_to(name: &str, related_type: &str) -> Self {
        Self::new(name, RelationshipKind::BelongsTo, related_type)
    }

    /// Declares a hasMany relationship.
    #[must_use]
    pub fn has_many(name: &str, related_type: &str) -> Self {
        Self::new(name, RelationshipKind::HasMany, related_type)
    }

    /// Declares a hasOne relationship.
    #[must_use]
    pub fn has_one(name: &str, related_type: &str) -> Self {
        Self::new(name, RelationshipKind::HasOne, related_type)
    }

    /// Names the inverse explicitly.
    #[must_use]
    pub fn inverse(mut self, name: &str) -> Self {
        self.inverse = InverseSpec::Named(name.to_string());
        self
    }

    /// Declares that the relationship has no inverse.
    #[must_use]
    pub fn no_inverse(mut self) -> Self {
        self.inverse = InverseSpec::None;
        self
    }

    /// Accepts subtypes of the related type.
    #[must_use]
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// Allows lazy materialization through the collaborator.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

/// Schema-level description of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    /// Attribute name.
    pub name: String,
    /// Value reported when the record has none.
    pub default: Option<Value>,
}

/// Attribute and relationship table of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    /// Type name.
    pub name: String,
    /// Base type used for polymorphic compatibility.
    pub base_type: Option<String>,
    /// Declared attributes.
    pub attributes: Vec<AttributeDescriptor>,
    /// Declared relationships.
    pub relationships: Vec<RelationshipDescriptor>,
}

impl ModelSchema {
    /// Starts a model description.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_type: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Marks this type as a subtype of `base`. The base's attributes and
    /// relationships are inherited when the model is registered.
    #[must_use]
    pub fn extends(mut self, base: &str) -> Self {
        self.base_type = Some(base.to_string());
        self
    }

    /// Declares an attribute without a default.
    #[must_use]
    pub fn attribute(mut self, name: &str) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.to_string(),
            default: None,
        });
        self
    }

    /// Declares an attribute with a default value.
    #[must_use]
    pub fn attribute_with_default(mut self, name: &str, default: impl Into<Value>) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.to_string(),
            default: Some(default.into()),
        });
        self
    }

    /// Declares a relationship.
    #[must_use]
    pub fn relationship(mut self, descriptor: RelationshipDescriptor) -> Self {
        self.relationships.push(descriptor);
        self
    }

    /// Looks up an attribute.
    pub fn attribute_named(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks up a relationship.
    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

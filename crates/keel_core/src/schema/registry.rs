//! Schema registry and inverse resolution.

use crate::error::{CoreError, CoreResult};
use crate::schema::model::{InverseSpec, ModelSchema, RelationshipDescriptor};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of record types.
///
/// The registry is built once, before any store is created, and passed to
/// the store by reference. Inverse lookups are memoized per
/// `(type, relationship, target type)` for the registry's lifetime, since
/// the schema is static once registered.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, Arc<ModelSchema>>,
    inverses: RwLock<HashMap<InverseKey, Option<RelationshipDescriptor>>>,
}

type InverseKey = (String, String, String);

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model.
    ///
    /// A model that `extends` a base inherits the base's attributes and
    /// relationships, so the base must be registered first. Declarations on
    /// the subtype override inherited ones of the same name.
    pub fn register(&mut self, model: ModelSchema) -> CoreResult<()> {
        if self.models.contains_key(&model.name) {
            return Err(CoreError::invalid_operation(format!(
                "type {} is already registered",
                model.name
            )));
        }

        let mut model = model;
        if let Some(base_name) = model.base_type.clone() {
            let base = self
                .models
                .get(&base_name)
                .ok_or_else(|| CoreError::unknown_type(&base_name))?;

            let mut attributes: Vec<_> = base
                .attributes
                .iter()
                .filter(|a| model.attribute_named(&a.name).is_none())
                .cloned()
                .collect();
            attributes.append(&mut model.attributes);
            model.attributes = attributes;

            let mut relationships: Vec<_> = base
                .relationships
                .iter()
                .filter(|r| model.relationship_named(&r.name).is_none())
                .cloned()
                .collect();
            relationships.append(&mut model.relationships);
            model.relationships = relationships;
        }

        debug!(type_name = %model.name, "registered model");
        self.models.insert(model.name.clone(), Arc::new(model));
        Ok(())
    }

    /// Registers a model, builder style.
    pub fn with(mut self, model: ModelSchema) -> CoreResult<Self> {
        self.register(model)?;
        Ok(self)
    }

    /// Returns true if the type is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.models.contains_key(type_name)
    }

    /// Looks up a model.
    pub fn model(&self, type_name: &str) -> CoreResult<&Arc<ModelSchema>> {
        self.models
            .get(type_name)
            .ok_or_else(|| CoreError::unknown_type(type_name))
    }

    /// Looks up a relationship descriptor.
    pub fn relationship(
        &self,
        type_name: &str,
        relationship: &str,
    ) -> CoreResult<&RelationshipDescriptor> {
        self.model(type_name)?
            .relationship_named(relationship)
            .ok_or_else(|| CoreError::unknown_relationship(type_name, relationship))
    }

    /// Returns true if `actual` is `expected` or one of its subtypes.
    pub fn is_a(&self, actual: &str, expected: &str) -> bool {
        let mut current = Some(actual);
        while let Some(name) = current {
            if name == expected {
                return true;
            }
            current = self
                .models
                .get(name)
                .and_then(|m| m.base_type.as_deref());
        }
        false
    }

    /// Checks that a record of type `actual` may be assigned to `descriptor`
    /// on a record of type `owner`.
    ///
    /// Monomorphic relationships require an exact type match; polymorphic
    /// ones accept any subtype of the declared related type.
    pub fn check_assignable(
        &self,
        owner: &str,
        descriptor: &RelationshipDescriptor,
        actual: &str,
    ) -> CoreResult<()> {
        let ok = if descriptor.polymorphic {
            self.is_a(actual, &descriptor.related_type)
        } else {
            actual == descriptor.related_type
        };

        if ok {
            Ok(())
        } else {
            Err(CoreError::RelationshipType {
                type_name: owner.to_string(),
                relationship: descriptor.name.clone(),
                expected: descriptor.related_type.clone(),
                actual: actual.to_string(),
            })
        }
    }

    /// Resolves the inverse of `type_name.relationship` on its declared
    /// related type.
    ///
    /// An explicit inverse wins. Otherwise the related type is scanned for
    /// relationships pointing back at `type_name` (or one of its bases):
    /// none means no inverse, more than one is an `AmbiguousInverse` error.
    /// A self-referential relationship without an explicit inverse is
    /// reported with a warning and treated as one-directional.
    pub fn inverse_for(
        &self,
        type_name: &str,
        relationship: &str,
    ) -> CoreResult<Option<RelationshipDescriptor>> {
        let related_type = self.relationship(type_name, relationship)?.related_type.clone();
        self.inverse_toward(type_name, relationship, &related_type)
    }

    /// Resolves the inverse of `type_name.relationship` on the concrete type
    /// of the record it links to.
    ///
    /// For a polymorphic relationship the subtypes may declare the inverse
    /// while the base does not, so each target type resolves on its own.
    pub fn inverse_toward(
        &self,
        type_name: &str,
        relationship: &str,
        target_type: &str,
    ) -> CoreResult<Option<RelationshipDescriptor>> {
        let key = (
            type_name.to_string(),
            relationship.to_string(),
            target_type.to_string(),
        );
        if let Some(cached) = self.inverses.read().get(&key) {
            return Ok(cached.clone());
        }

        let resolved = self.resolve_inverse(type_name, relationship, target_type)?;
        self.inverses.write().insert(key, resolved.clone());
        Ok(resolved)
    }

    fn resolve_inverse(
        &self,
        type_name: &str,
        relationship: &str,
        target_type: &str,
    ) -> CoreResult<Option<RelationshipDescriptor>> {
        let descriptor = self.relationship(type_name, relationship)?;
        let target = self.model(target_type)?;

        match &descriptor.inverse {
            InverseSpec::None => Ok(None),
            InverseSpec::Named(name) => match target.relationship_named(name) {
                Some(inverse) => Ok(Some(inverse.clone())),
                // Declared only on the subtypes; resolved per target.
                None if descriptor.polymorphic
                    && target.name == descriptor.related_type
                    && self.subtype_declares(&target.name, name) =>
                {
                    Ok(None)
                }
                None => Err(CoreError::unknown_relationship(&target.name, name)),
            },
            InverseSpec::Auto => {
                if descriptor.related_type == type_name {
                    warn!(
                        type_name,
                        relationship,
                        "reflexive relationship has no explicit inverse; treating it as one-directional"
                    );
                    return Ok(None);
                }

                let candidates: Vec<&RelationshipDescriptor> = target
                    .relationships
                    .iter()
                    .filter(|r| self.is_a(type_name, &r.related_type))
                    .filter(|r| match &r.inverse {
                        InverseSpec::Auto => true,
                        InverseSpec::None => false,
                        InverseSpec::Named(name) => name == relationship,
                    })
                    .collect();

                match candidates.as_slice() {
                    [] => Ok(None),
                    [single] => Ok(Some((*single).clone())),
                    many => Err(CoreError::AmbiguousInverse {
                        type_name: type_name.to_string(),
                        relationship: relationship.to_string(),
                        candidates: many.iter().map(|r| r.name.clone()).collect(),
                    }),
                }
            }
        }
    }

    fn subtype_declares(&self, base: &str, relationship: &str) -> bool {
        self.models.values().any(|model| {
            model.name != base
                && self.is_a(&model.name, base)
                && model.relationship_named(relationship).is_some()
        })
    }
}

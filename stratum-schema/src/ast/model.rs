//! Entity definitions and the normalized model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{EntityField, Relation};

/// An index over one or more fields of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed fields, in key order.
    pub fields: Vec<SmolStr>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub unique: bool,
    /// Explicit index name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IndexSpec {
    /// Create a non-unique index.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            name: None,
        }
    }

    /// Make this index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Give the index an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The index name on `table`: the explicit name, or one derived from the
    /// table and column names.
    pub fn resolved_name(&self, table: &str, columns: &[&str]) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let suffix = if self.unique { "key" } else { "idx" };
                format!("{}_{}_{}", table, columns.join("_"), suffix)
            }
        }
    }
}

/// A fully resolved entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Table name.
    pub table: String,
    /// Fields in declaration order.
    pub fields: IndexMap<SmolStr, EntityField>,
    /// Relations by name.
    #[serde(default)]
    pub relations: IndexMap<SmolStr, Relation>,
    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl EntityDefinition {
    /// Create an empty entity backed by `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: IndexMap::new(),
            relations: IndexMap::new(),
            indexes: Vec::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, name: impl Into<SmolStr>, field: EntityField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, name: impl Into<SmolStr>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&EntityField> {
        self.fields.get(name)
    }

    /// Physical column name of a field, falling back to the field name for
    /// fields that do not exist.
    pub fn column_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.fields
            .get(field)
            .map(|f| f.column_name(field))
            .unwrap_or(field)
    }

    /// Primary key field names.
    pub fn primary_key(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.primary)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A normalized, fully resolved entity model.
///
/// A model is a value: operations that change it return a new model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedModel {
    entities: IndexMap<SmolStr, EntityDefinition>,
}

impl NormalizedModel {
    /// The empty model ("nothing migrated yet").
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a model from entity definitions.
    pub fn from_entities<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = (S, EntityDefinition)>,
        S: Into<SmolStr>,
    {
        Self {
            entities: entities.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        }
    }

    /// Return a new model with `entity` added or replaced.
    pub fn with_entity(mut self, name: impl Into<SmolStr>, entity: EntityDefinition) -> Self {
        self.entities.insert(name.into(), entity);
        self
    }

    /// Get an entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    /// Iterate entities in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &EntityDefinition)> {
        self.entities.iter().map(|(n, e)| (n.as_str(), e))
    }

    /// Find the entity backed by `table`.
    pub fn entity_by_table(&self, table: &str) -> Option<(&str, &EntityDefinition)> {
        self.entities().find(|(_, e)| e.table == table)
    }

    /// Check whether an entity exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the model has no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Consume the model, yielding its entity map.
    pub fn into_entities(self) -> IndexMap<SmolStr, EntityDefinition> {
        self.entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FieldType;

    #[test]
    fn test_index_resolved_name() {
        let idx = IndexSpec::new(["authorId"]);
        assert_eq!(idx.resolved_name("posts", &["author_id"]), "posts_author_id_idx");

        let idx = IndexSpec::new(["email"]).unique();
        assert_eq!(idx.resolved_name("users", &["email"]), "users_email_key");

        let idx = IndexSpec::new(["a", "b"]).named("custom");
        assert_eq!(idx.resolved_name("t", &["a", "b"]), "custom");
    }

    #[test]
    fn test_model_is_a_value() {
        let model = NormalizedModel::empty();
        let next = model
            .clone()
            .with_entity("Todo", EntityDefinition::new("todos"));
        assert!(model.is_empty());
        assert_eq!(next.len(), 1);
        assert_eq!(next.entity_by_table("todos").map(|(n, _)| n), Some("Todo"));
    }

    #[test]
    fn test_primary_key() {
        let entity = EntityDefinition::new("users")
            .with_field("id", EntityField::required(FieldType::Uuid).primary())
            .with_field("email", EntityField::required(FieldType::String));
        assert_eq!(entity.primary_key(), vec!["id"]);
        assert_eq!(entity.column_name("email"), "email");
    }
}

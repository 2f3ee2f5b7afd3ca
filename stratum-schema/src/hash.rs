//! Content-addressed model hashing.
//!
//! A model hash is the SHA-256 of the model's canonical JSON form. The
//! canonical form sorts every object key, so two models that differ only in
//! declaration order hash identically.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ast::NormalizedModel;
use crate::error::{SchemaError, SchemaResult};

/// Hash of the empty model (`sha256("{}")`), the recorded "from" hash of
/// the first migration.
pub const EMPTY_MODEL_HASH: &str =
    "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";

/// A lowercase hex SHA-256 model hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelHash(String);

impl ModelHash {
    /// Wrap an existing hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// The hash of the empty model.
    pub fn empty() -> Self {
        Self(EMPTY_MODEL_HASH.to_string())
    }

    /// Whether this is the empty model hash.
    pub fn is_empty_model(&self) -> bool {
        self.0 == EMPTY_MODEL_HASH
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ModelHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModelHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for ModelHash {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ModelHash {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A model together with its hash and canonical serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedModel {
    /// The model hash.
    pub hash: ModelHash,
    /// Canonical JSON that was hashed.
    pub canonical: String,
}

/// Serialize a model into its canonical JSON form.
///
/// Object keys are sorted at every level and each entity's indexes are
/// sorted, so only semantic content affects the result.
pub fn canonical_form(model: &NormalizedModel) -> SchemaResult<String> {
    let mut entities = model.clone().into_entities();
    for entity in entities.values_mut() {
        entity.indexes.sort();
    }
    let value = serde_json::to_value(&entities)
        .map_err(|e| SchemaError::config(format!("failed to serialize model: {e}")))?;
    serde_json::to_string(&sort_keys(value))
        .map_err(|e| SchemaError::config(format!("failed to serialize model: {e}")))
}

/// Hash a model.
pub fn hash_model(model: &NormalizedModel) -> SchemaResult<HashedModel> {
    let canonical = canonical_form(model)?;
    let hash = ModelHash(sha256_hex(canonical.as_bytes()));
    Ok(HashedModel { hash, canonical })
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EntityDefinition, EntityField, FieldType};

    fn todo() -> EntityDefinition {
        EntityDefinition::new("todos")
            .with_field("id", EntityField::required(FieldType::Uuid).primary())
            .with_field("title", EntityField::required(FieldType::String))
    }

    fn user() -> EntityDefinition {
        EntityDefinition::new("users")
            .with_field("email", EntityField::required(FieldType::String).unique())
            .with_field("name", EntityField::optional(FieldType::Text))
    }

    #[test]
    fn test_empty_model_hash() {
        let hashed = hash_model(&NormalizedModel::empty()).unwrap();
        assert_eq!(hashed.canonical, "{}");
        assert_eq!(hashed.hash.as_str(), EMPTY_MODEL_HASH);
        assert!(hashed.hash.is_empty_model());
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = NormalizedModel::empty()
            .with_entity("Todo", todo())
            .with_entity("User", user());
        let b = NormalizedModel::empty()
            .with_entity("User", user())
            .with_entity("Todo", todo());

        assert_eq!(hash_model(&a).unwrap().hash, hash_model(&b).unwrap().hash);
    }

    #[test]
    fn test_hash_field_order_independent() {
        let a = EntityDefinition::new("t")
            .with_field("a", EntityField::required(FieldType::Uuid))
            .with_field("b", EntityField::optional(FieldType::Text));
        let b = EntityDefinition::new("t")
            .with_field("b", EntityField::optional(FieldType::Text))
            .with_field("a", EntityField::required(FieldType::Uuid));

        let ha = hash_model(&NormalizedModel::empty().with_entity("T", a)).unwrap();
        let hb = hash_model(&NormalizedModel::empty().with_entity("T", b)).unwrap();
        assert_eq!(ha.hash, hb.hash);
        assert_eq!(ha.canonical, hb.canonical);
    }

    #[test]
    fn test_hash_index_order_independent() {
        use crate::ast::IndexSpec;

        let a = todo()
            .with_index(IndexSpec::new(["title"]))
            .with_index(IndexSpec::new(["id", "title"]).unique());
        let b = todo()
            .with_index(IndexSpec::new(["id", "title"]).unique())
            .with_index(IndexSpec::new(["title"]));

        let ha = hash_model(&NormalizedModel::empty().with_entity("Todo", a)).unwrap();
        let hb = hash_model(&NormalizedModel::empty().with_entity("Todo", b)).unwrap();
        assert_eq!(ha.hash, hb.hash);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = NormalizedModel::empty().with_entity("Todo", todo());
        let b = NormalizedModel::empty().with_entity(
            "Todo",
            todo().with_field("done", EntityField::required(FieldType::Boolean)),
        );
        assert_ne!(hash_model(&a).unwrap().hash, hash_model(&b).unwrap().hash);
    }

    #[test]
    fn test_short_hash() {
        let hash = ModelHash::empty();
        assert_eq!(hash.short(), "44136fa355b3");
        assert_eq!(hash, EMPTY_MODEL_HASH);
    }
}

//! Relations between entities.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// The shape of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// This entity holds a foreign key to the target.
    BelongsTo,
    /// The target holds a foreign key to this entity (one).
    HasOne,
    /// The target holds a foreign key to this entity (many).
    HasMany,
    /// Both sides are linked through a join table.
    ManyToMany,
}

impl RelationKind {
    /// Check if this is a "to-many" relation.
    pub fn is_to_many(&self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }

    /// Get the name used in entity declarations.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsTo => "belongsTo",
            Self::HasOne => "hasOne",
            Self::HasMany => "hasMany",
            Self::ManyToMany => "manyToMany",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved relation from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Relation shape.
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Target entity name.
    pub target: SmolStr,
    /// Join table for many-to-many relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<String>,
    /// Whether deleting the target cascades to this entity.
    #[serde(default)]
    pub cascade: bool,
    /// Foreign key field name (`belongsTo` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<SmolStr>,
}

impl Relation {
    /// Create a relation without a join table or foreign key.
    pub fn new(kind: RelationKind, target: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            target: target.into(),
            through: None,
            cascade: false,
            foreign_key: None,
        }
    }

    /// Create a `belongsTo` relation with its foreign key field.
    pub fn belongs_to(target: impl Into<SmolStr>, foreign_key: impl Into<SmolStr>) -> Self {
        Self {
            foreign_key: Some(foreign_key.into()),
            ..Self::new(RelationKind::BelongsTo, target)
        }
    }

    /// Set the join table.
    pub fn through(mut self, table: impl Into<String>) -> Self {
        self.through = Some(table.into());
        self
    }

    /// Enable cascade-on-delete.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// The conventional foreign key field name for a relation.
    pub fn default_foreign_key(relation_name: &str) -> SmolStr {
        SmolStr::new(format!("{relation_name}Id"))
    }
}

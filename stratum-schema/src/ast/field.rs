//! Field definitions for normalized entities.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{DefaultValue, FieldType};

/// A fully structured entity field.
///
/// `required` and `nullable` are always complementary; use [`EntityField::new`]
/// or [`EntityField::required`] / [`EntityField::optional`] to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityField {
    /// Column type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the column is NOT NULL.
    pub required: bool,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the column carries a UNIQUE constraint.
    #[serde(default)]
    pub unique: bool,
    /// Whether the column is indexed.
    #[serde(default)]
    pub indexed: bool,
    /// Column default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Allowed values for enum-typed fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Physical column name, when it differs from the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_column: Option<String>,
    /// Whether this field is (part of) the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Whether the value is generated by the database.
    #[serde(default)]
    pub generated: bool,
    /// Name of the `belongsTo` relation this field is the foreign key for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key_for: Option<SmolStr>,
}

impl EntityField {
    /// Create a field; `required` decides nullability.
    pub fn new(field_type: FieldType, required: bool) -> Self {
        Self {
            field_type,
            required,
            nullable: !required,
            unique: false,
            indexed: false,
            default: None,
            enum_values: None,
            db_column: None,
            primary: false,
            generated: false,
            foreign_key_for: None,
        }
    }

    /// Create a required (NOT NULL) field.
    pub fn required(field_type: FieldType) -> Self {
        Self::new(field_type, true)
    }

    /// Create an optional (nullable) field.
    pub fn optional(field_type: FieldType) -> Self {
        Self::new(field_type, false)
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as indexed.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Mark as primary key.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Restrict to a set of enum values.
    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the physical column name.
    pub fn with_db_column(mut self, column: impl Into<String>) -> Self {
        self.db_column = Some(column.into());
        self
    }

    /// Set required/nullable together.
    pub fn set_required(&mut self, required: bool) {
        self.required = required;
        self.nullable = !required;
    }

    /// The physical column name for a field called `name`.
    pub fn column_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.db_column.as_deref().unwrap_or(name)
    }

    /// Whether this field is a foreign key for some relation.
    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key_for.is_some()
    }
}

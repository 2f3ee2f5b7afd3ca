//! Normalization of raw entity declarations into a [`NormalizedModel`].
//!
//! Raw declarations come from an externally loaded configuration document.
//! Each field is either a structured object or a shorthand string such as
//! `"string! unique"`, `"User!"`, `"Tag[] through:post_tags"` or
//! `"enum[draft, published]"`.
//!
//! Normalization:
//! - parses shorthand into structured fields,
//! - turns capitalized entity names into inline relations,
//! - synthesizes `<relation>Id` foreign keys for `belongsTo`,
//! - lets explicit `relations:` entries override inline ones,
//! - lifts `indexed` fields into single-column indexes.
//!
//! Unknown type tokens become `string` in permissive mode (the default) and
//! are reported as [`SchemaError::UnknownType`] in strict mode.

use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::ast::{
    DefaultValue, EntityDefinition, EntityField, FieldType, IndexSpec, NormalizedModel, Relation,
    RelationKind,
};
use crate::error::{SchemaError, SchemaResult};
use crate::parser::{FieldSpec, Presence, SpecKind, parse_shorthand};

/// A raw entity map, as found in the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawModel {
    /// Entities by name, in document order.
    pub entities: IndexMap<String, RawEntity>,
}

impl RawModel {
    /// Parse raw declarations from a JSON document.
    pub fn from_json(content: &str) -> SchemaResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| SchemaError::config(format!("invalid entity document: {e}")))
    }
}

/// A raw entity declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEntity {
    /// Table name (defaults to the snake_case plural of the entity name).
    #[serde(default)]
    pub table: Option<String>,
    /// Fields by name.
    #[serde(default)]
    pub fields: IndexMap<String, RawField>,
    /// Explicit relations by name.
    #[serde(default)]
    pub relations: IndexMap<String, RawRelation>,
    /// Explicit indexes.
    #[serde(default)]
    pub indexes: Vec<RawIndex>,
}

/// A raw field: shorthand string or structured object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    /// Shorthand syntax.
    Shorthand(String),
    /// Structured definition.
    Structured(RawFieldDef),
}

/// A structured raw field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFieldDef {
    /// Type token.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Required flag.
    #[serde(default)]
    pub required: Option<bool>,
    /// Nullable flag.
    #[serde(default)]
    pub nullable: Option<bool>,
    /// Unique flag.
    #[serde(default)]
    pub unique: bool,
    /// Indexed flag.
    #[serde(default)]
    pub indexed: bool,
    /// Default value.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Enum values.
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    /// Physical column name.
    #[serde(default)]
    pub db_column: Option<String>,
    /// Primary key flag.
    #[serde(default)]
    pub primary: bool,
    /// Database-generated flag.
    #[serde(default)]
    pub generated: bool,
}

/// A raw explicit relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRelation {
    /// Relation shape.
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Target entity.
    #[serde(alias = "entity", alias = "model")]
    pub target: String,
    /// Join table.
    #[serde(default)]
    pub through: Option<String>,
    /// Cascade on delete.
    #[serde(default)]
    pub cascade: bool,
    /// Foreign key field name (`belongsTo` only).
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Whether a synthesized foreign key is NOT NULL.
    #[serde(default)]
    pub required: bool,
}

/// A raw index declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIndex {
    /// Indexed fields.
    pub fields: Vec<String>,
    /// Unique index.
    #[serde(default)]
    pub unique: bool,
    /// Explicit name.
    #[serde(default)]
    pub name: Option<String>,
}

/// How the normalizer treats unknown type tokens and modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Unknown types become `string`, unknown modifiers are ignored.
    #[default]
    Permissive,
    /// Unknown types and modifiers are errors.
    Strict,
}

/// Normalizes raw entity declarations.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    mode: NormalizeMode,
}

/// A relation derived from shorthand, before explicit overrides.
struct InlineRelation {
    relation: Relation,
    required: bool,
}

impl Normalizer {
    /// Create a permissive normalizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a strict normalizer.
    pub fn strict() -> Self {
        Self {
            mode: NormalizeMode::Strict,
        }
    }

    /// Create a normalizer with an explicit mode.
    pub fn with_mode(mode: NormalizeMode) -> Self {
        Self { mode }
    }

    /// The configured mode.
    pub fn mode(&self) -> NormalizeMode {
        self.mode
    }

    /// Normalize a raw model.
    pub fn normalize(&self, raw: &RawModel) -> SchemaResult<NormalizedModel> {
        let mut entities = IndexMap::with_capacity(raw.entities.len());
        for (name, entity) in &raw.entities {
            let definition = self.normalize_entity(raw, name, entity)?;
            entities.insert(SmolStr::new(name), definition);
        }
        debug!(entities = entities.len(), "normalized entity model");
        Ok(NormalizedModel::from_entities(entities))
    }

    fn normalize_entity(
        &self,
        raw: &RawModel,
        entity_name: &str,
        entity: &RawEntity,
    ) -> SchemaResult<EntityDefinition> {
        let is_entity = |name: &str| raw.entities.contains_key(name);
        let table = entity
            .table
            .clone()
            .unwrap_or_else(|| default_table_name(entity_name));

        let mut fields: IndexMap<SmolStr, EntityField> = IndexMap::new();
        let mut inline: IndexMap<SmolStr, InlineRelation> = IndexMap::new();

        for (field_name, raw_field) in &entity.fields {
            match raw_field {
                RawField::Shorthand(text) => {
                    let spec = parse_shorthand(text)
                        .map_err(|e| e.in_field(entity_name, field_name))?
                        .resolve_relations(is_entity);
                    match self.from_spec(entity_name, field_name, spec)? {
                        Normalized::Field(field) => {
                            fields.insert(SmolStr::new(field_name), field);
                        }
                        Normalized::Relation(rel) => {
                            inline.insert(SmolStr::new(field_name), rel);
                        }
                    }
                }
                RawField::Structured(def) => {
                    let field = self.from_structured(entity_name, field_name, def)?;
                    fields.insert(SmolStr::new(field_name), field);
                }
            }
        }

        // Explicit relations win over inline ones of the same name
        let mut relations: IndexMap<SmolStr, (Relation, bool)> = inline
            .into_iter()
            .map(|(name, r)| (name, (r.relation, r.required)))
            .collect();
        for (rel_name, raw_rel) in &entity.relations {
            if !is_entity(&raw_rel.target) {
                return Err(SchemaError::invalid_relation(
                    entity_name,
                    rel_name,
                    format!("unknown target entity `{}`", raw_rel.target),
                ));
            }
            let mut relation = Relation::new(raw_rel.kind, raw_rel.target.as_str());
            relation.through = raw_rel.through.clone();
            relation.cascade = raw_rel.cascade;
            if raw_rel.kind == RelationKind::BelongsTo {
                relation.foreign_key = Some(
                    raw_rel
                        .foreign_key
                        .as_deref()
                        .map(SmolStr::new)
                        .unwrap_or_else(|| Relation::default_foreign_key(rel_name)),
                );
            }
            if relations.contains_key(rel_name.as_str()) {
                debug!(entity = entity_name, relation = %rel_name, "explicit relation overrides inline declaration");
            }
            relations.insert(SmolStr::new(rel_name), (relation, raw_rel.required));
        }

        // Every belongsTo gets exactly one uuid foreign key field
        for (rel_name, (relation, required)) in &relations {
            let Some(fk) = &relation.foreign_key else {
                continue;
            };
            match fields.get_mut(fk) {
                Some(existing) => existing.foreign_key_for = Some(rel_name.clone()),
                None => {
                    let mut field = EntityField::new(FieldType::Uuid, *required).indexed();
                    field.foreign_key_for = Some(rel_name.clone());
                    fields.insert(fk.clone(), field);
                }
            }
        }

        if !fields.values().any(|f| f.primary)
            && let Some(id) = fields.get_mut("id")
        {
            id.primary = true;
        }

        let mut indexes = Vec::with_capacity(entity.indexes.len());
        for raw_index in &entity.indexes {
            for field in &raw_index.fields {
                if !fields.contains_key(field.as_str()) {
                    if self.mode == NormalizeMode::Strict {
                        return Err(SchemaError::invalid_field(
                            entity_name,
                            field,
                            "index references an unknown field",
                        ));
                    }
                    warn!(entity = entity_name, field = %field, "index references an unknown field");
                }
            }
            indexes.push(IndexSpec {
                fields: raw_index.fields.iter().map(SmolStr::new).collect(),
                unique: raw_index.unique,
                name: raw_index.name.clone(),
            });
        }
        for (name, field) in &fields {
            if field.indexed
                && !field.primary
                && !indexes
                    .iter()
                    .any(|i| i.fields.len() == 1 && i.fields[0] == *name)
            {
                indexes.push(IndexSpec::new([name.clone()]));
            }
        }

        Ok(EntityDefinition {
            table,
            fields,
            relations: relations.into_iter().map(|(n, (r, _))| (n, r)).collect(),
            indexes,
        })
    }

    fn from_spec(&self, entity: &str, field: &str, spec: FieldSpec) -> SchemaResult<Normalized> {
        let required = spec.presence.is_required();
        match &spec.kind {
            SpecKind::Relation { target, list } => {
                let kind = match (list, spec.presence) {
                    (true, _) if spec.modifier_value("through").is_some() => {
                        RelationKind::ManyToMany
                    }
                    (true, _) => RelationKind::HasMany,
                    (false, Presence::Required) => RelationKind::BelongsTo,
                    (false, _) => RelationKind::HasOne,
                };
                let mut relation = Relation::new(kind, target.clone());
                relation.through = spec.modifier_value("through").map(String::from);
                if kind == RelationKind::BelongsTo {
                    relation.foreign_key = Some(Relation::default_foreign_key(field));
                }
                for modifier in &spec.modifiers {
                    match modifier.key.as_str() {
                        "cascade" => relation.cascade = true,
                        "through" => {}
                        other => self.unknown_modifier(entity, field, other)?,
                    }
                }
                Ok(Normalized::Relation(InlineRelation { relation, required }))
            }
            SpecKind::Enum { values } => {
                let mut out =
                    EntityField::new(FieldType::String, required).with_enum_values(values.clone());
                self.apply_modifiers(entity, field, &spec, &mut out)?;
                Ok(Normalized::Field(out))
            }
            SpecKind::Scalar { token, list } => {
                let mut field_type = self.resolve_type(entity, field, token)?;
                if *list {
                    if self.mode == NormalizeMode::Strict {
                        return Err(SchemaError::invalid_field(
                            entity,
                            field,
                            format!("`{token}[]` is not a relation; scalar lists are not supported"),
                        ));
                    }
                    warn!(entity, field, token = %token, "scalar list stored as jsonb");
                    field_type = FieldType::Jsonb;
                }
                let mut out = EntityField::new(field_type, required);
                self.apply_modifiers(entity, field, &spec, &mut out)?;
                Ok(Normalized::Field(out))
            }
        }
    }

    fn apply_modifiers(
        &self,
        entity: &str,
        field: &str,
        spec: &FieldSpec,
        out: &mut EntityField,
    ) -> SchemaResult<()> {
        for modifier in &spec.modifiers {
            match modifier.key.as_str() {
                "unique" => out.unique = true,
                "index" | "indexed" => out.indexed = true,
                "primary" | "pk" | "id" => out.primary = true,
                "generated" => out.generated = true,
                "column" => out.db_column = modifier.value.clone(),
                other => self.unknown_modifier(entity, field, other)?,
            }
        }
        out.default = spec.default.as_deref().map(DefaultValue::parse);
        Ok(())
    }

    fn from_structured(
        &self,
        entity: &str,
        field: &str,
        def: &RawFieldDef,
    ) -> SchemaResult<EntityField> {
        let required = match (def.required, def.nullable) {
            (Some(true), Some(true)) | (Some(false), Some(false)) => {
                return Err(SchemaError::invalid_field(
                    entity,
                    field,
                    "`required` and `nullable` are mutually exclusive",
                ));
            }
            (Some(required), _) => required,
            (None, Some(nullable)) => !nullable,
            (None, None) => false,
        };

        let field_type = if def.field_type.eq_ignore_ascii_case("enum") {
            FieldType::String
        } else {
            self.resolve_type(entity, field, &def.field_type)?
        };

        Ok(EntityField {
            field_type,
            required,
            nullable: !required,
            unique: def.unique,
            indexed: def.indexed,
            default: def.default.as_ref().map(DefaultValue::from_json),
            enum_values: def.enum_values.clone(),
            db_column: def.db_column.clone(),
            primary: def.primary,
            generated: def.generated,
            foreign_key_for: None,
        })
    }

    fn resolve_type(&self, entity: &str, field: &str, token: &str) -> SchemaResult<FieldType> {
        match FieldType::from_token(token) {
            Some(ty) => Ok(ty),
            None if self.mode == NormalizeMode::Strict => {
                Err(SchemaError::unknown_type(entity, field, token))
            }
            None => {
                warn!(entity, field, token, "unknown type token, falling back to string");
                Ok(FieldType::String)
            }
        }
    }

    fn unknown_modifier(&self, entity: &str, field: &str, modifier: &str) -> SchemaResult<()> {
        if self.mode == NormalizeMode::Strict {
            return Err(SchemaError::unknown_modifier(entity, field, modifier));
        }
        warn!(entity, field, modifier, "ignoring unknown shorthand modifier");
        Ok(())
    }
}

enum Normalized {
    Field(EntityField),
    Relation(InlineRelation),
}

/// Normalize raw declarations with the permissive default.
pub fn normalize(raw: &RawModel) -> SchemaResult<NormalizedModel> {
    Normalizer::new().normalize(raw)
}

/// The default table for an entity: snake_case name plus `s`.
pub fn default_table_name(entity: &str) -> String {
    format!("{}s", entity.to_case(Case::Snake))
}

//! Model diffing for generating migrations.
//!
//! [`diff`] compares two normalized models and produces an ordered list of
//! [`DiffStep`]s. Steps carry full definitions (including the previous state
//! for drops and alterations) so they can be rendered to SQL in both
//! directions and replayed onto a model with [`apply_steps`].
//!
//! Step order within one diff:
//!
//! 1. new tables, each followed by its columns and indexes
//! 2. columns added to existing tables
//! 3. indexes added to existing tables
//! 4. foreign keys added
//! 5. column alterations
//! 6. foreign keys dropped
//! 7. indexes dropped
//! 8. columns dropped
//! 9. tables dropped
//!
//! Renames are not detected: a renamed field is an unrelated add/drop pair,
//! and a changed table name drops the old table and creates the new one.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use stratum_schema::normalize::default_table_name;
use stratum_schema::{EntityDefinition, EntityField, IndexSpec, NormalizedModel, Relation};

/// A single typed schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffStep {
    /// Create an (initially empty) table for an entity.
    AddTable {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
    },
    /// Drop an entity's table.
    DropTable {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// The dropped definition.
        previous: EntityDefinition,
    },
    /// Add a column.
    AddColumn {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Field name.
        field: SmolStr,
        /// New field definition.
        definition: EntityField,
    },
    /// Drop a column.
    DropColumn {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Field name.
        field: SmolStr,
        /// The dropped field definition.
        previous: EntityField,
    },
    /// Change a column's type, nullability, default or constraints.
    AlterColumn {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Field name.
        field: SmolStr,
        /// Definition before the change.
        before: EntityField,
        /// Definition after the change.
        after: EntityField,
    },
    /// Create an index.
    AddIndex {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Resolved index name.
        name: String,
        /// Physical column names.
        columns: Vec<String>,
        /// Index definition.
        index: IndexSpec,
    },
    /// Drop an index.
    DropIndex {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Resolved index name.
        name: String,
        /// Physical column names.
        columns: Vec<String>,
        /// Index definition.
        index: IndexSpec,
    },
    /// Add a relation (a foreign key constraint for `belongsTo`).
    AddForeignKey {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Relation name.
        relation: SmolStr,
        /// Relation definition.
        definition: Relation,
        /// Physical foreign key column, for `belongsTo`.
        column: Option<String>,
        /// Table backing the target entity.
        target_table: String,
    },
    /// Drop a relation.
    DropForeignKey {
        /// Entity name.
        entity: SmolStr,
        /// Table name.
        table: String,
        /// Relation name.
        relation: SmolStr,
        /// The dropped relation definition.
        definition: Relation,
        /// Physical foreign key column, for `belongsTo`.
        column: Option<String>,
        /// Table backing the target entity.
        target_table: String,
    },
}

impl DiffStep {
    /// The snake_case step kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddTable { .. } => "add_table",
            Self::DropTable { .. } => "drop_table",
            Self::AddColumn { .. } => "add_column",
            Self::DropColumn { .. } => "drop_column",
            Self::AlterColumn { .. } => "alter_column",
            Self::AddIndex { .. } => "add_index",
            Self::DropIndex { .. } => "drop_index",
            Self::AddForeignKey { .. } => "add_foreign_key",
            Self::DropForeignKey { .. } => "drop_foreign_key",
        }
    }

    /// The entity this step changes.
    pub fn entity(&self) -> &str {
        match self {
            Self::AddTable { entity, .. }
            | Self::DropTable { entity, .. }
            | Self::AddColumn { entity, .. }
            | Self::DropColumn { entity, .. }
            | Self::AlterColumn { entity, .. }
            | Self::AddIndex { entity, .. }
            | Self::DropIndex { entity, .. }
            | Self::AddForeignKey { entity, .. }
            | Self::DropForeignKey { entity, .. } => entity,
        }
    }

    /// The table this step changes.
    pub fn table(&self) -> &str {
        match self {
            Self::AddTable { table, .. }
            | Self::DropTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::DropForeignKey { table, .. } => table,
        }
    }

    /// Whether the step only adds structure.
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            Self::AddTable { .. }
                | Self::AddColumn { .. }
                | Self::AddIndex { .. }
                | Self::AddForeignKey { .. }
        )
    }

    /// Whether the step can lose data.
    ///
    /// Dropping a table or column is destructive, as is an alteration that
    /// narrows a column: a type change outside `string -> text` and
    /// `integer <-> number`, nullable to required, or removed enum values.
    pub fn is_destructive(&self) -> bool {
        match self {
            Self::DropTable { .. } | Self::DropColumn { .. } => true,
            Self::AlterColumn { before, after, .. } => is_narrowing(before, after),
            _ => false,
        }
    }
}

impl fmt::Display for DiffStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTable { table, .. } | Self::DropTable { table, .. } => {
                write!(f, "{} {}", self.kind(), table)
            }
            Self::AddColumn { table, field, .. }
            | Self::DropColumn { table, field, .. }
            | Self::AlterColumn { table, field, .. } => {
                write!(f, "{} {}.{}", self.kind(), table, field)
            }
            Self::AddIndex { name, .. } | Self::DropIndex { name, .. } => {
                write!(f, "{} {}", self.kind(), name)
            }
            Self::AddForeignKey { table, relation, .. }
            | Self::DropForeignKey { table, relation, .. } => {
                write!(f, "{} {}.{}", self.kind(), table, relation)
            }
        }
    }
}

/// Whether changing a column from `before` to `after` can lose data.
pub fn is_narrowing(before: &EntityField, after: &EntityField) -> bool {
    if !before.field_type.widens_to(after.field_type) {
        return true;
    }
    if before.nullable && after.required {
        return true;
    }
    match (&before.enum_values, &after.enum_values) {
        (Some(old), Some(new)) => old.iter().any(|v| !new.contains(v)),
        (None, Some(_)) => true,
        _ => false,
    }
}

/// An ordered diff between two models.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDiff {
    /// Steps in execution order.
    pub steps: Vec<DiffStep>,
}

impl ModelDiff {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether any step can lose data.
    pub fn has_destructive(&self) -> bool {
        self.steps.iter().any(DiffStep::is_destructive)
    }

    /// The steps that can lose data.
    pub fn destructive_steps(&self) -> impl Iterator<Item = &DiffStep> {
        self.steps.iter().filter(|s| s.is_destructive())
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        summary(&self.steps)
    }
}

/// Summarize steps as counts per kind, e.g. `"1 add_table, 3 add_column"`.
pub fn summary(steps: &[DiffStep]) -> String {
    let mut counts: IndexMap<&'static str, usize> = IndexMap::new();
    for step in steps {
        *counts.entry(step.kind()).or_default() += 1;
    }

    if counts.is_empty() {
        "No changes".to_string()
    } else {
        counts
            .iter()
            .map(|(kind, n)| format!("{n} {kind}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Model differ for comparing a source model against a target.
pub struct ModelDiffer<'a> {
    /// Source model (current recorded state).
    source: Option<&'a NormalizedModel>,
    /// Target model (desired state).
    target: &'a NormalizedModel,
}

impl<'a> ModelDiffer<'a> {
    /// Create a new differ with only the target model.
    pub fn new(target: &'a NormalizedModel) -> Self {
        Self {
            source: None,
            target,
        }
    }

    /// Set the source model.
    pub fn with_source(mut self, source: &'a NormalizedModel) -> Self {
        self.source = Some(source);
        self
    }

    /// Compute the diff.
    pub fn diff(&self) -> ModelDiff {
        let empty = NormalizedModel::empty();
        ModelDiff {
            steps: diff(self.source.unwrap_or(&empty), self.target),
        }
    }
}

#[derive(Default)]
struct Phases {
    new_tables: Vec<DiffStep>,
    add_columns: Vec<DiffStep>,
    add_indexes: Vec<DiffStep>,
    add_foreign_keys: Vec<DiffStep>,
    alter_columns: Vec<DiffStep>,
    drop_foreign_keys: Vec<DiffStep>,
    drop_indexes: Vec<DiffStep>,
    drop_columns: Vec<DiffStep>,
    drop_tables: Vec<DiffStep>,
}

impl Phases {
    fn into_steps(self) -> Vec<DiffStep> {
        [
            self.new_tables,
            self.add_columns,
            self.add_indexes,
            self.add_foreign_keys,
            self.alter_columns,
            self.drop_foreign_keys,
            self.drop_indexes,
            self.drop_columns,
            self.drop_tables,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Compute the ordered steps that turn `from` into `to`.
pub fn diff(from: &NormalizedModel, to: &NormalizedModel) -> Vec<DiffStep> {
    let mut phases = Phases::default();

    for (name, target) in to.entities() {
        match from.entity(name) {
            Some(source) if source.table == target.table => {
                diff_entity(&mut phases, from, to, name, source, target);
            }
            Some(source) => {
                create_entity(&mut phases, to, name, target);
                phases.drop_tables.push(drop_table(name, source));
            }
            None => create_entity(&mut phases, to, name, target),
        }
    }

    for (name, source) in from.entities() {
        if !to.contains(name) {
            phases.drop_tables.push(drop_table(name, source));
        }
    }

    phases.into_steps()
}

fn drop_table(name: &str, source: &EntityDefinition) -> DiffStep {
    DiffStep::DropTable {
        entity: SmolStr::new(name),
        table: source.table.clone(),
        previous: source.clone(),
    }
}

fn create_entity(phases: &mut Phases, model: &NormalizedModel, name: &str, entity: &EntityDefinition) {
    let entity_name = SmolStr::new(name);
    phases.new_tables.push(DiffStep::AddTable {
        entity: entity_name.clone(),
        table: entity.table.clone(),
    });
    for (field, definition) in &entity.fields {
        phases.new_tables.push(DiffStep::AddColumn {
            entity: entity_name.clone(),
            table: entity.table.clone(),
            field: field.clone(),
            definition: definition.clone(),
        });
    }
    for index in &entity.indexes {
        phases.new_tables.push(index_step(true, name, entity, index));
    }
    for (relation, definition) in &entity.relations {
        phases
            .add_foreign_keys
            .push(relation_step(true, model, name, entity, relation, definition));
    }
}

fn diff_entity(
    phases: &mut Phases,
    from: &NormalizedModel,
    to: &NormalizedModel,
    name: &str,
    source: &EntityDefinition,
    target: &EntityDefinition,
) {
    let entity_name = SmolStr::new(name);
    let table = &target.table;

    for (field, after) in &target.fields {
        match source.fields.get(field) {
            None => phases.add_columns.push(DiffStep::AddColumn {
                entity: entity_name.clone(),
                table: table.clone(),
                field: field.clone(),
                definition: after.clone(),
            }),
            Some(before) if before != after => phases.alter_columns.push(DiffStep::AlterColumn {
                entity: entity_name.clone(),
                table: table.clone(),
                field: field.clone(),
                before: before.clone(),
                after: after.clone(),
            }),
            Some(_) => {}
        }
    }
    for (field, before) in &source.fields {
        if !target.fields.contains_key(field) {
            phases.drop_columns.push(DiffStep::DropColumn {
                entity: entity_name.clone(),
                table: table.clone(),
                field: field.clone(),
                previous: before.clone(),
            });
        }
    }

    for index in &target.indexes {
        if !source.indexes.contains(index) {
            phases.add_indexes.push(index_step(true, name, target, index));
        }
    }
    for index in &source.indexes {
        if !target.indexes.contains(index) {
            phases.drop_indexes.push(index_step(false, name, source, index));
        }
    }

    for (relation, after) in &target.relations {
        let added = relation_step(true, to, name, target, relation, after);
        match source.relations.get(relation) {
            None => phases.add_foreign_keys.push(added),
            Some(before) => {
                let dropped = relation_step(false, from, name, source, relation, before);
                if !same_relation(&added, &dropped) {
                    phases.add_foreign_keys.push(added);
                    phases.drop_foreign_keys.push(dropped);
                }
            }
        }
    }
    for (relation, before) in &source.relations {
        if !target.relations.contains_key(relation) {
            phases
                .drop_foreign_keys
                .push(relation_step(false, from, name, source, relation, before));
        }
    }
}

fn same_relation(added: &DiffStep, dropped: &DiffStep) -> bool {
    match (added, dropped) {
        (
            DiffStep::AddForeignKey {
                definition: a,
                column: ca,
                target_table: ta,
                ..
            },
            DiffStep::DropForeignKey {
                definition: b,
                column: cb,
                target_table: tb,
                ..
            },
        ) => a == b && ca == cb && ta == tb,
        _ => false,
    }
}

fn index_step(add: bool, name: &str, entity: &EntityDefinition, index: &IndexSpec) -> DiffStep {
    let columns: Vec<String> = index
        .fields
        .iter()
        .map(|f| entity.column_name(f).to_string())
        .collect();
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let index_name = index.resolved_name(&entity.table, &column_refs);

    let entity_name = SmolStr::new(name);
    let table = entity.table.clone();
    if add {
        DiffStep::AddIndex {
            entity: entity_name,
            table,
            name: index_name,
            columns,
            index: index.clone(),
        }
    } else {
        DiffStep::DropIndex {
            entity: entity_name,
            table,
            name: index_name,
            columns,
            index: index.clone(),
        }
    }
}

fn relation_step(
    add: bool,
    model: &NormalizedModel,
    name: &str,
    entity: &EntityDefinition,
    relation: &SmolStr,
    definition: &Relation,
) -> DiffStep {
    let target_table = model
        .entity(&definition.target)
        .map(|e| e.table.clone())
        .unwrap_or_else(|| default_table_name(&definition.target));
    let column = definition
        .foreign_key
        .as_deref()
        .map(|fk| entity.column_name(fk).to_string());

    let entity_name = SmolStr::new(name);
    let table = entity.table.clone();
    if add {
        DiffStep::AddForeignKey {
            entity: entity_name,
            table,
            relation: relation.clone(),
            definition: definition.clone(),
            column,
            target_table,
        }
    } else {
        DiffStep::DropForeignKey {
            entity: entity_name,
            table,
            relation: relation.clone(),
            definition: definition.clone(),
            column,
            target_table,
        }
    }
}

/// Replay steps onto a model, returning the resulting model.
///
/// This is the inverse view of [`diff`]: for any two models,
/// `apply_steps(from, &diff(from, to))` hashes equal to `to`.
pub fn apply_steps(model: &NormalizedModel, steps: &[DiffStep]) -> NormalizedModel {
    let mut entities = model.clone().into_entities();

    for step in steps {
        match step {
            DiffStep::AddTable { entity, table } => {
                entities.insert(entity.clone(), EntityDefinition::new(table.clone()));
            }
            DiffStep::DropTable { entity, table, .. } => {
                if entities.get(entity).is_some_and(|e| &e.table == table) {
                    entities.shift_remove(entity);
                }
            }
            DiffStep::AddColumn {
                entity,
                field,
                definition,
                ..
            } => {
                if let Some(e) = entities.get_mut(entity) {
                    e.fields.insert(field.clone(), definition.clone());
                }
            }
            DiffStep::DropColumn { entity, field, .. } => {
                if let Some(e) = entities.get_mut(entity) {
                    e.fields.shift_remove(field);
                }
            }
            DiffStep::AlterColumn {
                entity,
                field,
                after,
                ..
            } => {
                if let Some(e) = entities.get_mut(entity) {
                    e.fields.insert(field.clone(), after.clone());
                }
            }
            DiffStep::AddIndex { entity, index, .. } => {
                if let Some(e) = entities.get_mut(entity)
                    && !e.indexes.contains(index)
                {
                    e.indexes.push(index.clone());
                }
            }
            DiffStep::DropIndex { entity, index, .. } => {
                if let Some(e) = entities.get_mut(entity) {
                    e.indexes.retain(|i| i != index);
                }
            }
            DiffStep::AddForeignKey {
                entity,
                relation,
                definition,
                ..
            } => {
                if let Some(e) = entities.get_mut(entity) {
                    e.relations.insert(relation.clone(), definition.clone());
                }
            }
            DiffStep::DropForeignKey {
                entity,
                relation,
                definition,
                ..
            } => {
                // A changed relation is added before the old one is dropped
                if let Some(e) = entities.get_mut(entity)
                    && e.relations.get(relation) == Some(definition)
                {
                    e.relations.shift_remove(relation);
                }
            }
        }
    }

    NormalizedModel::from_entities(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stratum_schema::{DefaultValue, FieldType, RelationKind, hash_model};

    fn todo() -> EntityDefinition {
        EntityDefinition::new("todos")
            .with_field("id", EntityField::required(FieldType::Uuid).primary())
            .with_field("title", EntityField::required(FieldType::String))
            .with_field(
                "completed",
                EntityField::required(FieldType::Boolean).with_default(DefaultValue::Bool(false)),
            )
    }

    fn blog() -> NormalizedModel {
        NormalizedModel::empty()
            .with_entity(
                "User",
                EntityDefinition::new("users")
                    .with_field("id", EntityField::required(FieldType::Uuid).primary())
                    .with_field("email", EntityField::required(FieldType::String).unique())
                    .with_field("legacy", EntityField::optional(FieldType::Text)),
            )
            .with_entity(
                "Post",
                EntityDefinition::new("posts")
                    .with_field("id", EntityField::required(FieldType::Uuid).primary())
                    .with_field("authorId", EntityField::required(FieldType::Uuid).indexed())
                    .with_relation("author", Relation::belongs_to("User", "authorId"))
                    .with_index(IndexSpec::new(["authorId"])),
            )
    }

    fn kinds(steps: &[DiffStep]) -> Vec<&'static str> {
        steps.iter().map(DiffStep::kind).collect()
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let model = blog();
        assert!(diff(&model, &model).is_empty());
        assert!(ModelDiffer::new(&model).with_source(&model).diff().is_empty());
    }

    #[test]
    fn test_diff_new_table() {
        let to = NormalizedModel::empty().with_entity("Todo", todo());
        let steps = diff(&NormalizedModel::empty(), &to);

        assert_eq!(
            kinds(&steps),
            vec!["add_table", "add_column", "add_column", "add_column"]
        );
        assert_eq!(steps[0].table(), "todos");
        assert!(steps.iter().all(DiffStep::is_additive));
    }

    #[test]
    fn test_diff_new_table_with_relation_and_index() {
        let steps = diff(&NormalizedModel::empty(), &blog());
        assert_eq!(
            kinds(&steps),
            vec![
                "add_table",
                "add_column",
                "add_column",
                "add_column",
                "add_table",
                "add_column",
                "add_column",
                "add_index",
                "add_foreign_key",
            ]
        );

        match &steps[8] {
            DiffStep::AddForeignKey {
                column,
                target_table,
                definition,
                ..
            } => {
                assert_eq!(column.as_deref(), Some("authorId"));
                assert_eq!(target_table, "users");
                assert_eq!(definition.kind, RelationKind::BelongsTo);
            }
            other => panic!("expected add_foreign_key, got {other:?}"),
        }
    }

    #[test]
    fn test_diff_drop_table() {
        let from = blog();
        let to = NormalizedModel::empty().with_entity("User", from.entity("User").unwrap().clone());
        let steps = diff(&from, &to);

        assert_eq!(kinds(&steps), vec!["drop_table"]);
        assert!(steps[0].is_destructive());
        match &steps[0] {
            DiffStep::DropTable { previous, .. } => assert_eq!(previous.table, "posts"),
            other => panic!("expected drop_table, got {other:?}"),
        }
    }

    #[test]
    fn test_diff_column_changes() {
        let from = blog();
        let user = from
            .entity("User")
            .unwrap()
            .clone()
            .with_field("name", EntityField::optional(FieldType::Text));
        let mut user = user;
        user.fields.shift_remove("legacy");
        user.fields
            .insert("email".into(), EntityField::required(FieldType::Text).unique());
        let to = from.clone().with_entity("User", user);

        let steps = diff(&from, &to);
        assert_eq!(kinds(&steps), vec!["add_column", "alter_column", "drop_column"]);
        assert!(!steps[1].is_destructive(), "string -> text widens");
        assert!(steps[2].is_destructive());
    }

    #[test]
    fn test_field_rename_is_add_and_drop() {
        let from = NormalizedModel::empty().with_entity("Todo", todo());
        let mut renamed = todo();
        let title = renamed.fields.shift_remove("title").unwrap();
        renamed.fields.insert("name".into(), title);
        let to = NormalizedModel::empty().with_entity("Todo", renamed);

        assert_eq!(kinds(&diff(&from, &to)), vec!["add_column", "drop_column"]);
    }

    #[test]
    fn test_table_rename_is_drop_and_add() {
        let from = NormalizedModel::empty().with_entity("Todo", todo());
        let mut moved = todo();
        moved.table = "tasks".to_string();
        let to = NormalizedModel::empty().with_entity("Todo", moved);

        let steps = diff(&from, &to);
        assert_eq!(steps.first().map(DiffStep::kind), Some("add_table"));
        assert_eq!(steps.last().map(DiffStep::kind), Some("drop_table"));
        assert_eq!(steps.last().unwrap().table(), "todos");
    }

    #[test]
    fn test_changed_relation_is_drop_and_add() {
        let from = blog();
        let post = from
            .entity("Post")
            .unwrap()
            .clone()
            .with_relation("author", Relation::belongs_to("User", "authorId").cascade());
        let to = from.clone().with_entity("Post", post);

        assert_eq!(
            kinds(&diff(&from, &to)),
            vec!["add_foreign_key", "drop_foreign_key"]
        );
    }

    #[test]
    fn test_additive_before_destructive() {
        let from = blog();
        let mut user = from.entity("User").unwrap().clone();
        user.fields.shift_remove("legacy");
        let user = user.with_field("bio", EntityField::optional(FieldType::Text));
        let mut post = from.entity("Post").unwrap().clone();
        post.indexes.clear();
        let post = post.with_index(IndexSpec::new(["id", "authorId"]).unique());
        let to = NormalizedModel::empty()
            .with_entity("User", user)
            .with_entity("Post", post)
            .with_entity("Todo", todo());

        let steps = diff(&from, &to);
        let last_additive = steps.iter().rposition(DiffStep::is_additive).unwrap();
        let first_removal = steps
            .iter()
            .position(|s| s.is_destructive() || s.kind().starts_with("drop"))
            .unwrap();
        assert!(last_additive < first_removal);
    }

    #[test]
    fn test_narrowing_alterations() {
        let text = EntityField::optional(FieldType::Text);
        assert!(!is_narrowing(&EntityField::optional(FieldType::String), &text));
        assert!(is_narrowing(&text, &EntityField::optional(FieldType::String)));
        assert!(is_narrowing(&text, &EntityField::required(FieldType::Text)));
        assert!(!is_narrowing(
            &EntityField::required(FieldType::Integer),
            &EntityField::optional(FieldType::Number)
        ));

        let two = EntityField::required(FieldType::String).with_enum_values(["a", "b"]);
        let three = EntityField::required(FieldType::String).with_enum_values(["a", "b", "c"]);
        assert!(!is_narrowing(&two, &three));
        assert!(is_narrowing(&three, &two));
    }

    #[test]
    fn test_apply_steps_reaches_target_hash() {
        let from = blog();
        let mut user = from.entity("User").unwrap().clone();
        user.fields.shift_remove("legacy");
        user.table = "accounts".to_string();
        let post = from
            .entity("Post")
            .unwrap()
            .clone()
            .with_relation("author", Relation::belongs_to("User", "authorId").cascade())
            .with_index(IndexSpec::new(["id"]).unique());
        let to = NormalizedModel::empty()
            .with_entity("Todo", todo())
            .with_entity("Post", post)
            .with_entity("User", user);

        let replayed = apply_steps(&from, &diff(&from, &to));
        assert_eq!(
            hash_model(&replayed).unwrap().hash,
            hash_model(&to).unwrap().hash
        );
    }

    #[test]
    fn test_summary() {
        let steps = diff(
            &NormalizedModel::empty(),
            &NormalizedModel::empty().with_entity("Todo", todo()),
        );
        assert_eq!(summary(&steps), "1 add_table, 3 add_column");
        assert_eq!(summary(&[]), "No changes");
    }

    #[test]
    fn test_step_serde_tag() {
        let step = DiffStep::AddTable {
            entity: "Todo".into(),
            table: "todos".into(),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "add_table");
        let back: DiffStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}

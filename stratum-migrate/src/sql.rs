//! SQL generation for migrations (PostgreSQL dialect).
//!
//! Each [`DiffStep`] renders to one or more statements. Rendered scripts
//! separate statements with a blank line; [`split_statements`] is the
//! inverse used by the applier. Hand-written scripts go through
//! [`split_script`] instead.

use stratum_schema::{EntityDefinition, EntityField, FieldType, RelationKind, sha256_hex};

use crate::diff::DiffStep;

/// Prefix of the down-script placeholder for steps with no safe inverse.
pub const MANUAL_INTERVENTION: &str = "-- MANUAL INTERVENTION REQUIRED";

/// Rendered up/down scripts for a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSql {
    /// SQL to apply the migration.
    pub up: String,
    /// SQL to rollback the migration.
    pub down: String,
    /// Whether every step has a mechanical inverse.
    pub reversible: bool,
}

impl MigrationSql {
    /// Hand-authored SQL for a data or custom migration.
    ///
    /// Without a down script the migration is irreversible and the down
    /// script is the manual-intervention placeholder.
    pub fn custom(up: impl Into<String>, down: Option<String>) -> Self {
        match down {
            Some(down) => Self {
                up: up.into(),
                down,
                reversible: true,
            },
            None => Self {
                up: up.into(),
                down: format!("{MANUAL_INTERVENTION}: custom migration has no down script"),
                reversible: false,
            },
        }
    }

    /// Check if the migration is empty.
    pub fn is_empty(&self) -> bool {
        split_statements(&self.up).is_empty()
    }

    /// Checksum over the up script.
    pub fn checksum(&self) -> String {
        checksum(&self.up)
    }
}

/// SHA-256 hex checksum of a rendered script.
pub fn checksum(sql: &str) -> String {
    sha256_hex(sql.as_bytes())
}

/// Split a rendered script into executable statements.
///
/// Statements are separated by blank lines. Blocks that only contain `--`
/// comments are skipped.
pub fn split_statements(script: &str) -> Vec<String> {
    script
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|block| {
            !block.is_empty() && !block.lines().all(|l| l.trim_start().starts_with("--"))
        })
        .map(String::from)
        .collect()
}

/// Split a hand-written script on `;`.
///
/// Semicolons inside string literals, quoted identifiers, dollar-quoted
/// bodies and comments do not end a statement. Comment-only trailing text is
/// dropped; a final statement without `;` is kept.
pub fn split_script(script: &str) -> Vec<String> {
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                has_code = true;
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = script[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |end| i + 2 + end + 1);
            }
            b'$' => {
                has_code = true;
                if let Some(tag) = dollar_tag(&script[i..]) {
                    let body = i + tag.len();
                    i = script[body..]
                        .find(tag)
                        .map_or(bytes.len(), |end| body + end + tag.len() - 1);
                }
            }
            b';' => {
                if has_code {
                    statements.push(script[start..=i].trim().to_string());
                }
                start = i + 1;
                has_code = false;
            }
            b if !b.is_ascii_whitespace() => has_code = true,
            _ => {}
        }
        i += 1;
    }

    if has_code {
        statements.push(script[start..].trim().to_string());
    }
    statements
}

/// The `$tag$` opening a dollar-quoted body at the start of `s`, if any.
/// Positional parameters like `$1` are not tags.
fn dollar_tag(s: &str) -> Option<&str> {
    let end = s[1..].find('$')?;
    let tag = &s[1..=end];
    let valid = tag
        .chars()
        .next()
        .is_none_or(|c| c.is_ascii_alphabetic() || c == '_')
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| &s[..end + 2])
}

/// Quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Foreign key constraint name: `<table>_<column>_<target>[_cascade]_fkey`.
pub fn foreign_key_name(table: &str, column: &str, target_table: &str, cascade: bool) -> String {
    let cascade = if cascade { "_cascade" } else { "" };
    format!("{table}_{column}_{target_table}{cascade}_fkey")
}

/// SQL generator for PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresSqlGenerator {
    string_length: u32,
}

impl Default for PostgresSqlGenerator {
    fn default() -> Self {
        Self { string_length: 255 }
    }
}

impl PostgresSqlGenerator {
    /// Create a generator with `VARCHAR(255)` strings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `VARCHAR` length used for `string` fields.
    pub fn with_string_length(mut self, length: u32) -> Self {
        self.string_length = length;
        self
    }

    /// Generate up/down SQL for a list of steps.
    pub fn generate(&self, steps: &[DiffStep]) -> MigrationSql {
        let mut up = Vec::new();
        let mut down_groups = Vec::new();
        let mut reversible = true;

        let mut i = 0;
        while i < steps.len() {
            if let DiffStep::AddTable { entity, table } = &steps[i] {
                // Fold the table's column steps into one CREATE TABLE
                let mut columns = Vec::new();
                let mut j = i + 1;
                while let Some(DiffStep::AddColumn {
                    entity: e,
                    table: t,
                    field,
                    definition,
                }) = steps.get(j)
                {
                    if e != entity || t != table {
                        break;
                    }
                    columns.push((field.as_str(), definition));
                    j += 1;
                }
                up.push(self.create_table(table, &columns));
                down_groups.push(vec![self.drop_table(table)]);
                i = j;
                continue;
            }

            let step = &steps[i];
            up.extend(self.render_step(step));
            match self.inverse(step) {
                Some(stmts) => down_groups.push(stmts),
                None => {
                    reversible = false;
                    down_groups.push(vec![format!(
                        "{MANUAL_INTERVENTION}: cannot reverse {step}"
                    )]);
                }
            }
            i += 1;
        }

        let down: Vec<String> = down_groups.into_iter().rev().flatten().collect();

        MigrationSql {
            up: up.join("\n\n"),
            down: down.join("\n\n"),
            reversible,
        }
    }

    /// Render one step as up statements.
    pub fn render_step(&self, step: &DiffStep) -> Vec<String> {
        match step {
            DiffStep::AddTable { table, .. } => vec![self.create_table(table, &[])],
            DiffStep::DropTable { table, .. } => vec![self.drop_table(table)],
            DiffStep::AddColumn {
                table,
                field,
                definition,
                ..
            } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                quote_ident(table),
                self.column_definition(definition.column_name(field), definition, true)
            )],
            DiffStep::DropColumn {
                table,
                field,
                previous,
                ..
            } => vec![format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                quote_ident(table),
                quote_ident(previous.column_name(field))
            )],
            DiffStep::AlterColumn {
                table,
                field,
                before,
                after,
                ..
            } => self.alter_column(table, field, before, after),
            DiffStep::AddIndex {
                table,
                name,
                columns,
                index,
                ..
            } => vec![self.create_index(table, name, columns, index.unique)],
            DiffStep::DropIndex { name, .. } => vec![self.drop_index(name)],
            DiffStep::AddForeignKey {
                table,
                relation,
                definition,
                column,
                target_table,
                ..
            } => match (definition.kind, column) {
                (RelationKind::BelongsTo, Some(column)) => vec![format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}{};",
                    quote_ident(table),
                    quote_ident(&foreign_key_name(
                        table,
                        column,
                        target_table,
                        definition.cascade
                    )),
                    quote_ident(column),
                    quote_ident(target_table),
                    if definition.cascade {
                        " ON DELETE CASCADE"
                    } else {
                        ""
                    }
                )],
                _ => vec![format!(
                    "-- {} relation {}.{} -> {} (no constraint)",
                    definition.kind, table, relation, target_table
                )],
            },
            DiffStep::DropForeignKey {
                table,
                relation,
                definition,
                column,
                target_table,
                ..
            } => match (definition.kind, column) {
                (RelationKind::BelongsTo, Some(column)) => vec![format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                    quote_ident(table),
                    quote_ident(&foreign_key_name(
                        table,
                        column,
                        target_table,
                        definition.cascade
                    ))
                )],
                _ => vec![format!(
                    "-- {} relation {}.{} -> {} removed (no constraint)",
                    definition.kind, table, relation, target_table
                )],
            },
        }
    }

    /// Statements that undo `step`, or `None` when no safe inverse exists.
    fn inverse(&self, step: &DiffStep) -> Option<Vec<String>> {
        let inverse = match step {
            DiffStep::AddTable { table, .. } => vec![self.drop_table(table)],
            DiffStep::DropTable { previous, .. } => self.recreate_table(previous),
            DiffStep::AddColumn {
                entity,
                table,
                field,
                definition,
            } => self.render_step(&DiffStep::DropColumn {
                entity: entity.clone(),
                table: table.clone(),
                field: field.clone(),
                previous: definition.clone(),
            }),
            DiffStep::DropColumn {
                entity,
                table,
                field,
                previous,
            } => self.render_step(&DiffStep::AddColumn {
                entity: entity.clone(),
                table: table.clone(),
                field: field.clone(),
                definition: previous.clone(),
            }),
            DiffStep::AlterColumn { .. } if step.is_destructive() => return None,
            DiffStep::AlterColumn {
                table,
                field,
                before,
                after,
                ..
            } => self.alter_column(table, field, after, before),
            DiffStep::AddIndex {
                entity,
                table,
                name,
                columns,
                index,
            } => self.render_step(&DiffStep::DropIndex {
                entity: entity.clone(),
                table: table.clone(),
                name: name.clone(),
                columns: columns.clone(),
                index: index.clone(),
            }),
            DiffStep::DropIndex {
                entity,
                table,
                name,
                columns,
                index,
            } => self.render_step(&DiffStep::AddIndex {
                entity: entity.clone(),
                table: table.clone(),
                name: name.clone(),
                columns: columns.clone(),
                index: index.clone(),
            }),
            DiffStep::AddForeignKey {
                entity,
                table,
                relation,
                definition,
                column,
                target_table,
            } => self.render_step(&DiffStep::DropForeignKey {
                entity: entity.clone(),
                table: table.clone(),
                relation: relation.clone(),
                definition: definition.clone(),
                column: column.clone(),
                target_table: target_table.clone(),
            }),
            DiffStep::DropForeignKey {
                entity,
                table,
                relation,
                definition,
                column,
                target_table,
            } => self.render_step(&DiffStep::AddForeignKey {
                entity: entity.clone(),
                table: table.clone(),
                relation: relation.clone(),
                definition: definition.clone(),
                column: column.clone(),
                target_table: target_table.clone(),
            }),
        };
        Some(inverse)
    }

    /// Get the SQL column type for a field.
    pub fn sql_type(&self, field: &EntityField) -> String {
        match field.field_type {
            FieldType::Uuid => "UUID".to_string(),
            FieldType::String => format!("VARCHAR({})", self.string_length),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Number | FieldType::Integer if field.generated => "SERIAL".to_string(),
            FieldType::Number | FieldType::Integer => "INTEGER".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Timestamp => "TIMESTAMP".to_string(),
            FieldType::Jsonb => "JSONB".to_string(),
        }
    }

    /// Generate a column definition.
    ///
    /// Modifier order: type, `NOT NULL`, `UNIQUE`, `DEFAULT`, `PRIMARY KEY`,
    /// then the enum `CHECK`.
    fn column_definition(&self, column: &str, field: &EntityField, inline_pk: bool) -> String {
        let mut parts = vec![quote_ident(column), self.sql_type(field)];

        if field.required {
            parts.push("NOT NULL".to_string());
        }

        if field.unique && !field.primary {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = self.default_expr(field) {
            parts.push(format!("DEFAULT {}", default));
        }

        if field.primary && inline_pk {
            parts.push("PRIMARY KEY".to_string());
        }

        if let Some(check) = enum_check(column, field) {
            parts.push(check);
        }

        parts.join(" ")
    }

    fn default_expr(&self, field: &EntityField) -> Option<String> {
        match &field.default {
            Some(default) => Some(default.to_sql()),
            None if field.generated => match field.field_type {
                FieldType::Uuid => Some("gen_random_uuid()".to_string()),
                FieldType::Timestamp => Some("CURRENT_TIMESTAMP".to_string()),
                _ => None,
            },
            None => None,
        }
    }

    /// Generate CREATE TABLE statement.
    fn create_table(&self, table: &str, columns: &[(&str, &EntityField)]) -> String {
        if columns.is_empty() {
            return format!("CREATE TABLE {} ();", quote_ident(table));
        }

        let primary: Vec<&str> = columns
            .iter()
            .filter(|(_, f)| f.primary)
            .map(|(c, f)| f.column_name(c))
            .collect();
        let composite = primary.len() > 1;

        let mut defs: Vec<String> = columns
            .iter()
            .map(|(name, field)| self.column_definition(field.column_name(name), field, !composite))
            .collect();

        if composite {
            let cols: Vec<String> = primary.iter().map(|c| quote_ident(c)).collect();
            defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(table),
            defs.join(",\n    ")
        )
    }

    /// Rebuild a dropped table with its indexes and foreign keys.
    fn recreate_table(&self, entity: &EntityDefinition) -> Vec<String> {
        let columns: Vec<(&str, &EntityField)> = entity
            .fields
            .iter()
            .map(|(name, field)| (name.as_str(), field))
            .collect();
        let mut stmts = vec![self.create_table(&entity.table, &columns)];

        for index in &entity.indexes {
            let cols: Vec<String> = index
                .fields
                .iter()
                .map(|f| entity.column_name(f).to_string())
                .collect();
            let refs: Vec<&str> = cols.iter().map(String::as_str).collect();
            let name = index.resolved_name(&entity.table, &refs);
            stmts.push(self.create_index(&entity.table, &name, &cols, index.unique));
        }

        stmts
    }

    /// Generate DROP TABLE statement.
    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE;", quote_ident(name))
    }

    /// Generate ALTER COLUMN statements turning `before` into `after`.
    fn alter_column(
        &self,
        table: &str,
        field: &str,
        before: &EntityField,
        after: &EntityField,
    ) -> Vec<String> {
        let mut stmts = Vec::new();
        let t = quote_ident(table);
        let old_col = before.column_name(field);
        let col = after.column_name(field);
        let c = quote_ident(col);

        if old_col != col {
            stmts.push(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {};",
                t,
                quote_ident(old_col),
                c
            ));
        }

        let (old_type, new_type) = (self.sql_type(before), self.sql_type(after));
        if old_type != new_type {
            // SERIAL is not a real type; the column stays INTEGER
            let target = if new_type == "SERIAL" { "INTEGER" } else { &new_type };
            stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                t, c, target, c, target
            ));
        }

        if before.required != after.required {
            let action = if after.required { "SET" } else { "DROP" };
            stmts.push(format!("ALTER TABLE {} ALTER COLUMN {} {} NOT NULL;", t, c, action));
        }

        let (old_default, new_default) = (self.default_expr(before), self.default_expr(after));
        if old_default != new_default {
            match new_default {
                Some(default) => stmts.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                    t, c, default
                )),
                None => stmts.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;", t, c)),
            }
        }

        let unique_name = quote_ident(&format!("{table}_{col}_key"));
        if before.unique != after.unique {
            if after.unique {
                stmts.push(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
                    t, unique_name, c
                ));
            } else {
                stmts.push(format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", t, unique_name));
            }
        }

        if before.enum_values != after.enum_values {
            let check_name = quote_ident(&format!("{table}_{col}_check"));
            stmts.push(format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", t, check_name));
            if let Some(check) = enum_check(col, after) {
                stmts.push(format!("ALTER TABLE {} ADD CONSTRAINT {} {};", t, check_name, check));
            }
        }

        if before.primary != after.primary {
            if after.primary {
                stmts.push(format!("ALTER TABLE {} ADD PRIMARY KEY ({});", t, c));
            } else {
                stmts.push(format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                    t,
                    quote_ident(&format!("{table}_pkey"))
                ));
            }
        }

        if stmts.is_empty() {
            stmts.push(format!("-- {}.{}: no column change", table, field));
        }

        stmts
    }

    /// Generate CREATE INDEX statement.
    fn create_index(&self, table: &str, name: &str, columns: &[String], unique: bool) -> String {
        let unique = if unique { "UNIQUE " } else { "" };
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({});",
            unique,
            quote_ident(name),
            quote_ident(table),
            cols.join(", ")
        )
    }

    /// Generate DROP INDEX statement.
    fn drop_index(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {};", quote_ident(name))
    }
}

fn enum_check(column: &str, field: &EntityField) -> Option<String> {
    let values = field.enum_values.as_ref()?;
    let values: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect();
    Some(format!("CHECK ({} IN ({}))", quote_ident(column), values.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use pretty_assertions::assert_eq;
    use stratum_schema::{DefaultValue, IndexSpec, NormalizedModel, Relation};

    fn todo() -> EntityDefinition {
        EntityDefinition::new("todos")
            .with_field("id", EntityField::required(FieldType::Uuid).primary())
            .with_field("title", EntityField::required(FieldType::String))
            .with_field(
                "completed",
                EntityField::required(FieldType::Boolean).with_default(DefaultValue::Bool(false)),
            )
    }

    #[test]
    fn test_create_table_from_empty_model() {
        let to = NormalizedModel::empty().with_entity("Todo", todo());
        let sql = PostgresSqlGenerator::new().generate(&diff(&NormalizedModel::empty(), &to));

        assert_eq!(
            sql.up,
            "CREATE TABLE \"todos\" (\n    \
             \"id\" UUID NOT NULL PRIMARY KEY,\n    \
             \"title\" VARCHAR(255) NOT NULL,\n    \
             \"completed\" BOOLEAN NOT NULL DEFAULT false\n);"
        );
        assert_eq!(sql.down, "DROP TABLE IF EXISTS \"todos\" CASCADE;");
        assert!(sql.reversible);
        assert_eq!(split_statements(&sql.up).len(), 1);
    }

    #[test]
    fn test_string_length_and_enum_check() {
        let field = EntityField::optional(FieldType::String).with_enum_values(["draft", "published"]);
        let generator = PostgresSqlGenerator::new().with_string_length(64);
        assert_eq!(
            generator.column_definition("status", &field, true),
            "\"status\" VARCHAR(64) CHECK (\"status\" IN ('draft', 'published'))"
        );
    }

    #[test]
    fn test_modifier_order() {
        let field = EntityField::required(FieldType::Text)
            .unique()
            .with_default(DefaultValue::String("it's".into()));
        assert_eq!(
            PostgresSqlGenerator::new().column_definition("bio", &field, true),
            "\"bio\" TEXT NOT NULL UNIQUE DEFAULT 'it''s'"
        );
    }

    #[test]
    fn test_composite_primary_key() {
        let a = EntityField::required(FieldType::Uuid).primary();
        let b = EntityField::required(FieldType::Uuid).primary();
        let sql = PostgresSqlGenerator::new().create_table("post_tags", &[("postId", &a), ("tagId", &b)]);
        assert!(sql.contains("\"postId\" UUID NOT NULL,"));
        assert!(sql.contains("PRIMARY KEY (\"postId\", \"tagId\")"));
    }

    #[test]
    fn test_add_and_drop_column_are_inverse() {
        let from = NormalizedModel::empty().with_entity("Todo", todo());
        let to = NormalizedModel::empty().with_entity(
            "Todo",
            todo().with_field("notes", EntityField::optional(FieldType::Text)),
        );

        let sql = PostgresSqlGenerator::new().generate(&diff(&from, &to));
        assert_eq!(sql.up, "ALTER TABLE \"todos\" ADD COLUMN \"notes\" TEXT;");
        assert_eq!(sql.down, "ALTER TABLE \"todos\" DROP COLUMN IF EXISTS \"notes\";");

        let sql = PostgresSqlGenerator::new().generate(&diff(&to, &from));
        assert_eq!(sql.down, "ALTER TABLE \"todos\" ADD COLUMN \"notes\" TEXT;");
        assert!(sql.reversible);
    }

    #[test]
    fn test_narrowing_alter_is_not_reversible() {
        let from = NormalizedModel::empty().with_entity("Todo", todo());
        let mut narrowed = todo();
        narrowed
            .fields
            .insert("title".into(), EntityField::required(FieldType::Integer));
        let to = NormalizedModel::empty().with_entity("Todo", narrowed);

        let sql = PostgresSqlGenerator::new().generate(&diff(&from, &to));
        assert_eq!(
            sql.up,
            "ALTER TABLE \"todos\" ALTER COLUMN \"title\" TYPE INTEGER USING \"title\"::INTEGER;"
        );
        assert!(!sql.reversible);
        assert!(sql.down.starts_with(MANUAL_INTERVENTION));
        assert!(sql.down.contains("alter_column todos.title"));
    }

    #[test]
    fn test_widening_alter_is_reversible() {
        let from = NormalizedModel::empty().with_entity("Todo", todo());
        let mut widened = todo();
        widened
            .fields
            .insert("title".into(), EntityField::optional(FieldType::Text));
        let to = NormalizedModel::empty().with_entity("Todo", widened);

        let sql = PostgresSqlGenerator::new().generate(&diff(&from, &to));
        assert_eq!(
            split_statements(&sql.up),
            vec![
                "ALTER TABLE \"todos\" ALTER COLUMN \"title\" TYPE TEXT USING \"title\"::TEXT;",
                "ALTER TABLE \"todos\" ALTER COLUMN \"title\" DROP NOT NULL;",
            ]
        );
        assert!(sql.reversible);
        assert!(sql.down.contains("SET NOT NULL"));
    }

    #[test]
    fn test_drop_table_down_recreates_table() {
        let from = NormalizedModel::empty()
            .with_entity("Todo", todo().with_index(IndexSpec::new(["title"])));
        let sql = PostgresSqlGenerator::new().generate(&diff(&from, &NormalizedModel::empty()));

        assert_eq!(sql.up, "DROP TABLE IF EXISTS \"todos\" CASCADE;");
        let down = split_statements(&sql.down);
        assert!(down[0].starts_with("CREATE TABLE \"todos\""));
        assert_eq!(
            down[1],
            "CREATE INDEX \"todos_title_idx\" ON \"todos\" (\"title\");"
        );
    }

    #[test]
    fn test_foreign_keys() {
        let user = EntityDefinition::new("users")
            .with_field("id", EntityField::required(FieldType::Uuid).primary());
        let post = EntityDefinition::new("posts")
            .with_field("id", EntityField::required(FieldType::Uuid).primary())
            .with_field(
                "authorId",
                EntityField::required(FieldType::Uuid).with_db_column("author_id"),
            )
            .with_relation("author", Relation::belongs_to("User", "authorId").cascade())
            .with_relation(
                "comments",
                Relation::new(RelationKind::HasMany, "Comment"),
            );
        let to = NormalizedModel::empty()
            .with_entity("User", user)
            .with_entity("Post", post);

        let sql = PostgresSqlGenerator::new().generate(&diff(&NormalizedModel::empty(), &to));
        let up = split_statements(&sql.up);
        assert_eq!(
            up.last().unwrap(),
            "ALTER TABLE \"posts\" ADD CONSTRAINT \"posts_author_id_users_cascade_fkey\" \
             FOREIGN KEY (\"author_id\") REFERENCES \"users\" ON DELETE CASCADE;"
        );
        assert!(sql.up.contains("-- hasMany relation posts.comments -> comments"));
        assert!(split_statements(&sql.down)[0]
            .starts_with("ALTER TABLE \"posts\" DROP CONSTRAINT IF EXISTS"));
    }

    #[test]
    fn test_split_statements_skips_comments() {
        let script = "CREATE TABLE \"a\" ();\n\n-- note\n\nDROP TABLE \"b\";\n";
        assert_eq!(
            split_statements(script),
            vec!["CREATE TABLE \"a\" ();", "DROP TABLE \"b\";"]
        );
    }

    #[test]
    fn test_split_script_keeps_dollar_quoted_body() {
        let script = "DO $$\nBEGIN\n\n  PERFORM 1;\nEND $$;\n\nUPDATE \"todos\" SET \"title\" = 'a;b';\n";
        assert_eq!(
            split_script(script),
            vec![
                "DO $$\nBEGIN\n\n  PERFORM 1;\nEND $$;",
                "UPDATE \"todos\" SET \"title\" = 'a;b';"
            ]
        );
    }

    #[test]
    fn test_split_script_quotes_and_comments() {
        let script = "INSERT INTO \"tags\" (\"label\") VALUES\n  ('it''s; fine'),\n\n  ('x');\n\
                      CREATE FUNCTION f() RETURNS int AS $body$ SELECT 1; $body$ LANGUAGE sql;\n\
                      /* done; */ -- trailing; note\n";
        let statements = split_script(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("('x');"));
        assert!(statements[1].contains("$body$ SELECT 1; $body$"));
        assert_eq!(split_script("SELECT $1"), vec!["SELECT $1"]);
    }

    #[test]
    fn test_custom_migration() {
        let sql = MigrationSql::custom("UPDATE \"todos\" SET \"completed\" = true;", None);
        assert!(!sql.reversible);
        assert!(sql.down.starts_with(MANUAL_INTERVENTION));
        assert_eq!(sql.checksum(), checksum("UPDATE \"todos\" SET \"completed\" = true;"));
        assert_eq!(sql.checksum().len(), 64);
    }
}

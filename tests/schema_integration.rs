//! Integration tests for normalization, model hashing and diffing.
//!
//! These tests drive the public API from raw entity documents through to
//! ordered diff steps and generated SQL.

use pretty_assertions::assert_eq;
use stratum::migrate::{DiffStep, PostgresSqlGenerator, apply_steps, diff, split_statements};
use stratum::schema::{
    FieldType, NormalizeMode, NormalizedModel, Normalizer, RawModel, RelationKind, SchemaError,
    StratumConfig, hash_model, normalize,
};

fn todo_model() -> NormalizedModel {
    let raw = RawModel::from_json(
        r#"{
            "Todo": {
                "table": "todos",
                "fields": {
                    "id": "uuid!",
                    "title": "string!",
                    "completed": "boolean! = false"
                }
            }
        }"#,
    )
    .expect("Failed to parse entity document");
    normalize(&raw).expect("Failed to normalize")
}

fn blog_model() -> NormalizedModel {
    let raw = RawModel::from_json(
        r#"{
            "User": {
                "fields": { "id": "uuid!", "email": "string! unique", "bio": "text?" }
            },
            "Post": {
                "fields": {
                    "id": "uuid!",
                    "title": "string! indexed",
                    "status": "enum[draft, published]! = draft",
                    "author": "User! cascade",
                    "tags": "Tag[] through:post_tags"
                }
            },
            "Tag": {
                "fields": { "id": "uuid!", "label": "string! unique" }
            }
        }"#,
    )
    .expect("Failed to parse entity document");
    normalize(&raw).expect("Failed to normalize")
}

/// A brand new entity becomes one add_table followed by its columns.
#[test]
fn test_todo_from_empty_model() {
    let model = todo_model();
    let steps = diff(&NormalizedModel::empty(), &model);

    let kinds: Vec<_> = steps.iter().map(DiffStep::kind).collect();
    assert_eq!(kinds, ["add_table", "add_column", "add_column", "add_column"]);
    assert!(steps.iter().all(|s| s.table() == "todos"));

    let sql = PostgresSqlGenerator::new().generate(&steps);
    assert_eq!(
        sql.up,
        "CREATE TABLE \"todos\" (\n    \
         \"id\" UUID NOT NULL PRIMARY KEY,\n    \
         \"title\" VARCHAR(255) NOT NULL,\n    \
         \"completed\" BOOLEAN NOT NULL DEFAULT false\n);"
    );
    assert_eq!(split_statements(&sql.up).len(), 1);
    assert!(sql.reversible);
}

#[test]
fn test_diff_of_identical_models_is_empty() {
    let model = blog_model();
    assert!(diff(&model, &model).is_empty());
    assert!(diff(&NormalizedModel::empty(), &NormalizedModel::empty()).is_empty());
}

/// Entity and field order in the source document do not change the hash.
#[test]
fn test_hash_ignores_declaration_order() {
    let a = RawModel::from_json(
        r#"{
            "User": { "fields": { "id": "uuid!", "email": "string! unique" } },
            "Todo": { "fields": { "id": "uuid!", "title": "string!" } }
        }"#,
    )
    .unwrap();
    let b = RawModel::from_json(
        r#"{
            "Todo": { "fields": { "title": "string!", "id": "uuid!" } },
            "User": { "fields": { "email": "string! unique", "id": "uuid!" } }
        }"#,
    )
    .unwrap();

    let ha = hash_model(&normalize(&a).unwrap()).unwrap();
    let hb = hash_model(&normalize(&b).unwrap()).unwrap();
    assert_eq!(ha.hash, hb.hash);
    assert_eq!(ha.hash.as_str().len(), 64);
}

#[test]
fn test_hash_changes_with_content() {
    let before = hash_model(&todo_model()).unwrap().hash;
    let after = hash_model(&blog_model()).unwrap().hash;
    assert_ne!(before, after);
}

/// Replaying the diff over the source model reproduces the target.
#[test]
fn test_replayed_diff_matches_target_hash() {
    let from = todo_model();
    let to = blog_model();

    let replayed = apply_steps(&from, &diff(&from, &to));
    assert_eq!(
        hash_model(&replayed).unwrap().hash,
        hash_model(&to).unwrap().hash
    );

    let back = apply_steps(&to, &diff(&to, &from));
    assert_eq!(
        hash_model(&back).unwrap().hash,
        hash_model(&from).unwrap().hash
    );
}

/// Every additive step is emitted before any removal.
#[test]
fn test_additive_steps_precede_removals() {
    let from = blog_model();
    let to = todo_model();
    let mut merged = to.clone();
    for (name, entity) in from.entities().filter(|(name, _)| *name == "User") {
        let mut user = entity.clone();
        user.fields.shift_remove("bio");
        merged = merged.with_entity(name, user);
    }

    let steps = diff(&from, &merged);
    let last_additive = steps
        .iter()
        .rposition(DiffStep::is_additive)
        .expect("expected additive steps");
    let first_removal = steps
        .iter()
        .position(|s| s.is_destructive() || s.kind().starts_with("drop"))
        .expect("expected removals");
    assert!(last_additive < first_removal);
    assert!(steps.iter().any(|s| s.kind() == "drop_column"));
    assert!(steps.iter().any(|s| s.kind() == "drop_table" && s.table() == "posts"));
}

#[test]
fn test_inline_relations_normalize() {
    let model = blog_model();

    let post = model.entity("Post").expect("Post not found");
    assert_eq!(post.table, "posts");

    let author = post.relations.get("author").expect("author relation");
    assert_eq!(author.kind, RelationKind::BelongsTo);
    assert!(author.cascade);
    let fk = post.get_field("authorId").expect("synthesized foreign key");
    assert_eq!(fk.field_type, FieldType::Uuid);

    let tags = post.relations.get("tags").expect("tags relation");
    assert_eq!(tags.kind, RelationKind::ManyToMany);
    assert_eq!(tags.through.as_deref(), Some("post_tags"));

    let status = post.get_field("status").expect("status field");
    assert_eq!(
        status.enum_values.as_deref(),
        Some(&["draft".to_string(), "published".to_string()][..])
    );
}

#[test]
fn test_strict_mode_from_config() {
    let config = StratumConfig::parse(
        r#"
        [schema]
        strict = false

        [environments.ci]
        strict = true
        "#,
    )
    .unwrap();
    let raw = RawModel::from_json(r#"{ "Thing": { "fields": { "id": "uuid!", "weird": "blob!" } } }"#)
        .unwrap();

    let lenient = config.normalizer().normalize(&raw).unwrap();
    assert_eq!(
        lenient.entity("Thing").unwrap().get_field("weird").unwrap().field_type,
        FieldType::String
    );

    let strict = config.with_environment("ci").normalizer();
    assert_eq!(strict.mode(), NormalizeMode::Strict);
    assert!(matches!(
        strict.normalize(&raw).unwrap_err(),
        SchemaError::UnknownType { .. }
    ));
    assert_eq!(Normalizer::new().mode(), NormalizeMode::Permissive);
}

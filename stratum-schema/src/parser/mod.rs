//! Parser for the field shorthand mini-language.
//!
//! A shorthand string is parsed into a [`FieldSpec`]: a tagged description of
//! a scalar field, an enum field, or an inline relation, plus its presence
//! marker, modifiers and default clause. Whether a capitalized type token is
//! a relation depends on which entities exist, so parsing and relation
//! resolution are separate steps (see [`FieldSpec::resolve_relations`]).

mod grammar;

use pest::Parser;
use pest::error::InputLocation;
use smol_str::SmolStr;

use crate::ast::unquote;
use crate::error::{SchemaError, SchemaResult};

pub use grammar::{Rule, ShorthandParser};

/// Whether a field was marked required (`!`), nullable (`?`), or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    /// Marked with `!`.
    Required,
    /// Marked with `?`.
    Nullable,
    /// No marker; treated as optional.
    #[default]
    Unspecified,
}

impl Presence {
    /// Whether the field ends up NOT NULL.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required)
    }
}

/// A shorthand modifier such as `unique` or `through:post_tags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    /// Modifier name.
    pub key: SmolStr,
    /// Value after the colon, if any.
    pub value: Option<String>,
}

/// What a shorthand declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecKind {
    /// A scalar type token, e.g. `string` or `uuid`.
    Scalar {
        /// The type token as written.
        token: SmolStr,
        /// Whether `[]` followed the token.
        list: bool,
    },
    /// An `enum[...]` declaration.
    Enum {
        /// The declared values.
        values: Vec<String>,
    },
    /// An inline relation to another entity.
    Relation {
        /// Target entity name.
        target: SmolStr,
        /// Whether `[]` followed the token.
        list: bool,
    },
}

/// A parsed field shorthand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// What the field declares.
    pub kind: SpecKind,
    /// Presence marker.
    pub presence: Presence,
    /// Modifiers in source order.
    pub modifiers: Vec<Modifier>,
    /// Raw default clause (right-hand side of `=`).
    pub default: Option<String>,
}

impl FieldSpec {
    /// Reclassify a capitalized scalar token naming a known entity as an
    /// inline relation.
    pub fn resolve_relations(mut self, is_entity: impl Fn(&str) -> bool) -> Self {
        if let SpecKind::Scalar { token, list } = &self.kind
            && token.starts_with(|c: char| c.is_ascii_uppercase())
            && is_entity(token)
        {
            self.kind = SpecKind::Relation {
                target: token.clone(),
                list: *list,
            };
        }
        self
    }

    /// Check for a bare flag modifier.
    pub fn has_flag(&self, key: &str) -> bool {
        self.modifiers.iter().any(|m| m.key == key)
    }

    /// Get the value of a `key:value` modifier.
    pub fn modifier_value(&self, key: &str) -> Option<&str> {
        self.modifiers
            .iter()
            .find(|m| m.key == key)
            .and_then(|m| m.value.as_deref())
    }
}

/// Parse a field shorthand string.
pub fn parse_shorthand(input: &str) -> SchemaResult<FieldSpec> {
    let mut pairs = ShorthandParser::parse(Rule::shorthand, input).map_err(|e| {
        let (offset, len) = match e.location {
            InputLocation::Pos(pos) => (pos, 0),
            InputLocation::Span((start, end)) => (start, end - start),
        };
        SchemaError::syntax(input, offset, len, e.variant.message().to_string())
    })?;

    let root = pairs
        .next()
        .ok_or_else(|| SchemaError::syntax(input, 0, input.len(), "empty shorthand"))?;

    let mut kind = None;
    let mut presence = Presence::Unspecified;
    let mut modifiers = Vec::new();
    let mut default = None;

    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::enum_type => {
                let mut values = Vec::new();
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::enum_values => {
                            values = inner
                                .into_inner()
                                .map(|v| unquote(v.as_str().trim()).to_string())
                                .filter(|v| !v.is_empty())
                                .collect();
                        }
                        Rule::required => presence = Presence::Required,
                        Rule::nullable => presence = Presence::Nullable,
                        _ => {}
                    }
                }
                kind = Some(SpecKind::Enum { values });
            }
            Rule::named_type => {
                let mut token = SmolStr::default();
                let mut list = false;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::type_name => token = SmolStr::new(inner.as_str()),
                        Rule::list_marker => list = true,
                        Rule::required => presence = Presence::Required,
                        Rule::nullable => presence = Presence::Nullable,
                        _ => {}
                    }
                }
                kind = Some(SpecKind::Scalar { token, list });
            }
            Rule::modifier => {
                let mut key = SmolStr::default();
                let mut value = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::mod_key => key = SmolStr::new(inner.as_str()),
                        Rule::mod_value => value = Some(inner.as_str().to_string()),
                        _ => {}
                    }
                }
                modifiers.push(Modifier { key, value });
            }
            Rule::default_clause => {
                default = pair
                    .into_inner()
                    .next()
                    .map(|p| p.as_str().trim().to_string());
            }
            _ => {}
        }
    }

    let kind =
        kind.ok_or_else(|| SchemaError::syntax(input, 0, input.len(), "missing type token"))?;

    Ok(FieldSpec {
        kind,
        presence,
        modifiers,
        default,
    })
}

//! Error types for entity normalization, hashing, and configuration.

#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while normalizing entity declarations.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(stratum::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Syntax error in a field shorthand.
    #[error("invalid field shorthand: {message}")]
    #[diagnostic(
        code(stratum::schema::syntax_error),
        help("shorthand looks like `string! unique`, `User!`, `Tag[] through:post_tags` or `enum[a, b]`")
    )]
    SyntaxError {
        #[source_code]
        src: String,
        #[label("error here")]
        span: miette::SourceSpan,
        message: String,
    },

    /// Invalid field definition.
    #[error("invalid field `{entity}.{field}`: {message}")]
    #[diagnostic(code(stratum::schema::invalid_field))]
    InvalidField {
        entity: String,
        field: String,
        message: String,
    },

    /// Invalid relation definition.
    #[error("invalid relation `{entity}.{relation}`: {message}")]
    #[diagnostic(
        code(stratum::schema::invalid_relation),
        help("relation targets must name an entity declared in the same document")
    )]
    InvalidRelation {
        entity: String,
        relation: String,
        message: String,
    },

    /// Unknown type token (strict mode only).
    #[error("unknown type `{type_name}` in `{entity}.{field}`")]
    #[diagnostic(
        code(stratum::schema::unknown_type),
        help("use one of string, text, uuid, number, integer, boolean, timestamp, jsonb, or a declared entity name")
    )]
    UnknownType {
        entity: String,
        field: String,
        type_name: String,
    },

    /// Unknown shorthand modifier (strict mode only).
    #[error("unknown modifier `{modifier}` in `{entity}.{field}`")]
    #[diagnostic(code(stratum::schema::unknown_modifier))]
    UnknownModifier {
        entity: String,
        field: String,
        modifier: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(stratum::schema::config_error))]
    ConfigError { message: String },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(stratum::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },
}

impl SchemaError {
    /// Create a syntax error with source location.
    pub fn syntax(
        src: impl Into<String>,
        offset: usize,
        len: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::SyntaxError {
            src: src.into(),
            span: (offset, len).into(),
            message: message.into(),
        }
    }

    /// Create an invalid field error.
    pub fn invalid_field(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid relation error.
    pub fn invalid_relation(
        entity: impl Into<String>,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRelation {
            entity: entity.into(),
            relation: relation.into(),
            message: message.into(),
        }
    }

    /// Create an unknown type error.
    pub fn unknown_type(
        entity: impl Into<String>,
        field: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::UnknownType {
            entity: entity.into(),
            field: field.into(),
            type_name: type_name.into(),
        }
    }

    /// Create an unknown modifier error.
    pub fn unknown_modifier(
        entity: impl Into<String>,
        field: impl Into<String>,
        modifier: impl Into<String>,
    ) -> Self {
        Self::UnknownModifier {
            entity: entity.into(),
            field: field.into(),
            modifier: modifier.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Attach the owning entity and field to a bare shorthand syntax error.
    pub(crate) fn in_field(self, entity: &str, field: &str) -> Self {
        match self {
            Self::SyntaxError { src, span, message } => Self::SyntaxError {
                src,
                span,
                message: format!("{entity}.{field}: {message}"),
            },
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error() {
        let err = SchemaError::syntax("string! !", 8, 1, "unexpected token");

        match err {
            SchemaError::SyntaxError { src, span, message } => {
                assert_eq!(src, "string! !");
                assert_eq!(span.offset(), 8);
                assert_eq!(span.len(), 1);
                assert_eq!(message, "unexpected token");
            }
            _ => panic!("Expected SyntaxError"),
        }
    }

    #[test]
    fn test_syntax_error_in_field() {
        let err = SchemaError::syntax("??", 0, 2, "bad").in_field("User", "email");
        assert!(err.to_string().contains("User.email: bad"));
    }

    #[test]
    fn test_unknown_type_display() {
        let err = SchemaError::unknown_type("Post", "category", "strnig");
        assert_eq!(err.to_string(), "unknown type `strnig` in `Post.category`");
    }

    #[test]
    fn test_invalid_relation_display() {
        let err = SchemaError::invalid_relation("Post", "author", "unknown target `Usr`");
        assert!(err.to_string().contains("Post.author"));
        assert!(err.to_string().contains("Usr"));
    }
}

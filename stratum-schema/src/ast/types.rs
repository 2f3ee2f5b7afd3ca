//! Scalar types and default values for entity fields.

use serde::{Deserialize, Serialize};

/// Column types an entity field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Bounded string (maps to VARCHAR).
    String,
    /// Unbounded text (maps to TEXT).
    Text,
    /// UUID.
    Uuid,
    /// Numeric value (maps to INTEGER).
    Number,
    /// Integer value (maps to INTEGER).
    Integer,
    /// Boolean.
    Boolean,
    /// Timestamp.
    Timestamp,
    /// JSON document (maps to JSONB).
    Jsonb,
}

impl FieldType {
    /// Resolve a lowercase type token, including the accepted aliases.
    pub fn from_token(token: &str) -> Option<Self> {
        let ty = match token.to_ascii_lowercase().as_str() {
            "string" | "varchar" => Self::String,
            "text" => Self::Text,
            "uuid" => Self::Uuid,
            "number" | "float" | "decimal" => Self::Number,
            "integer" | "int" => Self::Integer,
            "boolean" | "bool" => Self::Boolean,
            "timestamp" | "datetime" | "date" => Self::Timestamp,
            "jsonb" | "json" => Self::Jsonb,
            _ => return None,
        };
        Some(ty)
    }

    /// Get the canonical token for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Jsonb => "jsonb",
        }
    }

    /// Whether changing a column from `self` to `to` can never lose data.
    pub fn widens_to(&self, to: FieldType) -> bool {
        matches!(
            (self, to),
            (Self::String, Self::Text) | (Self::Integer, Self::Number) | (Self::Number, Self::Integer)
        ) || *self == to
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// The current timestamp (`now()`).
    Now,
    /// SQL NULL.
    Null,
}

impl DefaultValue {
    /// Parse the right-hand side of a `type = value` shorthand.
    ///
    /// Booleans, numbers, `now()` and `null` are recognized; anything else is
    /// a string literal with surrounding quotes stripped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            "null" => return Self::Null,
            _ => {}
        }
        if raw.eq_ignore_ascii_case("now()") {
            return Self::Now;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>()
            && f.is_finite()
        {
            return Self::Float(f);
        }
        Self::String(unquote(raw).to_string())
    }

    /// Convert a structured JSON default into a default value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::parse(s),
            other => Self::String(other.to_string()),
        }
    }

    /// Render this default as a SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Now => "CURRENT_TIMESTAMP".to_string(),
            Self::Null => "NULL".to_string(),
        }
    }
}

/// Strip one pair of matching surrounding quotes.
pub(crate) fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

//! # stratum-schema
//!
//! Entity declarations and the canonical model for Stratum.
//!
//! This crate provides:
//! - A pest grammar for the field shorthand (`string! unique`, `User!`,
//!   `Tag[] through:post_tags`, `enum[draft, published]`)
//! - The normalizer turning raw entity declarations into a [`NormalizedModel`]
//! - Content-addressed model hashing
//! - Configuration parsing for `stratum.toml`
//!
//! ## Example
//!
//! ```rust
//! use stratum_schema::{RawModel, hash_model, normalize};
//!
//! let raw = RawModel::from_json(r#"{
//!     "Todo": {
//!         "table": "todos",
//!         "fields": { "id": "uuid!", "title": "string!", "completed": "boolean! = false" }
//!     }
//! }"#)?;
//!
//! let model = normalize(&raw)?;
//! let hashed = hash_model(&model)?;
//! assert_eq!(hashed.hash.as_str().len(), 64);
//! # Ok::<(), stratum_schema::SchemaError>(())
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod hash;
pub mod normalize;
pub mod parser;

pub use ast::*;
pub use config::StratumConfig;
pub use error::{SchemaError, SchemaResult};
pub use hash::{EMPTY_MODEL_HASH, HashedModel, ModelHash, canonical_form, hash_model, sha256_hex};
pub use normalize::{
    NormalizeMode, Normalizer, RawEntity, RawField, RawFieldDef, RawIndex, RawModel,
    RawRelation, normalize,
};
pub use parser::{FieldSpec, Presence, SpecKind, parse_shorthand};

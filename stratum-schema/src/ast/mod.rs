//! Canonical model types produced by the normalizer.

mod field;
mod model;
mod relation;
mod types;

pub use field::*;
pub use model::*;
pub use relation::*;
pub use types::*;

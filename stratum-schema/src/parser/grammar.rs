//! Pest grammar parser for field shorthand strings.

use pest_derive::Parser;

/// The field shorthand parser.
#[derive(Parser)]
#[grammar = "parser/shorthand.pest"]
pub struct ShorthandParser;

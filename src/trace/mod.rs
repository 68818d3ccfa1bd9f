//! Trace output model and parser.

mod models;
mod parser;

pub use models::*;
pub use parser::*;

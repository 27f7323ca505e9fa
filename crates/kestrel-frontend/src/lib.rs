//! Pipeline frontend for Kestrel.
//!
//! Turns raw pipeline definition text into an executable step graph:
//! matrix expansion, variable substitution, parsing, linting and
//! compilation.

pub mod compiler;
pub mod envsubst;
pub mod linter;
pub mod matrix;
pub mod yaml;

pub use compiler::{Compiler, Netrc};
pub use envsubst::Template;
pub use linter::Linter;

//! Kestrel Core
//!
//! Core domain types, traits, and error handling for Kestrel.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the frontend, the runner and the command-line interface.

pub mod axis;
pub mod backend;
pub mod error;
pub mod metadata;
pub mod multipart;
pub mod ports;
pub mod secrets;

pub use axis::Axis;
pub use error::{CancelReason, Error, Result};
pub use metadata::Metadata;
pub use secrets::Secret;

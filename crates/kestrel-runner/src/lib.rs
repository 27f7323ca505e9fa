//! Pipeline execution for Kestrel.
//!
//! Runs a compiled step graph against an [`Engine`](kestrel_core::ports::Engine)
//! inside a cancellable scope and routes step output to a line-oriented sink.

pub mod docker;
pub mod logging;
pub mod runtime;
pub mod scope;

pub use docker::DockerEngine;
pub use logging::{ConsoleSink, LineLogger, LogSink, MemorySink};
pub use runtime::{Runtime, Tracer};
pub use scope::ExecScope;

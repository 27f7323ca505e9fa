//! Port traits.
//!
//! These traits define the interfaces between the orchestration core and
//! the execution backend.

use crate::Result;
use crate::backend::{Config, State, Step};
use crate::multipart::MultipartReader;
use async_trait::async_trait;

/// Container backend executing compiled steps.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Create the shared resources (volumes, networks) of a pipeline.
    async fn setup(&self, config: &Config) -> Result<()>;

    /// Start a step.
    async fn exec(&self, step: &Step) -> Result<()>;

    /// Forcibly stop a running step.
    async fn kill(&self, step: &Step) -> Result<()>;

    /// Block until the step exits.
    async fn wait(&self, step: &Step) -> Result<State>;

    /// Follow the output of a step.
    async fn tail(&self, step: &Step) -> Result<MultipartReader>;

    /// Tear down everything created for the pipeline.
    async fn destroy(&self, config: &Config) -> Result<()>;
}

/// Consumer of per-step output.
#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, step: &Step, reader: MultipartReader) -> Result<()>;
}

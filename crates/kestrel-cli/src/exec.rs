//! Local pipeline execution.
//!
//! Every axis of the build matrix is resolved, compiled and run in turn.
//! Axes never overlap, and the first failing axis ends the run.

use crate::commands::ExecSettings;
use crate::paths;
use crate::resolve::resolve;
use futures::{TryStreamExt, stream};
use kestrel_core::ports::Engine;
use kestrel_core::{Axis, Error, Result};
use kestrel_frontend::{Compiler, Linter, Template, matrix, yaml};
use kestrel_runner::runtime::DefaultTracer;
use kestrel_runner::{DockerEngine, ExecScope, LineLogger, LogSink, Runtime};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

/// Produces the engine used for one axis.
pub type EngineFactory = Arc<dyn Fn() -> Result<Arc<dyn Engine>> + Send + Sync>;

/// Lifecycle of a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    Pending,
    Resolving,
    Compiling,
    Linted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for AxisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AxisState::Pending => "pending",
            AxisState::Resolving => "resolving",
            AxisState::Compiling => "compiling",
            AxisState::Linted => "linted",
            AxisState::Running => "running",
            AxisState::Succeeded => "succeeded",
            AxisState::Failed => "failed",
            AxisState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

struct Progress {
    state: AxisState,
}

impl Progress {
    fn advance(&mut self, next: AxisState) {
        debug!(from = %self.state, to = %next, "Axis state changed");
        self.state = next;
    }
}

/// Runs a pipeline definition locally, one axis at a time.
pub struct Orchestrator {
    settings: ExecSettings,
    sink: Arc<dyn LogSink>,
    engines: EngineFactory,
    interrupt: bool,
}

impl Orchestrator {
    pub fn new(settings: ExecSettings, sink: Arc<dyn LogSink>) -> Self {
        let engines: EngineFactory = Arc::new(|| -> Result<Arc<dyn Engine>> {
            let engine: Arc<dyn Engine> = Arc::new(DockerEngine::connect()?);
            Ok(engine)
        });
        Self {
            settings,
            sink,
            engines,
            interrupt: true,
        }
    }

    pub fn with_engine_factory(mut self, engines: EngineFactory) -> Self {
        self.engines = engines;
        self
    }

    /// Whether Ctrl-C cancels a running axis.
    pub fn with_interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Run every axis of `file` in order, stopping at the first failure.
    pub async fn run_all(&self, file: &Path) -> Result<()> {
        let raw = tokio::fs::read_to_string(file).await?;
        let mut axes = matrix::parse(&raw)?;
        if axes.is_empty() {
            axes.push(Axis::new());
        }
        info!(file = %file.display(), axes = axes.len(), "Executing pipeline");

        let raw = raw.as_str();
        stream::iter(axes.into_iter().enumerate().map(Ok::<_, Error>))
            .try_fold((), |(), (index, axis)| async move {
                self.run_axis(file, raw, index, &axis).await
            })
            .await
    }

    async fn run_axis(&self, file: &Path, raw: &str, index: usize, axis: &Axis) -> Result<()> {
        let span = info_span!("axis", index = index + 1, axis = %axis);
        async {
            let mut progress = Progress {
                state: AxisState::Pending,
            };
            let result = self.drive(file, raw, axis, &mut progress).await;
            match &result {
                Ok(()) => progress.advance(AxisState::Succeeded),
                Err(e) if e.is_cancelled() => {
                    warn!(error = %e, "Axis cancelled");
                    progress.advance(AxisState::Cancelled);
                }
                Err(e) => {
                    warn!(error = %e, "Axis failed");
                    progress.advance(AxisState::Failed);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        file: &Path,
        raw: &str,
        axis: &Axis,
        progress: &mut Progress,
    ) -> Result<()> {
        let settings = &self.settings;

        progress.advance(AxisState::Resolving);
        let resolved = resolve(settings.metadata.to_metadata(axis), &settings.env)?;
        let text = Template::parse(raw)?.execute_map(&resolved.environ);
        let config = yaml::parse_str(&text)?;

        progress.advance(AxisState::Compiling);
        let mut volumes = settings.volumes.clone();
        if settings.local {
            let base = if config.workspace.base.is_empty() {
                settings.workspace_base.as_str()
            } else {
                config.workspace.base.as_str()
            };
            let path = if config.workspace.path.is_empty() {
                settings.workspace_path.as_str()
            } else {
                config.workspace.path.as_str()
            };
            let dir = paths::source_dir(file)?;
            volumes.extend(paths::local_volumes(&settings.prefix, base, path, &dir));
        }

        Linter::new().with_trusted(true).lint(&config)?;
        progress.advance(AxisState::Linted);

        let compiled = Compiler::new()
            .with_escalated(settings.privileged.iter().cloned())
            .with_volumes(volumes)
            .with_workspace(
                settings.workspace_base.clone(),
                settings.workspace_path.clone(),
            )
            .with_networks(settings.networks.iter().cloned())
            .with_prefix(settings.prefix.clone())
            .with_proxy()
            .with_local(settings.local)
            .with_netrc(
                settings.netrc_machine.clone(),
                settings.netrc_username.clone(),
                settings.netrc_password.clone(),
            )
            .with_metadata(resolved.metadata)
            .with_secrets(resolved.secrets)
            .with_environ(resolved.overrides)
            .compile(&config)?;

        let engine = (self.engines)()?;
        let mut scope = ExecScope::new().with_timeout(settings.timeout);
        if self.interrupt {
            scope = scope.with_interrupt();
        }

        progress.advance(AxisState::Running);
        Runtime::new(compiled, engine)
            .with_logger(Arc::new(LineLogger::new(Arc::clone(&self.sink))))
            .with_tracer(Arc::new(DefaultTracer))
            .run(&scope)
            .await
    }
}

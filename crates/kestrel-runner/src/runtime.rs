//! Execution of a compiled pipeline against an engine.

use crate::scope::ExecScope;
use futures::future::join_all;
use kestrel_core::backend::{Config, Step};
use kestrel_core::ports::{Engine, Logger};
use kestrel_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Progress of the pipeline as seen by a [`Tracer`].
#[derive(Debug, Clone, Copy)]
pub struct TraceState {
    /// Unix timestamp at which the pipeline started.
    pub started: i64,
    /// Whether an earlier step has failed.
    pub failed: bool,
}

/// Hook invoked right before a step starts.
pub trait Tracer: Send + Sync {
    fn trace(&self, step: &mut Step, state: &TraceState);
}

/// Stamps build and job status and timing variables onto each step.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTracer;

impl Tracer for DefaultTracer {
    fn trace(&self, step: &mut Step, state: &TraceState) {
        let status = if state.failed { "failure" } else { "success" };
        let now = chrono::Utc::now().timestamp().to_string();
        let started = state.started.to_string();

        let env = &mut step.environment;
        env.insert("CI_BUILD_STATUS".to_string(), status.to_string());
        env.insert("CI_BUILD_STARTED".to_string(), started);
        env.insert("CI_BUILD_FINISHED".to_string(), now.clone());
        env.insert("CI_JOB_STATUS".to_string(), status.to_string());
        env.insert("CI_JOB_STARTED".to_string(), now.clone());
        env.insert("CI_JOB_FINISHED".to_string(), now);
    }
}

/// Runs the stages of a compiled pipeline in order.
pub struct Runtime {
    config: Config,
    engine: Arc<dyn Engine>,
    logger: Option<Arc<dyn Logger>>,
    tracer: Option<Arc<dyn Tracer>>,
    started: i64,
}

/// Bookkeeping shared by the steps of one run.
#[derive(Default)]
struct Launched {
    steps: Mutex<Vec<Step>>,
    detached: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(config: Config, engine: Arc<dyn Engine>) -> Self {
        Self {
            config,
            engine,
            logger: None,
            tracer: None,
            started: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Run the pipeline within `scope`.
    ///
    /// Resources are destroyed whatever the outcome. On cancellation every
    /// step that was started is killed first.
    pub async fn run(&self, scope: &ExecScope) -> Result<()> {
        let launched = Launched::default();
        let result = scope.run(self.execute(&launched)).await;

        if let Err(Error::Cancelled(reason)) = &result {
            warn!(reason = %reason, "Pipeline cancelled, killing running steps");
            for step in launched.steps.lock().await.iter() {
                if let Err(e) = self.engine.kill(step).await {
                    warn!(step = %step.alias, error = %e, "Failed to kill step");
                }
            }
        }

        for handle in launched.detached.lock().await.drain(..) {
            handle.abort();
        }

        if let Err(e) = self.engine.destroy(&self.config).await {
            warn!(error = %e, "Failed to destroy pipeline resources");
        }

        result
    }

    async fn execute(&self, launched: &Launched) -> Result<()> {
        self.engine.setup(&self.config).await?;

        let mut failure: Option<Error> = None;
        for stage in &self.config.stages {
            let failed = failure.is_some();
            let steps: Vec<Step> = stage
                .steps
                .iter()
                .filter(|step| if failed { step.on_failure } else { step.on_success })
                .cloned()
                .collect();
            if steps.is_empty() {
                debug!(stage = %stage.alias, "Skipping stage");
                continue;
            }

            debug!(stage = %stage.alias, steps = steps.len(), "Running stage");
            let results = join_all(
                steps
                    .into_iter()
                    .map(|step| self.run_step(step, failed, launched)),
            )
            .await;

            for result in results {
                match (result, &failure) {
                    (Ok(()), _) => {}
                    (Err(e), None) => failure = Some(e),
                    (Err(e), Some(_)) => warn!(error = %e, "Additional step failure"),
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_step(&self, mut step: Step, failed: bool, launched: &Launched) -> Result<()> {
        if let Some(tracer) = &self.tracer {
            let state = TraceState {
                started: self.started,
                failed,
            };
            tracer.trace(&mut step, &state);
        }

        info!(step = %step.alias, container = %step.name, image = %step.image, "Starting step");
        self.engine.exec(&step).await?;
        launched.steps.lock().await.push(step.clone());

        if step.detached {
            if let Some(logger) = self.logger.clone() {
                let engine = Arc::clone(&self.engine);
                let step = step.clone();
                let handle = tokio::spawn(async move {
                    let logged = match engine.tail(&step).await {
                        Ok(reader) => logger.log(&step, reader).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = logged {
                        warn!(step = %step.alias, error = %e, "Detached step output lost");
                    }
                });
                launched.detached.lock().await.push(handle);
            }
            return Ok(());
        }

        let log = async {
            match &self.logger {
                Some(logger) => {
                    let reader = self.engine.tail(&step).await?;
                    logger.log(&step, reader).await
                }
                None => Ok(()),
            }
        };
        let (logged, state) = tokio::join!(log, self.engine.wait(&step));
        let state = state?;

        if state.oom_killed {
            return Err(Error::OomKilled { step: step.alias });
        }
        if state.exit_code != 0 {
            return Err(Error::StepFailed {
                step: step.alias,
                exit_code: state.exit_code,
            });
        }
        logged?;

        info!(step = %step.alias, "Step completed");
        Ok(())
    }
}

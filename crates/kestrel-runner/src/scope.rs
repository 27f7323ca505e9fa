//! Cancellable, deadline-bounded execution scope.

use kestrel_core::{CancelReason, Error, Result};
use std::future::{Future, pending};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

/// Scope bounding one pipeline execution.
///
/// The scope is cancelled when its deadline elapses, when an interrupt
/// signal arrives (if enabled), or when [`ExecScope::cancel`] is called,
/// whichever happens first.
#[derive(Debug)]
pub struct ExecScope {
    deadline: Option<Instant>,
    interrupt: bool,
    cancel: watch::Sender<Option<CancelReason>>,
}

impl Default for ExecScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecScope {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(None);
        Self {
            deadline: None,
            interrupt: false,
            cancel,
        }
    }

    /// Bound the scope to `timeout` from now. A timeout too large to be
    /// represented as an instant leaves the scope without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Cancel the scope on Ctrl-C.
    pub fn with_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Cancel the scope. Only the first reason is kept.
    pub fn cancel(&self, reason: CancelReason) {
        self.cancel.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let mut manual = self.cancel.subscribe();
        let requested = async move {
            loop {
                let current = *manual.borrow_and_update();
                if let Some(reason) = current {
                    return reason;
                }
                if manual.changed().await.is_err() {
                    return pending().await;
                }
            }
        };

        let deadline = async {
            match self.deadline {
                Some(deadline) => {
                    sleep_until(deadline).await;
                    CancelReason::DeadlineExceeded
                }
                None => pending().await,
            }
        };

        let interrupt = async {
            if !self.interrupt {
                return pending().await;
            }
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received interrupt, cancelling execution");
                    CancelReason::Interrupted
                }
                Err(e) => {
                    warn!(error = %e, "Failed to listen for interrupt signal");
                    pending().await
                }
            }
        };

        tokio::select! {
            reason = requested => reason,
            reason = deadline => reason,
            reason = interrupt => reason,
        }
    }

    /// Drive `future` to completion unless the scope is cancelled first.
    pub async fn run<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(Error::Cancelled(reason)),
            output = future => output,
        }
    }
}

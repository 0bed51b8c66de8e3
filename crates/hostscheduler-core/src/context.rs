//! Per-call cancellation and deadline context.
//!
//! Every scheduler call takes an `OpContext`. Network round-trips and
//! operation polls are raced against it; when it ends the call returns
//! `DeadlineExceeded` and leaves any provider-side operation running.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{SchedulerError, SchedulerResult};

/// Deadline and shutdown signal shared by every step of one call.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// When the call gives up; `None` waits forever.
    deadline: Option<Instant>,
    /// Flips to `true` on process shutdown.
    shutdown: Option<watch::Receiver<bool>>,
}

impl OpContext {
    /// A context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`. A timeout past the end of
    /// the clock never expires.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            shutdown: None,
        }
    }

    /// Also end the context when `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Whether the context has already ended.
    pub fn is_done(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the deadline passes or shutdown is signalled.
    pub async fn done(&self) {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        let shutdown = async {
            match self.shutdown.clone() {
                Some(mut rx) => {
                    // A dropped sender never cancels.
                    let signalled = rx.wait_for(|stop| *stop).await.is_ok();
                    if !signalled {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = deadline => {}
            _ = shutdown => {}
        }
    }

    /// Run `fut` unless the context ends first.
    ///
    /// `what` names the step for the `DeadlineExceeded` message.
    pub async fn run<F, T>(&self, what: &str, fut: F) -> SchedulerResult<T>
    where
        F: Future<Output = T>,
    {
        if self.is_done() {
            return Err(SchedulerError::DeadlineExceeded(what.to_string()));
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(SchedulerError::DeadlineExceeded(what.to_string())),
            out = fut => Ok(out),
        }
    }
}

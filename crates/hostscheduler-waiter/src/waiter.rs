//! OperationWaiter — drives long-running cloud operations to completion.
//!
//! Every capacity mutation a backend issues comes back as a
//! [`CloudOperation`] handle. The waiter polls the handle until it is
//! terminal and, when the provider reports a transient failure, re-issues
//! the same mutation. Cancellation only stops local polling; the
//! provider-side operation keeps running and a later call observes it.

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use hostscheduler_core::{
    CloudOperation, ErrorClass, ErrorCode, OpContext, OperationStatus, ProviderError,
    SchedulerError, SchedulerResult,
};

use crate::policy::WaitPolicy;

/// Reads the current state of an operation. Status reads are idempotent,
/// so duplicate polling is always safe.
#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn poll_operation(&self, op: &CloudOperation) -> Result<CloudOperation, ProviderError>;
}

/// Polls operations to completion and re-issues failed mutations.
#[derive(Debug, Clone, Default)]
pub struct OperationWaiter {
    /// Poll cadence and the re-issue budget.
    policy: WaitPolicy,
}

impl OperationWaiter {
    pub fn new(policy: WaitPolicy) -> Self {
        Self { policy }
    }

    /// Poll `op` until it is `Done` or `Error`.
    ///
    /// An `Error` terminal state is returned as the classified provider
    /// error for `op.target_resource`.
    pub async fn wait(
        &self,
        ctx: &OpContext,
        source: &dyn OperationSource,
        op: CloudOperation,
    ) -> SchedulerResult<CloudOperation> {
        let done = self.poll_until_terminal(ctx, source, op).await?;
        match done.status {
            OperationStatus::Done => Ok(done),
            _ => {
                let resource = done.target_resource.clone();
                Err(SchedulerError::from_provider(resource, terminal_error(done)))
            }
        }
    }

    /// Issue a mutation and wait for it, re-issuing the same request on
    /// retryable failures.
    ///
    /// `issue` must be repeatable: it is called once per attempt and must
    /// send the identical request every time.
    pub async fn drive<F, Fut>(
        &self,
        ctx: &OpContext,
        source: &dyn OperationSource,
        resource: &str,
        mut issue: F,
    ) -> SchedulerResult<CloudOperation>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<CloudOperation, ProviderError>> + Send,
    {
        let mut backoff = self.policy.backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let failure = match ctx.run(&format!("issuing mutation on {resource}"), issue()).await? {
                Ok(op) => {
                    debug!(%resource, operation = %op.id, attempt, "mutation issued");
                    let done = self.poll_until_terminal(ctx, source, op).await?;
                    if done.status == OperationStatus::Done {
                        return Ok(done);
                    }
                    terminal_error(done)
                }
                Err(e) => e,
            };

            if failure.class() != ErrorClass::Retryable {
                return Err(SchedulerError::from_provider(resource, failure));
            }
            if attempt >= self.policy.max_attempts {
                warn!(
                    %resource,
                    attempt,
                    error = %failure,
                    "mutation failed after max retries"
                );
                return Err(SchedulerError::from_provider(resource, failure));
            }

            let delay = backoff.next_delay();
            warn!(
                %resource,
                attempt,
                error = %failure,
                delay_ms = delay.as_millis() as u64,
                "mutation failed, re-issuing"
            );
            ctx.run(&format!("backing off before re-issuing on {resource}"), tokio::time::sleep(delay))
                .await?;
        }
    }

    /// Poll until terminal. Transient status-read failures are tolerated
    /// up to `max_attempts` in a row.
    async fn poll_until_terminal(
        &self,
        ctx: &OpContext,
        source: &dyn OperationSource,
        mut op: CloudOperation,
    ) -> SchedulerResult<CloudOperation> {
        let mut backoff = self.policy.backoff();
        let mut read_failures = 0u32;
        let waiting = format!("waiting for operation {}", op.id);

        while !op.status.is_terminal() {
            let delay = backoff.next_delay();
            ctx.run(&waiting, tokio::time::sleep(delay)).await?;

            match ctx.run(&waiting, source.poll_operation(&op)).await? {
                Ok(next) => {
                    read_failures = 0;
                    if next.status != op.status {
                        debug!(operation = %next.id, status = ?next.status, "operation progressed");
                    }
                    op = next;
                }
                Err(e) if e.class() == ErrorClass::Retryable => {
                    read_failures += 1;
                    if read_failures >= self.policy.max_attempts {
                        return Err(SchedulerError::from_provider(op.target_resource.clone(), e));
                    }
                    warn!(operation = %op.id, error = %e, "operation status read failed, retrying");
                }
                Err(e) => {
                    return Err(SchedulerError::from_provider(op.target_resource.clone(), e));
                }
            }
        }

        if op.status == OperationStatus::Done {
            info!(operation = %op.id, target = %op.target_resource, "operation done");
        }
        Ok(op)
    }
}

/// The provider error of an operation that ended in `Error`.
fn terminal_error(op: CloudOperation) -> ProviderError {
    op.error.unwrap_or_else(|| {
        ProviderError::new(
            ErrorCode::Unknown,
            format!("operation {} failed without error detail", op.id),
        )
    })
}

//! hostscheduler-waiter — long-running operation handling.
//!
//! Cloud cluster APIs answer every mutation with an operation handle and
//! finish the work asynchronously. The [`OperationWaiter`] turns that into
//! a uniform poll-until-terminal loop shared by every backend:
//!
//! ```text
//! drive(issue)
//!   loop attempt in 1..=max_attempts
//!     op = issue()                     retryable error → backoff, re-issue
//!     poll op every next_delay()       until DONE / ERROR / ctx ends
//!     DONE      → Ok(op)
//!     ERROR     → retryable → backoff, re-issue
//!               → conflict  → SchedulerError::Conflict
//!               → fatal     → SchedulerError::Provider / NotFound
//!   ctx ends    → SchedulerError::DeadlineExceeded (operation keeps running)
//! ```
//!
//! Delays grow exponentially from `initial_interval` to `max_interval`
//! with 0.5x–1.5x jitter.

pub mod policy;
pub mod waiter;

pub use policy::{Backoff, WaitPolicy};
pub use waiter::{OperationSource, OperationWaiter};

//! Bounded polling for output that a transcoder produces asynchronously.
//!
//! Handlers never block without a deadline: each wait is a series of cheap
//! checks separated by a fixed interval, ending on the first definite answer
//! or when the bound runs out.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(T),
    /// Not yet; check again after the interval.
    Pending,
    /// Will never become ready.
    Failed,
}

/// How a bounded wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Failed,
    TimedOut,
}

/// Run `check` every `interval` until it answers `Ready` or `Failed`, or
/// until `bound` has elapsed.
///
/// `check` runs at least once, even with a zero bound. The time a check
/// spends awaiting counts against the bound.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    bound: Duration,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let deadline = Instant::now() + bound;

    loop {
        match check().await {
            Probe::Ready(value) => return PollOutcome::Ready(value),
            Probe::Failed => return PollOutcome::Failed,
            Probe::Pending => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

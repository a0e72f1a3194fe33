//! The bounded-retry convergence primitive shared by every pipeline.
//!
//! Device convergence (route programming, VLAN propagation) is asynchronous
//! and the controller offers no completion callback; bounded polling with an
//! explicit timeout is the substitute. The timeout is caller-configurable
//! because resource kinds converge at very different speeds.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

/// Controller-reported state, collapsed to what the loop understands. The
/// per-kind string vocabularies live in the status probers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Pending,
    Converged,
    Diverged,
    Unknown,
}

/// Terminal result of a polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    TimedOut,
}

/// How the pause between probes evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same interval every iteration; attempts = floor(timeout / interval),
    /// with the first probe always allowed.
    Fixed,
    /// Interval halves every iteration toward zero, bounded by the budget.
    /// Detects the already-converged case fast while tolerating slow syncs.
    Halving,
    /// Interval doubles every iteration, capped by the remaining budget.
    Exponential,
}

/// One in-flight reconciliation attempt.
///
/// Owns the timeout budget for a single create/update/delete call and never
/// outlives it.
pub struct ReconcileJob {
    resource: String,
    timeout: Duration,
    interval: Duration,
    backoff: Backoff,
}

impl ReconcileJob {
    pub fn new(
        resource: impl Into<String>,
        timeout: Duration,
        interval: Duration,
        backoff: Backoff,
    ) -> Self {
        Self {
            resource: resource.into(),
            timeout,
            interval,
            backoff,
        }
    }

    /// Poll `probe` until convergence, timeout, or a fatal probe error.
    ///
    /// The first probe runs before any sleep; `Converged` returns
    /// immediately. A probe error is surfaced at once, never swallowed as
    /// "still pending" -- only convergence polling retries, not transport.
    pub async fn run<F, Fut, E>(&self, mut probe: F) -> std::result::Result<Outcome, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<ConvergenceStatus, E>>,
    {
        let job = Uuid::new_v4();
        let max_probes = match self.backoff {
            Backoff::Fixed => {
                let budget = if self.interval.is_zero() {
                    0
                } else {
                    (self.timeout.as_secs_f64() / self.interval.as_secs_f64()).floor() as u64
                };
                Some(budget.max(1))
            }
            _ => None,
        };

        let mut remaining = self.timeout;
        let mut interval = self.interval;
        let mut probes: u64 = 0;
        let mut last = ConvergenceStatus::Unknown;

        loop {
            let status = probe().await?;
            probes += 1;
            if status == ConvergenceStatus::Converged {
                debug!(job = %job, resource = %self.resource, probes, "converged");
                return Ok(Outcome::Converged);
            }
            last = status;

            let exhausted = match max_probes {
                Some(budget) => probes >= budget,
                None => remaining.is_zero() || interval.is_zero(),
            };
            if exhausted {
                warn!(
                    job = %job,
                    resource = %self.resource,
                    probes,
                    last = ?last,
                    "deployment timeout occurred"
                );
                return Ok(Outcome::TimedOut);
            }

            let pause = interval.min(remaining);
            debug!(
                job = %job,
                resource = %self.resource,
                probes,
                last = ?last,
                pause_secs = pause.as_secs(),
                "still pending"
            );
            sleep(pause).await;
            remaining = remaining.saturating_sub(pause);
            interval = match self.backoff {
                Backoff::Fixed => interval,
                // Whole-second halving so the interval actually reaches zero.
                Backoff::Halving => Duration::from_secs(interval.as_secs() / 2),
                Backoff::Exponential => interval.saturating_mul(2),
            };
        }
    }
}

/// Convenience wrapper for a one-shot polling run.
pub async fn reconcile<F, Fut, E>(
    resource: &str,
    timeout: Duration,
    interval: Duration,
    backoff: Backoff,
    probe: F,
) -> std::result::Result<Outcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<ConvergenceStatus, E>>,
{
    ReconcileJob::new(resource, timeout, interval, backoff)
        .run(probe)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Probe that walks through a fixed status sequence, repeating the last.
    fn scripted(
        statuses: &'static [ConvergenceStatus],
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Result<ConvergenceStatus, String>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let status = statuses[n.min(statuses.len() - 1)];
            std::future::ready(Ok(status))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_shorter_than_interval_probes_once() {
        let calls = counter();
        let outcome = reconcile(
            "test",
            secs(3),
            secs(5),
            Backoff::Fixed,
            scripted(&[ConvergenceStatus::Pending], calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_convergence_does_not_sleep() {
        let start = tokio::time::Instant::now();
        let calls = counter();
        let outcome = reconcile(
            "test",
            secs(300),
            secs(5),
            Backoff::Fixed,
            scripted(&[ConvergenceStatus::Converged], calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Converged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_converges_after_pending_probes() {
        // 20s budget at 5s = 4 attempts; Pending, Pending, Converged lands
        // at 10s of simulated time.
        let start = tokio::time::Instant::now();
        let calls = counter();
        let outcome = reconcile(
            "test",
            secs(20),
            secs(5),
            Backoff::Fixed,
            scripted(
                &[
                    ConvergenceStatus::Pending,
                    ConvergenceStatus::Pending,
                    ConvergenceStatus::Converged,
                ],
                calls.clone(),
            ),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Converged);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_times_out() {
        let calls = counter();
        let outcome = reconcile(
            "test",
            secs(20),
            secs(5),
            Backoff::Fixed,
            scripted(&[ConvergenceStatus::Pending], calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        // floor(20 / 5) = 4 attempts, sleeps only between them.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_error_is_fatal() {
        let calls = counter();
        let calls_inner = calls.clone();
        let result: Result<Outcome, String> =
            reconcile("test", secs(300), secs(5), Backoff::Fixed, move || {
                calls_inner.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err("controller unreachable".to_string()))
            })
            .await;
        assert_eq!(result.unwrap_err(), "controller unreachable");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn halving_interval_shrinks_toward_zero() {
        // 16s initial interval: sleeps 16, 8, 4, 2, 1 then the interval
        // floors to zero and the run times out within the 60s budget.
        let start = tokio::time::Instant::now();
        let calls = counter();
        let outcome = reconcile(
            "test",
            secs(60),
            secs(16),
            Backoff::Halving,
            scripted(&[ConvergenceStatus::Pending], calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(start.elapsed(), secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_interval_is_capped_by_budget() {
        // 5s doubling within a 20s budget: sleeps 5, 10, then the 5s
        // remainder, never past the budget.
        let start = tokio::time::Instant::now();
        let calls = counter();
        let outcome = reconcile(
            "test",
            secs(20),
            secs(5),
            Backoff::Exponential,
            scripted(&[ConvergenceStatus::Pending], calls.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), secs(20));
    }
}

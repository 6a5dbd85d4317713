use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded retry schedule. `backoff_ms[n - 1]` is the wait after attempt `n`;
/// attempts past the end of the table reuse its last entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff_ms: &[u64]) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff_ms.to_vec(),
        }
    }

    pub fn backoff(&self, attempt: usize) -> u64 {
        let idx = attempt.saturating_sub(1);
        self.backoff_ms
            .get(idx)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0)
    }

    pub fn has_attempts_left(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts
    }

    /// Runs `attempt` until it settles, the policy is exhausted, or
    /// `cancelled` reports true. `cancelled` is checked after every await.
    pub async fn run<T, F, Fut, C>(&self, mut attempt: F, cancelled: C) -> RetryOutcome<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Attempt<T>>,
        C: Fn() -> bool,
    {
        for n in 1..=self.max_attempts {
            if cancelled() {
                return RetryOutcome::Cancelled;
            }
            let result = attempt(n).await;
            if cancelled() {
                return RetryOutcome::Cancelled;
            }
            match result {
                Attempt::Done(value) => return RetryOutcome::Found(value),
                Attempt::Missing => return RetryOutcome::NotFound,
                Attempt::Retry => {}
            }
            if n < self.max_attempts {
                tokio::time::sleep(Duration::from_millis(self.backoff(n))).await;
            }
        }
        if cancelled() {
            return RetryOutcome::Cancelled;
        }
        RetryOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    Missing,
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Found(T),
    NotFound,
    Exhausted { attempts: usize },
    Cancelled,
}

impl<T> RetryOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            RetryOutcome::Found(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::time::Instant;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, &[500, 1_000, 2_000])
    }

    #[test]
    fn backoff_reuses_last_step() {
        let policy = RetryPolicy::new(5, &[100, 300]);
        assert_eq!(policy.backoff(1), 100);
        assert_eq!(policy.backoff(2), 300);
        assert_eq!(policy.backoff(4), 300);
        assert_eq!(RetryPolicy::new(2, &[]).backoff(1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_backoff() {
        let started = Instant::now();
        let outcome = policy()
            .run(
                |n| async move {
                    if n == 3 {
                        Attempt::Done(n)
                    } else {
                        Attempt::Retry
                    }
                },
                || false,
            )
            .await;
        assert_eq!(outcome, RetryOutcome::Found(3));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_500));
        assert!(elapsed < Duration::from_millis(1_600));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_without_trailing_sleep() {
        let started = Instant::now();
        let outcome: RetryOutcome<()> = policy().run(|_| async { Attempt::Retry }, || false).await;
        assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 3 });
        assert!(started.elapsed() < Duration::from_millis(1_600));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_stops_immediately() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<()> = policy()
            .run(
                |_| {
                    calls.set(calls.get() + 1);
                    async { Attempt::Missing }
                },
                || false,
            )
            .await;
        assert_eq!(outcome, RetryOutcome::NotFound);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_checked_between_attempts() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<()> = policy()
            .run(
                |_| {
                    calls.set(calls.get() + 1);
                    async { Attempt::Retry }
                },
                || calls.get() >= 2,
            )
            .await;
        assert_eq!(outcome, RetryOutcome::Cancelled);
        assert_eq!(calls.get(), 2);
    }
}

//! Bounded retry primitive shared by the launch-level and scenario-level loops
//!
//! [`Attempts`] yields `1..=max` attempts; each [`Attempt`] knows how long to
//! back off after it fails. [`retry`] drives a closure through the schedule
//! and returns a typed [`RetryOutcome`].

use std::future::Future;
use std::time::Duration;

use autoheal_common::RetryPolicy;
use tracing::debug;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `min(base * multiplier^(n-1), max)` after attempt `n`.
    Exponential(RetryPolicy),
    /// `step * n` after attempt `n`.
    Linear { step: Duration },
}

impl Backoff {
    /// Delay to wait after attempt `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential(policy) => policy.delay_for(attempt),
            Backoff::Linear { step } => step.saturating_mul(attempt.max(1)),
        }
    }
}

/// Iterator over a bounded attempt schedule
#[derive(Debug, Clone)]
pub struct Attempts {
    max: u32,
    next: u32,
    backoff: Backoff,
}

impl Attempts {
    /// `max` is clamped to at least one attempt.
    pub fn new(max: u32, backoff: Backoff) -> Self {
        Self {
            max: max.max(1),
            next: 1,
            backoff,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.max_retries, Backoff::Exponential(*policy))
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Iterator for Attempts {
    type Item = Attempt;

    fn next(&mut self) -> Option<Attempt> {
        if self.next > self.max {
            return None;
        }
        let attempt = Attempt {
            number: self.next,
            max: self.max,
            backoff: self.backoff,
        };
        self.next += 1;
        Some(attempt)
    }
}

/// One attempt in a schedule
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    pub number: u32,
    pub max: u32,
    backoff: Backoff,
}

impl Attempt {
    pub fn is_first(&self) -> bool {
        self.number == 1
    }

    pub fn is_last(&self) -> bool {
        self.number >= self.max
    }

    pub fn delay(&self) -> Duration {
        self.backoff.delay_after(self.number)
    }

    /// Sleep the backoff delay that follows this attempt. Not cancellable.
    pub async fn backoff(&self) {
        let delay = self.delay();
        debug!(attempt = self.number, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
    }
}

/// Typed result of a bounded retry loop
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Run `op` once per attempt until it succeeds or the schedule runs out.
/// The backoff sleep happens between attempts only, never after the last one.
pub async fn retry<T, E, F, Fut>(attempts: Attempts, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = attempts;
    // The schedule always yields at least one attempt.
    let mut current = match attempts.next() {
        Some(first) => first,
        None => Attempt {
            number: 1,
            max: 1,
            backoff: attempts.backoff,
        },
    };
    loop {
        match op(current).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: current.number,
                }
            }
            Err(last_error) => match attempts.next() {
                Some(next) => {
                    current.backoff().await;
                    current = next;
                }
                None => {
                    return RetryOutcome::Exhausted {
                        last_error,
                        attempts: current.number,
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_attempts_are_bounded_and_clamped() {
        let numbers: Vec<u32> = Attempts::new(3, Backoff::Linear { step: Duration::ZERO })
            .map(|a| a.number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let zero: Vec<Attempt> = Attempts::new(0, Backoff::Linear { step: Duration::ZERO }).collect();
        assert_eq!(zero.len(), 1);
        assert!(zero[0].is_last());
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = Backoff::Linear {
            step: Duration::from_secs(2),
        };
        assert_eq!(backoff.delay_after(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<&str, String> = retry(
            Attempts::new(5, Backoff::Linear { step: Duration::from_secs(1) }),
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt.number < 3 {
                        Err(format!("attempt {} failed", attempt.number))
                    } else {
                        Ok("up")
                    }
                }
            },
        )
        .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(calls.get(), 3);
        assert_eq!(outcome.into_result().unwrap(), "up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_with_last_error() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 2.0).unwrap();
        let outcome: RetryOutcome<(), String> =
            retry(Attempts::from_policy(&policy), |attempt| async move {
                Err(format!("attempt {}", attempt.number))
            })
            .await;
        match outcome {
            RetryOutcome::Exhausted { last_error, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "attempt 3");
            }
            RetryOutcome::Success { .. } => panic!("expected exhaustion"),
        }
        // 100ms + 200ms between three attempts, nothing after the last one.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}

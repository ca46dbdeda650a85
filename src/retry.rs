//! Retry-with-backoff execution.
//!
//! Upstream camera hosts rate-limit aggressively, so every raw request is
//! followed by a mandatory pacing sleep regardless of outcome. The pacing
//! delay is independent of the failure backoff delay, which only applies
//! between failed attempts.

use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

/// Outcome of one `RetryExecutor::run` invocation.
#[derive(Clone, Debug, Serialize)]
pub struct Attempt {
    pub success: bool,
    #[serde(rename = "latency_secs", with = "duration_secs")]
    pub latency: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Attempt {
    fn succeeded(latency: Duration, diagnostic: String) -> Self {
        Self {
            success: true,
            latency,
            error: None,
            diagnostic: Some(diagnostic),
        }
    }

    fn failed(latency: Duration, error: String) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error),
            diagnostic: None,
        }
    }
}

/// Delay parameters for a retried operation.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Raw attempts per `run` call, including the first.
    pub max_attempts: u32,
    /// Backoff delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the backoff delay after each failure.
    pub backoff_factor: f64,
    /// Minimum spacing enforced after every attempt, success or not.
    pub pacing_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            pacing_delay: Duration::from_secs(1),
        }
    }
}

/// Stateless wrapper that drives a fallible operation through a
/// [`RetryPolicy`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// `Ok` carries a human-readable diagnostic which ends up in the
    /// returned [`Attempt`]. The first success returns immediately; when
    /// every attempt fails, the returned attempt carries the last error.
    pub fn run<F>(&self, op: F) -> Attempt
    where
        F: FnMut() -> Result<String>,
    {
        self.run_with(op, std::thread::sleep)
    }

    fn run_with<F, S>(&self, mut op: F, mut sleep: S) -> Attempt
    where
        F: FnMut() -> Result<String>,
        S: FnMut(Duration),
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_delay;
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=attempts {
            let start = Instant::now();
            let result = op();
            let latency = start.elapsed();

            // Pacing applies after every raw attempt, even the last one.
            if !self.policy.pacing_delay.is_zero() {
                sleep(self.policy.pacing_delay);
            }

            match result {
                Ok(diagnostic) => return Attempt::succeeded(latency, diagnostic),
                Err(err) => {
                    last_error = format!("{err:#}");
                    if attempt < attempts {
                        sleep(backoff);
                        backoff = backoff.mul_f64(self.policy.backoff_factor);
                    }
                }
            }
        }

        Attempt::failed(Duration::ZERO, last_error)
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::RefCell;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            pacing_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn returns_first_success_without_backoff() {
        let executor = RetryExecutor::new(policy());
        let sleeps = RefCell::new(Vec::new());
        let mut calls = 0;

        let attempt = executor.run_with(
            || {
                calls += 1;
                Ok("frame ok".to_string())
            },
            |d| sleeps.borrow_mut().push(d),
        );

        assert!(attempt.success);
        assert_eq!(calls, 1);
        assert_eq!(attempt.diagnostic.as_deref(), Some("frame ok"));
        // Only the pacing sleep, no backoff.
        assert_eq!(*sleeps.borrow(), vec![Duration::from_millis(250)]);
    }

    #[test]
    fn exhausts_attempts_and_keeps_last_error() {
        let executor = RetryExecutor::new(policy());
        let mut calls = 0;

        let attempt = executor.run_with(
            || {
                calls += 1;
                Err(anyhow!("fetch failed (attempt {calls})"))
            },
            |_| {},
        );

        assert_eq!(calls, 3);
        assert!(!attempt.success);
        assert_eq!(attempt.error.as_deref(), Some("fetch failed (attempt 3)"));
        assert!(attempt.diagnostic.is_none());
    }

    #[test]
    fn backoff_doubles_and_pacing_follows_every_attempt() {
        let executor = RetryExecutor::new(policy());
        let sleeps = RefCell::new(Vec::new());

        let _ = executor.run_with(
            || Err(anyhow!("down")),
            |d| sleeps.borrow_mut().push(d),
        );

        let pacing = Duration::from_millis(250);
        assert_eq!(
            *sleeps.borrow(),
            vec![
                pacing,
                Duration::from_secs(1),
                pacing,
                Duration::from_secs(2),
                pacing,
            ]
        );
    }

    #[test]
    fn pacing_follows_success_too() {
        let executor = RetryExecutor::new(policy());
        let sleeps = RefCell::new(Vec::new());
        let mut calls = 0;

        let _ = executor.run_with(
            || {
                calls += 1;
                if calls < 2 {
                    Err(anyhow!("blank frame"))
                } else {
                    Ok("ok".to_string())
                }
            },
            |d| sleeps.borrow_mut().push(d),
        );

        assert_eq!(
            *sleeps.borrow(),
            vec![
                Duration::from_millis(250),
                Duration::from_secs(1),
                Duration::from_millis(250),
            ]
        );
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 0,
            pacing_delay: Duration::ZERO,
            ..policy()
        });
        let mut calls = 0;

        let attempt = executor.run_with(
            || {
                calls += 1;
                Ok("ok".to_string())
            },
            |_| panic!("no sleeps expected"),
        );

        assert!(attempt.success);
        assert_eq!(calls, 1);
    }
}

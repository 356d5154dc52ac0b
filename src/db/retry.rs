//! Bounded fixed-backoff wait used while the backing store comes up.
use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Outcome of a successful wait.
#[derive(Debug)]
pub struct Ready<T> {
    pub value: T,
    pub attempts: u32,
}

/// Call `attempt` until it succeeds or the policy runs out of attempts.
///
/// `attempt` receives the 1-based attempt number. The sleep happens only
/// between attempts, never after the last one. On exhaustion the last error
/// is returned together with the number of attempts made.
pub fn wait_for<T, E, F>(policy: RetryPolicy, mut attempt: F) -> Result<Ready<T>, (E, u32)>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut n = 0;
    loop {
        n += 1;
        match attempt(n) {
            Ok(value) => {
                info!("Database connection successful (attempt {n})");
                return Ok(Ready { value, attempts: n });
            }
            Err(e) if n >= policy.max_attempts => {
                warn!("Database connection failed: {e}. Giving up after {n} attempts.");
                return Err((e, n));
            }
            Err(e) => {
                warn!(
                    "Database connection failed: {e}. Retrying in {:?}.",
                    policy.interval
                );
                thread::sleep(policy.interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_nth_attempt() {
        let policy = RetryPolicy::new(Duration::ZERO, 10);
        let mut calls = 0;
        let ready = wait_for(policy, |n| {
            calls += 1;
            if n < 4 { Err("not ready") } else { Ok(n * 10) }
        })
        .unwrap();

        assert_eq!(ready.attempts, 4);
        assert_eq!(ready.value, 40);
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(Duration::ZERO, 3);
        let mut calls = 0;
        let err = wait_for::<(), _, _>(policy, |_| {
            calls += 1;
            Err("down")
        })
        .unwrap_err();

        assert_eq!(err, ("down", 3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(Duration::ZERO, 0);
        assert_eq!(policy.max_attempts, 1);
        let ready = wait_for::<_, &str, _>(policy, |n| Ok(n)).unwrap();
        assert_eq!(ready.attempts, 1);
    }
}

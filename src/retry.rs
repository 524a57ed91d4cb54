//! Bounded retries with a liveness heartbeat for long-running operations.
//!
//! [`run_with_retry`] runs an attempt and a heartbeat ticker side by side in
//! the same task. The ticker is dropped the moment the attempt resolves, so
//! it can neither outlive the attempt nor influence its result.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tracing::{error, info};

/// Retry and heartbeat settings for one wrapped operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fixed pause between a failed attempt and the next one.
    pub inter_attempt_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            inter_attempt_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// A liveness tick emitted while an attempt is in flight.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat<'a> {
    pub description: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Time since the attempt started.
    pub elapsed: Duration,
    /// 1-based count of heartbeats within this attempt.
    pub sequence: u64,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{description} failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        description: String,
        attempts: u32,
        last: E,
    },
}

/// Default heartbeat sink: one `info` line per tick.
pub fn log_heartbeat(hb: &Heartbeat<'_>) {
    info!(
        description = hb.description,
        attempt = hb.attempt,
        max_attempts = hb.max_attempts,
        elapsed_secs = hb.elapsed.as_secs(),
        beat = hb.sequence,
        "heartbeat: still in progress"
    );
}

/// Run `op` up to `policy.max_attempts` times.
///
/// `op` receives the 1-based attempt number. `on_heartbeat` is called every
/// `heartbeat_interval` while an attempt runs, starting when it begins.
pub async fn run_with_retry<T, E, Op, Fut, H>(
    policy: &RetryPolicy,
    description: &str,
    mut op: Op,
    mut on_heartbeat: H,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    H: FnMut(&Heartbeat<'_>),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!(description, attempt, max_attempts, "attempt starting");

        let result = with_heartbeat(policy.heartbeat_interval, op(attempt), |elapsed, sequence| {
            on_heartbeat(&Heartbeat {
                description,
                attempt,
                max_attempts,
                elapsed,
                sequence,
            })
        })
        .await;

        match result {
            Ok(value) => {
                info!(description, attempt, "attempt succeeded");
                return Ok(value);
            }
            Err(e) => {
                error!(description, attempt, max_attempts, error = %e, "attempt failed");
                if attempt >= max_attempts {
                    return Err(RetryError::AttemptsExhausted {
                        description: description.to_string(),
                        attempts: attempt,
                        last: e,
                    });
                }
                info!(
                    description,
                    delay_ms = policy.inter_attempt_delay.as_millis() as u64,
                    "retrying after delay"
                );
                sleep(policy.inter_attempt_delay).await;
            }
        }
    }
}

async fn with_heartbeat<F, B>(period: Duration, fut: F, mut beat: B) -> F::Output
where
    F: Future,
    B: FnMut(Duration, u64),
{
    let started = Instant::now();
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(fut);

    let mut sequence = 0;
    loop {
        tokio::select! {
            // The attempt wins ties so no beat is reported for a finished attempt.
            biased;
            out = &mut fut => return out,
            _ = ticker.tick() => {
                sequence += 1;
                beat(started.elapsed(), sequence);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds() {
        let calls = Cell::new(0u32);
        let mut beats: Vec<(u32, Duration)> = Vec::new();
        let started = Instant::now();

        let result: Result<&str, RetryError<String>> = run_with_retry(
            &RetryPolicy::default(),
            "build and upload",
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        sleep(Duration::from_secs(10)).await;
                        Err(format!("transient failure {attempt}"))
                    } else {
                        sleep(Duration::from_secs(65)).await;
                        Ok("uploaded")
                    }
                }
            },
            |hb| beats.push((hb.attempt, hb.elapsed)),
        )
        .await;

        assert_eq!(result.unwrap(), "uploaded");
        assert_eq!(calls.get(), 3);
        // 10s + 5s + 10s + 5s + 65s
        assert_eq!(started.elapsed(), Duration::from_secs(95));

        let third: Vec<Duration> = beats
            .iter()
            .filter(|(attempt, _)| *attempt == 3)
            .map(|(_, elapsed)| *elapsed)
            .collect();
        assert_eq!(
            third,
            vec![Duration::ZERO, Duration::from_secs(30), Duration::from_secs(60)]
        );

        // Nothing keeps ticking once the call has returned.
        let count = beats.len();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(beats.len(), count);
        assert!(beats.iter().all(|(_, elapsed)| *elapsed < Duration::from_secs(65)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_with_last_error() {
        let calls = Cell::new(0u32);
        let started = Instant::now();

        let result: Result<(), RetryError<String>> = run_with_retry(
            &RetryPolicy::default(),
            "publish",
            |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("boom {attempt}")) }
            },
            |_| {},
        )
        .await;

        let RetryError::AttemptsExhausted { attempts, last, .. } = result.unwrap_err();
        assert_eq!(attempts, 3);
        assert_eq!(last, "boom 3");
        assert_eq!(calls.get(), 3);
        // Two inter-attempt delays, none after the last failure.
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_does_not_wait() {
        let started = Instant::now();
        let result: Result<u32, RetryError<String>> = run_with_retry(
            &RetryPolicy::default(),
            "noop",
            |_| async { Ok(7) },
            |_| {},
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let result: Result<(), RetryError<&str>> = run_with_retry(
            &policy,
            "once",
            |_| {
                calls.set(calls.get() + 1);
                async { Err("nope") }
            },
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn exhausted_display() {
        let err: RetryError<String> = RetryError::AttemptsExhausted {
            description: "publish".into(),
            attempts: 3,
            last: "timeout".into(),
        };
        assert_eq!(err.to_string(), "publish failed after 3 attempts: timeout");
    }
}

//! Fixed-interval polling for dependencies that become ready on their own schedule.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::UploadError;

/// Poll `probe` every `interval` until it yields a value.
///
/// With `timeout: None` this waits forever. Otherwise it fails with
/// [`UploadError::ReadinessTimeout`] once more than `timeout` has elapsed
/// without a successful probe. There is no backoff.
pub async fn poll_until_ready<T, F, Fut>(
    what: &str,
    mut probe: F,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<T, UploadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let mut probes: u64 = 0;

    loop {
        probes += 1;
        if let Some(value) = probe().await {
            debug!(what, probes, elapsed_ms = started.elapsed().as_millis() as u64, "ready");
            return Ok(value);
        }

        let waited = started.elapsed();
        if let Some(limit) = timeout
            && waited >= limit
        {
            return Err(UploadError::ReadinessTimeout {
                what: what.to_string(),
                waited,
            });
        }

        sleep(interval).await;
    }
}

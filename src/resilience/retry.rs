//! Probe retry loop.
//!
//! Only transient errors (timeouts, network failures) are retried;
//! assertion failures are deterministic outcomes and never reach this
//! code path.

use std::future::Future;
use std::time::Duration;

use crate::checks::probe::ProbeError;
use crate::config::schema::RetryPolicy;

/// Run a probe operation with up to `policy.count` retries after the first
/// attempt, spaced `policy.interval` seconds apart.
pub async fn run_probe<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.count => {
                attempt += 1;
                tracing::debug!(
                    attempt,
                    max = policy.count,
                    error = %error,
                    "Transient probe failure, retrying"
                );
                tokio::time::sleep(Duration::from_secs(policy.interval)).await;
            }
            Err(error) => return Err(error),
        }
    }
}

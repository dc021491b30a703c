use std::fmt::Display;
use std::future::Future;

use reqwatch_core::RetryPolicy;
use tracing::warn;

use crate::Transient;

/// Run `op` until it succeeds, fails permanently, or the policy's attempts
/// are used up. Returns the last error.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < attempts && e.is_transient() => {
                let delay = policy.delay_after(attempt);
                warn!(
                    what,
                    attempt = attempt + 1,
                    of = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

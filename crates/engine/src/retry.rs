use std::future::Future;

use powermgmt_core::config::DispatchConfig;
use tracing::warn;

use crate::traits::ControlError;

/// Run `call`, retrying retryable failures with the configured backoff.
pub async fn with_retry<T, F, Fut>(policy: &DispatchConfig, op: &str, mut call: F) -> Result<T, ControlError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.retry_attempts => {
                let delay = policy.backoff(attempt);
                warn!(op, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "Retrying control-plane call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

//! Readiness retry logic
//!
//! Freshly started infrastructure units take a while to accept connections.
//! [`retry_until_ready`] repeats an operation with exponential backoff while
//! its error is transient, until a total wait budget elapses.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Retry `operation` while `is_transient` holds for its error
///
/// **Backoff Strategy:**
/// - Initial delay: 100ms
/// - Max delay: 2s
/// - Multiplier: 2 (exponential)
///
/// Non-transient errors return immediately; the last transient error is
/// returned once `max_wait` has elapsed.
pub async fn retry_until_ready<F, Fut, T, E>(
    operation_name: &str,
    max_wait: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_transient(&err) {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_wait {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "Gave up waiting for readiness"
                    );
                    return Err(err);
                }

                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Not ready, will retry after backoff"
                );

                tokio::time::sleep(backoff.min(max_wait - elapsed)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

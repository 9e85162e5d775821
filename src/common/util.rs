//! Small utilities shared across services

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp, milliseconds.
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Retry with a fixed delay between attempts.
///
/// Used for lookups that race an eventual registration, e.g. resolving a
/// server id the discovery registry has not seen yet.
pub async fn retry_fixed<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut last_err = None;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_retries => {
                tracing::debug!(
                    "Attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => last_err = Some(e),
        }

        if last_err.is_some() {
            break;
        }
    }

    Err(last_err.unwrap_or_else(|| crate::Error::Internal("Max retries exceeded".into())))
}

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

pub(crate) const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;
const MAX_JITTER_MS: u64 = 100;

pub(crate) fn calculate_backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    let exponential = BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis((exponential + jitter).min(MAX_BACKOFF_MS))
}

/// Transient failures talking to the local agent: refused/reset connections,
/// timeouts, or the agent answering 503 while it is still starting up.
pub(crate) fn is_transient(error: &anyhow::Error) -> bool {
    if let Some(req_err) = error.downcast_ref::<reqwest::Error>() {
        if req_err.is_connect() || req_err.is_timeout() {
            return true;
        }
        if let Some(status) = req_err.status() {
            return status == reqwest::StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    let msg = error.to_string().to_lowercase();
    msg.contains("503")
        || msg.contains("connection")
        || msg.contains("timed out")
        || msg.contains("reset")
}

/// Retries idempotent agent reads. Writes (firmware transfer) never go
/// through here.
pub(crate) async fn with_retry<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempts >= MAX_RETRIES || !is_transient(&e) {
                    return Err(e);
                }
                let delay = calculate_backoff(attempts);
                tracing::debug!(attempt = attempts, ?delay, "Retrying agent request: {e}");
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
        }
    }
}

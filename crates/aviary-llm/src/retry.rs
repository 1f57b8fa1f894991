//! Bounded retry with exponential backoff, shared by every concrete client.
//! Up to 3 attempts, retrying only on 5xx/429/timeouts. Transient
//! classification is the caller's job (via `classify_status`); this helper
//! just drives the loop.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 250;

/// Run `attempt` up to `MAX_ATTEMPTS` times. `attempt` returns `Err(true)`
/// for a transient failure (eligible for retry) and `Err(false)` for a
/// permanent one (returned immediately).
pub async fn retry_with_backoff<T, F, Fut>(op_name: &str, mut attempt: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, (LlmError, bool)>>,
{
    let mut last_err = None;
    for n in 0..MAX_ATTEMPTS {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err((err, transient)) => {
                if !transient || n + 1 == MAX_ATTEMPTS {
                    if transient {
                        warn!(op = op_name, attempts = n + 1, "llm call exhausted retries");
                    }
                    return Err(err);
                }
                let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(n));
                debug!(op = op_name, attempt = n + 1, delay_ms = delay.as_millis() as u64, "retrying transient llm failure");
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Transient(format!("{op_name}: retries exhausted"))))
}

/// Classify an HTTP status into (message, is_transient).
pub fn classify_status(status: u16, body: &str) -> (LlmError, bool) {
    let transient = status == 429 || status >= 500 || status == 408;
    let msg = format!("http {status}: {body}");
    if transient {
        (LlmError::Transient(msg), true)
    } else {
        (LlmError::Permanent(msg), false)
    }
}

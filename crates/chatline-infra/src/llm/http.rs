//! HTTP plumbing shared by the streaming providers.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

use chatline_types::llm::LlmError;

/// Send a streaming request and fail fast on a non-success status.
///
/// The response body is only read for error statuses; on success it is
/// handed back untouched for SSE decoding.
pub(crate) async fn send_streaming(request: RequestBuilder) -> Result<Response, LlmError> {
    let response = request.send().await.map_err(|e| LlmError::Provider {
        message: format!("request failed: {e}"),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    warn!(%status, "Provider rejected streaming request");
    Err(status_error(status, retry_after_ms, body))
}

/// Map an HTTP error status to an [`LlmError`].
pub(crate) fn status_error(status: StatusCode, retry_after_ms: Option<u64>, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited { retry_after_ms },
        503 | 529 => LlmError::Overloaded(body),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

/// `Retry-After` in whole seconds, converted to milliseconds.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1000)
}

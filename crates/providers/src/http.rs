//! Shared HTTP plumbing for provider implementations: transport error
//! classification and the status-code to error-taxonomy mapping.

use sqlsage_core::error::ProviderError;
use tracing::warn;

/// Classify a transport-level request failure.
pub(crate) fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

pub(crate) fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(5)
}

/// Map a non-200 status to the provider error taxonomy.
pub(crate) async fn fail_for_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200 => Ok(response),
        429 => Err(ProviderError::RateLimited {
            retry_after_secs: retry_after_secs(&response),
        }),
        401 | 403 => Err(ProviderError::AuthenticationFailed(
            "API key rejected or insufficient permissions".into(),
        )),
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Provider returned an error");
            Err(ProviderError::ApiError {
                status_code: status,
                message: body,
            })
        }
    }
}

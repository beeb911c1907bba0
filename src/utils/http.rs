// src/utils/http.rs

//! HTTP client utilities.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, FetchResult, Result};
use crate::models::HttpConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Run a request future until it completes or `cancel` fires.
///
/// Dropping the future on cancellation aborts the underlying connection.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> FetchResult<T>
where
    F: Future<Output = FetchResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::cancelled()),
        result = fut => result,
    }
}

/// Send a request and return the body as text, failing on non-success status.
pub async fn send_text(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> FetchResult<String> {
    cancellable(cancel, async move {
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    })
    .await
}

/// Send a request and return the raw body, failing on non-success status.
pub async fn send_bytes(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> FetchResult<Vec<u8>> {
    cancellable(cancel, async move {
        let response = request.send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    })
    .await
}

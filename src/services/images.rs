// src/services/images.rs

//! Inline image embedding.
//!
//! Thumbnails are fetched as a secondary request per record and stored as
//! base64. A failed image fetch never drops the record; cancellation fails
//! the whole batch.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, FetchResult};
use crate::models::RawRecord;
use crate::utils::http::send_bytes;

/// Fetch one image and encode it as base64.
pub async fn fetch_image_base64(
    client: &Client,
    url: &str,
    cancel: &CancellationToken,
) -> FetchResult<String> {
    let bytes = send_bytes(client.get(url), cancel).await?;
    Ok(STANDARD.encode(bytes))
}

/// Embed images into records, `concurrency` requests at a time.
///
/// Output order matches input order. Records without an image URL, or whose
/// image fails to load, are returned with an empty image field. Fails only
/// when `cancel` fires, since the page is then incomplete.
pub async fn embed_images(
    client: &Client,
    records: Vec<(RawRecord, Option<String>)>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> FetchResult<Vec<RawRecord>> {
    let embedded: Vec<RawRecord> = stream::iter(records)
        .map(|(mut record, image_url)| async move {
            let Some(url) = image_url else {
                return record;
            };
            if cancel.is_cancelled() {
                return record;
            }
            match fetch_image_base64(client, &url, cancel).await {
                Ok(encoded) => record.image_base64 = Some(encoded),
                Err(e) if cancel.is_cancelled() => {
                    log::debug!("Image fetch for {} cancelled: {}", record.external_id, e);
                }
                Err(e) => {
                    log::warn!(
                        "Image fetch failed for {} ({}): {}",
                        record.external_id,
                        url,
                        e
                    );
                }
            }
            record
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    if cancel.is_cancelled() {
        return Err(FetchError::cancelled());
    }
    Ok(embedded)
}

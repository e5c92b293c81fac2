//! Syntactic URL checks and in-batch duplicate detection.

use snip_core::{BatchItem, ItemError, ValidationError};
use std::collections::HashSet;
use tracing::debug;

const HTTP_PREFIX: &str = "http://";
const HTTPS_PREFIX: &str = "https://";

/// Trims `url` and checks it looks like an http(s) URL.
///
/// This is a coarse check: a scheme prefix and at least one `.` somewhere.
/// Returns the trimmed URL on success.
pub fn validate(url: &str) -> Result<String, ValidationError> {
    let url = url.trim();

    if !url.starts_with(HTTP_PREFIX) && !url.starts_with(HTTPS_PREFIX) {
        debug!(url, "url has no http(s) prefix");
        return Err(ValidationError::NoPrefix);
    }
    if !url.contains('.') {
        debug!(url, "url has no dot");
        return Err(ValidationError::NoDot);
    }

    Ok(url.to_string())
}

/// Validates every item in place, replacing each URL with its trimmed form.
pub fn validate_batch(items: &mut [BatchItem]) {
    for item in items.iter_mut() {
        match validate(&item.original_url) {
            Ok(cleaned) => item.original_url = cleaned,
            Err(err) => item.error = Some(ItemError::Invalid(err)),
        }
    }
}

/// Flags every pending item whose URL already appeared earlier in the batch.
///
/// The first occurrence stays pending. Items already carrying an error are
/// ignored and do not claim their URL.
pub fn detect_duplicates(items: &mut [BatchItem]) {
    let mut seen = HashSet::with_capacity(items.len());

    for item in items.iter_mut().filter(|item| item.is_pending()) {
        if !seen.insert(item.original_url.clone()) {
            debug!(correlation_id = %item.correlation_id, url = %item.original_url, "duplicate url in batch");
            item.error = Some(ItemError::UrlExists);
        }
    }
}

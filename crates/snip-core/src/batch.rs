use crate::record::{OwnerId, UrlRecord};
use crate::shortcode::ShortCode;
use serde::Serialize;
use thiserror::Error;

/// Reasons a candidate URL is rejected by syntactic validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    #[error("has no prefix http:// or https://")]
    NoPrefix,
    #[error("has no dot in url")]
    NoDot,
}

/// Per-item failure of a batch element.
///
/// These never abort a batch; they are reported back next to the item's
/// correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemError {
    #[error("invalid url: {0}")]
    Invalid(ValidationError),
    #[error("url already exists")]
    UrlExists,
}

/// One element of a bulk save request, tracked through every stage of the
/// batch workflow and consumed once to build the response.
///
/// Batch items are never persisted themselves; only the [`UrlRecord`] built
/// from a successful item is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Caller-supplied id, passed through unchanged.
    pub correlation_id: String,
    pub original_url: String,
    pub short_code: Option<ShortCode>,
    pub deleted: bool,
    pub error: Option<ItemError>,
}

impl BatchItem {
    pub fn new(correlation_id: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            original_url: original_url.into(),
            short_code: None,
            deleted: false,
            error: None,
        }
    }

    /// Returns `true` while no stage has flagged the item.
    pub fn is_pending(&self) -> bool {
        self.error.is_none()
    }

    /// Marks the item as already stored, backfilling the stored code.
    pub fn mark_existing(&mut self, stored: &UrlRecord) {
        self.error = Some(ItemError::UrlExists);
        self.short_code = Some(stored.short_code.clone());
        self.deleted = stored.deleted;
    }

    /// Builds the record to persist for a pending item that has a code.
    pub fn to_record(&self, owner: OwnerId) -> Option<UrlRecord> {
        if !self.is_pending() {
            return None;
        }
        self.short_code
            .as_ref()
            .map(|code| UrlRecord::new(code.clone(), self.original_url.clone(), owner))
    }
}

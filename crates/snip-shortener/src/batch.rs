use serde::{Deserialize, Serialize};
use snip_core::{BatchItem, ItemError, ShortCode};
use std::collections::HashMap;

/// One element of a bulk save request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub correlation_id: String,
    pub original_url: String,
}

impl BatchRequest {
    pub fn new(correlation_id: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            original_url: original_url.into(),
        }
    }
}

impl From<BatchRequest> for BatchItem {
    fn from(value: BatchRequest) -> Self {
        BatchItem::new(value.correlation_id, value.original_url)
    }
}

/// The result for one submitted batch element.
///
/// Successes and `UrlExists` conflicts carry a public short URL; invalid
/// items carry only the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_url: Option<String>,
    #[serde(skip)]
    pub error: Option<ItemError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Builds one outcome per item, in input order.
///
/// A duplicate reports the code of the first occurrence of its URL, so it
/// points at the link that actually exists rather than at the unused code
/// drawn for it.
pub(crate) fn respond(items: Vec<BatchItem>, base_url: &str) -> Vec<BatchOutcome> {
    let mut canonical: HashMap<String, ShortCode> = HashMap::new();
    for item in &items {
        if matches!(item.error, Some(ItemError::Invalid(_))) {
            continue;
        }
        if let Some(code) = &item.short_code {
            canonical
                .entry(item.original_url.clone())
                .or_insert_with(|| code.clone());
        }
    }

    items
        .into_iter()
        .map(|item| {
            let short_url = match item.error {
                Some(ItemError::Invalid(_)) => None,
                _ => canonical
                    .get(&item.original_url)
                    .map(|code| code.to_url(base_url)),
            };
            BatchOutcome {
                correlation_id: item.correlation_id,
                short_url,
                error: item.error,
                reason: item.error.map(|err| err.to_string()),
            }
        })
        .collect()
}

use crate::shortcode::ShortCode;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Identifier of the (anonymous) owner a URL was shortened for.
///
/// Owners are minted by [`Repository::new_owner`][crate::Repository::new_owner]
/// and resolved by the caller before the core is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(i64);

impl OwnerId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for OwnerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored URL mapping.
///
/// `short_code` is unique across the whole store and `(owner, original_url)`
/// is unique per owner. `deleted` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub short_code: ShortCode,
    pub original_url: String,
    pub owner: OwnerId,
    pub deleted: bool,
}

impl UrlRecord {
    /// Creates a live (not deleted) record.
    pub fn new(short_code: ShortCode, original_url: impl Into<String>, owner: OwnerId) -> Self {
        Self {
            short_code,
            original_url: original_url.into(),
            owner,
            deleted: false,
        }
    }
}

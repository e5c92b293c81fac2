use crate::batch::{BatchOutcome, BatchRequest};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use snip_core::{OwnerId, ShortCode, UrlRecord};
use tokio::task::JoinHandle;

/// A freshly created short link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortened {
    pub code: ShortCode,
    pub short_url: String,
}

/// One live link in an owner's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerUrl {
    pub short_url: String,
    pub original_url: String,
}

/// The operations an outer transport needs, usable as `Arc<dyn Shortener>`.
///
/// Every call receives the owner already resolved by the caller.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens one URL. Saving a URL the owner already shortened fails with
    /// `UrlExists` carrying the existing code.
    async fn shorten(&self, owner: OwnerId, url: &str) -> Result<Shortened>;

    /// Shortens many URLs, returning one outcome per request in input order.
    async fn shorten_batch(
        &self,
        owner: OwnerId,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<BatchOutcome>>;

    /// Looks up a code for redirection.
    async fn resolve(&self, code: &ShortCode) -> Result<UrlRecord>;

    /// Lists the owner's live links.
    async fn owner_urls(&self, owner: OwnerId) -> Result<Vec<OwnerUrl>>;

    /// Schedules soft deletion of `codes` and returns without waiting.
    fn delete(&self, owner: OwnerId, codes: Vec<ShortCode>) -> JoinHandle<()>;

    async fn new_owner(&self) -> Result<OwnerId>;

    async fn ping(&self) -> Result<()>;
}

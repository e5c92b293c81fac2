use crate::batch::BatchItem;
use crate::error::Result;
use crate::record::{OwnerId, UrlRecord};
use crate::shortcode::ShortCode;
use async_trait::async_trait;

/// A read-only view of a repository.
///
/// Lookups report "not found" as `Ok(None)`; only infrastructure failures
/// are errors.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Looks up a record by short code.
    ///
    /// Short codes are unique across the whole store, so this lookup is not
    /// scoped by owner. Soft-deleted records are returned with `deleted` set.
    async fn check_id(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Looks up the record `owner` created for `url`, if any.
    async fn check_url(&self, owner: OwnerId, url: &str) -> Result<Option<UrlRecord>>;

    /// Bulk existence check.
    ///
    /// Every pending item whose URL is already stored for `owner` is marked
    /// with [`ItemError::UrlExists`][crate::ItemError::UrlExists] and has its
    /// code and deletion flag backfilled from the stored record. Items that
    /// already carry an error are left untouched.
    async fn check_batch_url(&self, owner: OwnerId, items: &mut [BatchItem]) -> Result<()>;

    /// Returns every record created by `owner`, including soft-deleted ones.
    async fn urls_by_owner(&self, owner: OwnerId) -> Result<Vec<UrlRecord>>;

    /// Liveness check without side effects.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Inserts a new record.
    ///
    /// Returns `Err(IdExists)` if the code is taken, or `Err(UrlExists)` if
    /// the owner already shortened this URL.
    async fn add_url(&self, record: UrlRecord) -> Result<()>;

    /// Persists every pending item (no error set) that carries a code.
    ///
    /// Backends with transactions write the batch all-or-nothing.
    async fn write_batch_url(&self, owner: OwnerId, items: &[BatchItem]) -> Result<()>;

    /// Soft-deletes the given records that belong to `owner`.
    ///
    /// An empty slice is a successful no-op.
    async fn remove_url(&self, owner: OwnerId, records: &[UrlRecord]) -> Result<()>;

    /// Allocates a fresh owner identifier.
    async fn new_owner(&self) -> Result<OwnerId>;
}

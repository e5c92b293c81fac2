use async_trait::async_trait;
use parking_lot::Mutex;
use snip_core::error::{Result, StorageError};
use snip_core::{BatchItem, OwnerId, ReadRepository, Repository, ShortCode, UrlRecord};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Forward and reverse maps, always accessed together under one lock.
#[derive(Debug, Default)]
struct Tables {
    by_code: HashMap<ShortCode, UrlRecord>,
    by_url: HashMap<(OwnerId, String), ShortCode>,
    last_owner: i64,
}

impl Tables {
    fn conflict(&self, record: &UrlRecord) -> Option<StorageError> {
        if self.by_code.contains_key(&record.short_code) {
            return Some(StorageError::IdExists(record.short_code.to_string()));
        }
        if self
            .by_url
            .contains_key(&(record.owner, record.original_url.clone()))
        {
            return Some(StorageError::UrlExists(record.original_url.clone()));
        }
        None
    }

    fn insert(&mut self, record: UrlRecord) {
        self.by_url.insert(
            (record.owner, record.original_url.clone()),
            record.short_code.clone(),
        );
        self.by_code.insert(record.short_code.clone(), record);
    }
}

/// In-memory implementation of the repository contract.
///
/// A single mutex guards both the forward (`code -> record`) and reverse
/// (`(owner, url) -> code`) maps and is held for the whole of every
/// operation. This serializes all storage access, which is acceptable since
/// each operation is a handful of O(1) map accesses.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, deleted ones included.
    pub fn len(&self) -> usize {
        self.tables.lock().by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    async fn check_id(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        trace!(code = %code, "checking short code");
        let tables = self.tables.lock();
        Ok(tables.by_code.get(code).cloned())
    }

    async fn check_url(&self, owner: OwnerId, url: &str) -> Result<Option<UrlRecord>> {
        trace!(owner = %owner, url, "checking url");
        let tables = self.tables.lock();
        let record = tables
            .by_url
            .get(&(owner, url.to_owned()))
            .and_then(|code| tables.by_code.get(code))
            .cloned();
        Ok(record)
    }

    async fn check_batch_url(&self, owner: OwnerId, items: &mut [BatchItem]) -> Result<()> {
        let tables = self.tables.lock();
        for item in items.iter_mut().filter(|item| item.is_pending()) {
            let stored = tables
                .by_url
                .get(&(owner, item.original_url.clone()))
                .and_then(|code| tables.by_code.get(code));
            if let Some(stored) = stored {
                debug!(owner = %owner, url = %item.original_url, code = %stored.short_code, "url already stored");
                item.mark_existing(stored);
            }
        }
        Ok(())
    }

    async fn urls_by_owner(&self, owner: OwnerId) -> Result<Vec<UrlRecord>> {
        let tables = self.tables.lock();
        let mut records: Vec<UrlRecord> = tables
            .by_code
            .values()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.short_code.cmp(&b.short_code));
        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn add_url(&self, record: UrlRecord) -> Result<()> {
        let mut tables = self.tables.lock();
        if let Some(err) = tables.conflict(&record) {
            return Err(err);
        }
        debug!(code = %record.short_code, owner = %record.owner, "storing url");
        tables.insert(record);
        Ok(())
    }

    async fn write_batch_url(&self, owner: OwnerId, items: &[BatchItem]) -> Result<()> {
        let records: Vec<UrlRecord> = items.iter().filter_map(|item| item.to_record(owner)).collect();

        let mut tables = self.tables.lock();

        // Validate the whole batch before touching the maps so a conflict
        // leaves nothing behind.
        let mut staged = Tables::default();
        for record in &records {
            if let Some(err) = tables.conflict(record).or_else(|| staged.conflict(record)) {
                return Err(err);
            }
            staged.insert(record.clone());
        }

        debug!(owner = %owner, count = records.len(), "storing url batch");
        for record in records {
            tables.insert(record);
        }
        Ok(())
    }

    async fn remove_url(&self, owner: OwnerId, records: &[UrlRecord]) -> Result<()> {
        let mut tables = self.tables.lock();
        for record in records {
            match tables.by_code.get_mut(&record.short_code) {
                Some(stored) if stored.owner == owner => {
                    stored.deleted = true;
                }
                _ => {
                    trace!(code = %record.short_code, owner = %owner, "skipping record not owned by caller");
                }
            }
        }
        Ok(())
    }

    async fn new_owner(&self) -> Result<OwnerId> {
        let mut tables = self.tables.lock();
        tables.last_owner += 1;
        Ok(OwnerId::new(tables.last_owner))
    }
}

use crate::batch::{respond, BatchOutcome, BatchRequest};
use crate::deletion::{DeletionPipeline, DeletionSettings};
use crate::error::{Result, ShortenerError};
use crate::shortener::{OwnerUrl, Shortened, Shortener};
use crate::validator::{detect_duplicates, validate, validate_batch};
use async_trait::async_trait;
use snip_core::{BatchItem, OwnerId, Repository, ShortCode, StorageError, UrlRecord};
use snip_generator::{generate_unique, DrawBudget, Generator, DEFAULT_MAX_ATTEMPTS};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerSettings {
    /// Prefix of every public short URL.
    #[builder(default = DEFAULT_BASE_URL.to_string(), setter(into))]
    pub base_url: String,
    /// Ceiling on code draws per generated code, retries after a concurrent
    /// insert included. Also bounds the write rounds of one batch.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_id_attempts: u32,
    #[builder(default)]
    pub deletion: DeletionSettings,
}

impl Default for ShortenerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The shortener core: wraps a primary [`Repository`], an optional backup
/// mirror and a code [`Generator`].
///
/// The primary repository is authoritative. Writes are repeated against the
/// backup after they succeed on the primary; backup failures are logged and
/// otherwise ignored.
pub struct ShortenerService<R: ?Sized, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    backup: Option<Arc<dyn Repository>>,
    deletion: DeletionPipeline<R>,
    settings: ShortenerSettings,
}

impl<R: ?Sized, G> Clone for ShortenerService<R, G> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            generator: Arc::clone(&self.generator),
            backup: self.backup.clone(),
            deletion: self.deletion.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G, settings: ShortenerSettings) -> Self {
        Self::from_shared(Arc::new(repository), generator, settings)
    }
}

impl<R: Repository + ?Sized, G: Generator> ShortenerService<R, G> {
    /// Creates a service over a repository that is shared with other owners.
    pub fn from_shared(repository: Arc<R>, generator: G, settings: ShortenerSettings) -> Self {
        let deletion = DeletionPipeline::new(Arc::clone(&repository), settings.deletion.clone());
        Self {
            repository,
            generator: Arc::new(generator),
            backup: None,
            deletion,
            settings,
        }
    }

    /// Mirrors every successful write to `backup`.
    pub fn with_backup(mut self, backup: Arc<dyn Repository>) -> Self {
        self.backup = Some(backup);
        self
    }

    fn conflict(&self, code: ShortCode) -> ShortenerError {
        ShortenerError::UrlExists {
            short_url: code.to_url(&self.settings.base_url),
            code,
        }
    }

    /// Draws a code that is unused in the store and not in `taken`.
    async fn fresh_code(&self, taken: &mut HashSet<ShortCode>) -> Result<ShortCode> {
        let mut budget = DrawBudget::new(self.settings.max_id_attempts);
        loop {
            let code =
                generate_unique(self.repository.as_ref(), self.generator.as_ref(), &mut budget)
                    .await?;
            if taken.insert(code.clone()) {
                return Ok(code);
            }
        }
    }

    /// Gives the pending item holding `code` a new one. When no pending item
    /// holds it, every pending item is redrawn.
    async fn redraw(
        &self,
        items: &mut [BatchItem],
        taken: &mut HashSet<ShortCode>,
        code: &str,
    ) -> Result<()> {
        let holds = |item: &BatchItem| {
            item.is_pending() && item.short_code.as_ref().is_some_and(|c| c.as_str() == code)
        };
        let targeted = items.iter().any(|item| holds(item));

        for item in items.iter_mut() {
            if item.is_pending() && (!targeted || holds(&*item)) {
                item.short_code = Some(self.fresh_code(taken).await?);
            }
        }
        Ok(())
    }

    async fn mirror_record(&self, record: &UrlRecord) {
        let Some(backup) = &self.backup else {
            return;
        };
        if let Err(err) = backup.add_url(record.clone()).await {
            warn!(code = %record.short_code, error = %err, "failed to mirror url to backup");
        }
    }

    async fn mirror_batch(&self, owner: OwnerId, items: &[BatchItem]) {
        let Some(backup) = &self.backup else {
            return;
        };
        if let Err(err) = backup.write_batch_url(owner, items).await {
            warn!(owner = %owner, error = %err, "failed to mirror url batch to backup");
        }
    }
}

#[async_trait]
impl<R: Repository + ?Sized, G: Generator> Shortener for ShortenerService<R, G> {
    async fn shorten(&self, owner: OwnerId, url: &str) -> Result<Shortened> {
        let url = validate(url)?;

        if let Some(existing) = self.repository.check_url(owner, &url).await? {
            debug!(owner = %owner, code = %existing.short_code, "url already shortened");
            return Err(self.conflict(existing.short_code));
        }

        let mut budget = DrawBudget::new(self.settings.max_id_attempts);
        loop {
            let code =
                generate_unique(self.repository.as_ref(), self.generator.as_ref(), &mut budget)
                    .await?;
            let record = UrlRecord::new(code.clone(), url.clone(), owner);

            match self.repository.add_url(record.clone()).await {
                Ok(()) => {
                    debug!(owner = %owner, code = %code, "shortened url");
                    self.mirror_record(&record).await;
                    return Ok(Shortened {
                        short_url: code.to_url(&self.settings.base_url),
                        code,
                    });
                }
                Err(StorageError::IdExists(_)) => {
                    debug!(attempt = budget.used(), code = %code, "short code taken by a concurrent writer");
                }
                Err(err @ StorageError::UrlExists(_)) => {
                    return match self.repository.check_url(owner, &url).await? {
                        Some(existing) => Err(self.conflict(existing.short_code)),
                        None => Err(err.into()),
                    };
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn shorten_batch(
        &self,
        owner: OwnerId,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<BatchOutcome>> {
        if requests.is_empty() {
            return Err(ShortenerError::EmptyBatch);
        }

        let mut items: Vec<BatchItem> = requests.into_iter().map(BatchItem::from).collect();
        validate_batch(&mut items);
        detect_duplicates(&mut items);

        let mut taken = HashSet::with_capacity(items.len());
        for item in items.iter_mut() {
            item.short_code = Some(self.fresh_code(&mut taken).await?);
        }

        let rounds = self.settings.max_id_attempts.max(1);
        for round in 1..=rounds {
            self.repository.check_batch_url(owner, &mut items).await?;

            let pending = items.iter().filter(|item| item.is_pending()).count();
            if pending == 0 {
                debug!(owner = %owner, submitted = items.len(), "nothing new in url batch");
                return Ok(respond(items, &self.settings.base_url));
            }

            match self.repository.write_batch_url(owner, &items).await {
                Ok(()) => {
                    self.mirror_batch(owner, &items).await;
                    debug!(owner = %owner, submitted = items.len(), saved = pending, "processed url batch");
                    return Ok(respond(items, &self.settings.base_url));
                }
                Err(StorageError::IdExists(code)) => {
                    debug!(round, code = %code, "batch short code taken by a concurrent writer");
                    self.redraw(&mut items, &mut taken, &code).await?;
                }
                Err(StorageError::UrlExists(url)) => {
                    // The next existence check picks up the concurrent insert.
                    debug!(round, url = %url, "batch url stored by a concurrent writer");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ShortenerError::GenerationExhausted { attempts: rounds })
    }

    async fn resolve(&self, code: &ShortCode) -> Result<UrlRecord> {
        match self.repository.check_id(code).await? {
            None => Err(ShortenerError::UnknownCode(code.clone())),
            Some(record) if record.deleted => Err(ShortenerError::Gone(code.clone())),
            Some(record) => Ok(record),
        }
    }

    async fn owner_urls(&self, owner: OwnerId) -> Result<Vec<OwnerUrl>> {
        let records = self.repository.urls_by_owner(owner).await?;
        Ok(records
            .into_iter()
            .filter(|record| !record.deleted)
            .map(|record| OwnerUrl {
                short_url: record.short_code.to_url(&self.settings.base_url),
                original_url: record.original_url,
            })
            .collect())
    }

    fn delete(&self, owner: OwnerId, codes: Vec<ShortCode>) -> JoinHandle<()> {
        self.deletion.spawn(owner, codes)
    }

    async fn new_owner(&self) -> Result<OwnerId> {
        Ok(self.repository.new_owner().await?)
    }

    async fn ping(&self) -> Result<()> {
        Ok(self.repository.ping().await?)
    }
}

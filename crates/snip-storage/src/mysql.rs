use async_trait::async_trait;
use snip_core::error::{Result, StorageError};
use snip_core::{BatchItem, OwnerId, ReadRepository, Repository, ShortCode, UrlRecord};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, trace};
use typed_builder::TypedBuilder;

/// Name of the unique index on `(user_id, original_url)`.
const OWNER_URL_INDEX: &str = "uq_urls_owner_url";

const SCHEMA: &str = include_str!("../ddl/mysql/short_urls.sql");

/// Tunables for [`MySqlRepository`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct MySqlSettings {
    /// Upper bound for a single repository call, round trips included.
    #[builder(default = Duration::from_secs(1))]
    pub timeout: Duration,
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// MySQL implementation of the repository contract.
///
/// Isolation is delegated to the database. Batch existence checks use one
/// `IN (...)` query per batch and batch writes run in one transaction that
/// is rolled back on the first failure. Schema lives in `ddl/mysql`; see
/// [`MySqlRepository::apply_schema`].
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
    settings: MySqlSettings,
}

impl MySqlRepository {
    /// Creates a repository from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool, settings: MySqlSettings) -> Self {
        Self { pool, settings }
    }

    /// Creates a repository by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str, settings: MySqlSettings) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool, settings))
    }

    /// Creates the `users` and `urls` tables if they do not exist yet.
    pub async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(format!(
                "{operation} exceeded {:?}",
                self.settings.timeout
            ))),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

/// Maps a failed insert of `record` to the uniqueness invariant it broke.
fn map_insert_error(err: sqlx::Error, record: &UrlRecord) -> StorageError {
    if !is_unique_violation(&err) {
        return map_sqlx_error(err);
    }
    let on_owner_url = err
        .as_database_error()
        .is_some_and(|db| db.message().contains(OWNER_URL_INDEX));
    if on_owner_url {
        StorageError::UrlExists(record.original_url.clone())
    } else {
        StorageError::IdExists(record.short_code.to_string())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn parse_record(row: &MySqlRow) -> Result<UrlRecord> {
    let short_id: String = row.try_get("short_id").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let user_id: i64 = row.try_get("user_id").map_err(map_sqlx_error)?;
    let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;

    Ok(UrlRecord {
        short_code: ShortCode::new_unchecked(short_id),
        original_url,
        owner: OwnerId::new(user_id),
        deleted,
    })
}

#[async_trait]
impl ReadRepository for MySqlRepository {
    async fn check_id(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        trace!(code = %code, "selecting url by short code");
        self.with_timeout("check_id", async {
            let row = sqlx::query(
                r#"
                SELECT short_id, original_url, user_id, deleted
                FROM urls
                WHERE short_id = ?
                LIMIT 1
                "#,
            )
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            row.as_ref().map(parse_record).transpose()
        })
        .await
    }

    async fn check_url(&self, owner: OwnerId, url: &str) -> Result<Option<UrlRecord>> {
        trace!(owner = %owner, url, "selecting url by original url");
        self.with_timeout("check_url", async {
            let row = sqlx::query(
                r#"
                SELECT short_id, original_url, user_id, deleted
                FROM urls
                WHERE user_id = ?
                  AND original_url = ?
                LIMIT 1
                "#,
            )
            .bind(owner.get())
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            row.as_ref().map(parse_record).transpose()
        })
        .await
    }

    async fn check_batch_url(&self, owner: OwnerId, items: &mut [BatchItem]) -> Result<()> {
        let urls: Vec<String> = items
            .iter()
            .filter(|item| item.is_pending())
            .map(|item| item.original_url.clone())
            .collect();
        if urls.is_empty() {
            return Ok(());
        }

        let stored = self
            .with_timeout("check_batch_url", async {
                let mut query: QueryBuilder<MySql> = QueryBuilder::new(
                    "SELECT short_id, original_url, user_id, deleted FROM urls WHERE user_id = ",
                );
                query.push_bind(owner.get());
                query.push(" AND original_url IN (");
                let mut separated = query.separated(", ");
                for url in &urls {
                    separated.push_bind(url);
                }
                separated.push_unseparated(")");

                let rows = query
                    .build()
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
                rows.iter().map(parse_record).collect::<Result<Vec<_>>>()
            })
            .await?;

        for record in &stored {
            for item in items
                .iter_mut()
                .filter(|item| item.is_pending() && item.original_url == record.original_url)
            {
                item.mark_existing(record);
            }
        }
        debug!(owner = %owner, checked = urls.len(), existing = stored.len(), "checked url batch");
        Ok(())
    }

    async fn urls_by_owner(&self, owner: OwnerId) -> Result<Vec<UrlRecord>> {
        self.with_timeout("urls_by_owner", async {
            let rows = sqlx::query(
                r#"
                SELECT short_id, original_url, user_id, deleted
                FROM urls
                WHERE user_id = ?
                ORDER BY created_seq
                "#,
            )
            .bind(owner.get())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(parse_record).collect()
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_timeout("ping", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| {
                    error!(error = %e, "database ping failed");
                    map_sqlx_error(e)
                })
        })
        .await
    }
}

#[async_trait]
impl Repository for MySqlRepository {
    async fn add_url(&self, record: UrlRecord) -> Result<()> {
        self.with_timeout("add_url", async {
            sqlx::query(
                r#"
                INSERT INTO urls (short_id, original_url, user_id, deleted)
                VALUES (?, ?, ?, FALSE)
                "#,
            )
            .bind(record.short_code.as_str())
            .bind(&record.original_url)
            .bind(record.owner.get())
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| map_insert_error(err, &record))
        })
        .await
    }

    async fn write_batch_url(&self, owner: OwnerId, items: &[BatchItem]) -> Result<()> {
        let records: Vec<UrlRecord> = items.iter().filter_map(|item| item.to_record(owner)).collect();
        if records.is_empty() {
            return Ok(());
        }

        self.with_timeout("write_batch_url", async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            for record in &records {
                trace!(code = %record.short_code, url = %record.original_url, "inserting batch row");
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO urls (short_id, original_url, user_id, deleted)
                    VALUES (?, ?, ?, FALSE)
                    "#,
                )
                .bind(record.short_code.as_str())
                .bind(&record.original_url)
                .bind(record.owner.get())
                .execute(&mut *tx)
                .await;

                if let Err(err) = inserted {
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    return Err(map_insert_error(err, record));
                }
            }

            tx.commit().await.map_err(map_sqlx_error)?;
            debug!(owner = %owner, count = records.len(), "committed url batch");
            Ok(())
        })
        .await
    }

    async fn remove_url(&self, owner: OwnerId, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.with_timeout("remove_url", async {
            let mut query: QueryBuilder<MySql> =
                QueryBuilder::new("UPDATE urls SET deleted = TRUE WHERE user_id = ");
            query.push_bind(owner.get());
            query.push(" AND short_id IN (");
            let mut separated = query.separated(", ");
            for record in records {
                separated.push_bind(record.short_code.as_str());
            }
            separated.push_unseparated(")");

            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            debug!(owner = %owner, requested = records.len(), affected = result.rows_affected(), "soft-deleted urls");
            Ok(())
        })
        .await
    }

    async fn new_owner(&self) -> Result<OwnerId> {
        self.with_timeout("new_owner", async {
            let result = sqlx::query("INSERT INTO users () VALUES ()")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            let id = i64::try_from(result.last_insert_id()).map_err(|e| {
                StorageError::InvalidData(format!("owner id out of range: {e}"))
            })?;
            Ok(OwnerId::new(id))
        })
        .await
    }
}

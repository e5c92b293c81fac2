use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snip_core::error::{Result, StorageError};
use snip_core::{BatchItem, OwnerId, ReadRepository, Repository, ShortCode, UrlRecord};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

/// One line of the append-only log.
#[derive(Debug, Serialize, Deserialize)]
struct Line {
    short_url: String,
    original_url: String,
    #[serde(default)]
    user_id: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    deleted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl From<&UrlRecord> for Line {
    fn from(record: &UrlRecord) -> Self {
        Self {
            short_url: record.short_code.to_string(),
            original_url: record.original_url.clone(),
            user_id: record.owner.get(),
            deleted: record.deleted,
        }
    }
}

impl From<Line> for UrlRecord {
    fn from(line: Line) -> Self {
        Self {
            short_code: ShortCode::new_unchecked(line.short_url),
            original_url: line.original_url,
            owner: OwnerId::new(line.user_id),
            deleted: line.deleted,
        }
    }
}

/// Records folded from the log, in order of first appearance.
#[derive(Debug, Default)]
struct Snapshot {
    records: Vec<UrlRecord>,
    by_code: HashMap<ShortCode, usize>,
}

impl Snapshot {
    /// Applies one log line. A later line for the same code supersedes the
    /// earlier one, except that deletion is never undone.
    fn apply(&mut self, record: UrlRecord) {
        match self.by_code.get(&record.short_code) {
            Some(&index) => {
                let stored = &mut self.records[index];
                let deleted = stored.deleted || record.deleted;
                *stored = record;
                stored.deleted = deleted;
            }
            None => {
                self.by_code
                    .insert(record.short_code.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn by_code(&self, code: &ShortCode) -> Option<&UrlRecord> {
        self.by_code.get(code).map(|&index| &self.records[index])
    }

    fn by_url(&self, owner: OwnerId, url: &str) -> Option<&UrlRecord> {
        self.records
            .iter()
            .find(|record| record.owner == owner && record.original_url == url)
    }

    fn conflict(&self, record: &UrlRecord) -> Option<StorageError> {
        if self.by_code(&record.short_code).is_some() {
            return Some(StorageError::IdExists(record.short_code.to_string()));
        }
        if self.by_url(record.owner, &record.original_url).is_some() {
            return Some(StorageError::UrlExists(record.original_url.clone()));
        }
        None
    }

    fn max_owner(&self) -> i64 {
        self.records
            .iter()
            .map(|record| record.owner.get())
            .max()
            .unwrap_or(0)
    }
}

/// File-backed repository storing one JSON object per line.
///
/// Writes only ever append. Every read re-scans the file from the start, so
/// this backend suits low-throughput single-instance use or mirroring as a
/// backup. No lock is taken beyond the OS file handle: it must not be driven
/// by more than one concurrent writer.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    last_owner: AtomicI64,
}

impl FileRepository {
    /// Opens (creating if needed) the log file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(path = %path.display(), "opened file storage");
        Ok(Self {
            path,
            last_owner: AtomicI64::new(0),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Snapshot> {
        parse(&self.read().await?)
    }

    async fn read(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    /// Makes the file end on a line boundary before anything is appended to
    /// it. A complete final line missing its newline gets one; a torn final
    /// line is cut off. Returns the bytes to write ahead of the new lines.
    async fn seal_tail(&self) -> Result<&'static [u8]> {
        let contents = self.read().await?;
        if contents.is_empty() || contents.ends_with(b"\n") {
            return Ok(&b""[..]);
        }

        let start = contents
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |newline| newline + 1);
        let tail = &contents[start..];
        if !is_blank(tail) && serde_json::from_slice::<Line>(tail).is_ok() {
            return Ok(&b"\n"[..]);
        }

        warn!(
            path = %self.path.display(),
            offset = start,
            dropped = tail.len(),
            "truncating torn trailing line"
        );
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.set_len(start as u64)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        Ok(&b""[..])
    }

    async fn append(&self, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buffer = self.seal_tail().await?.to_vec();
        for record in records {
            serde_json::to_writer(&mut buffer, &Line::from(record))
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            buffer.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.write_all(&buffer)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.flush().await.map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Unavailable(format!("{}: {err}", path.display()))
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}

/// Folds the log into a snapshot. Blank lines are skipped, and a final line
/// without a trailing newline that fails to parse (cut mid-object or
/// mid-character) is treated as a torn write.
fn parse(contents: &[u8]) -> Result<Snapshot> {
    let mut snapshot = Snapshot::default();
    let mut lines = contents.split(|&b| b == b'\n').enumerate().peekable();

    while let Some((number, raw)) = lines.next() {
        if is_blank(raw) {
            continue;
        }
        match serde_json::from_slice::<Line>(raw) {
            Ok(line) => snapshot.apply(line.into()),
            // Only the segment after the last newline can be unterminated.
            Err(e) if lines.peek().is_none() => {
                warn!(line = number + 1, error = %e, "ignoring partial trailing line");
            }
            Err(e) => {
                return Err(StorageError::InvalidData(format!(
                    "line {}: {e}",
                    number + 1
                )))
            }
        }
    }

    Ok(snapshot)
}

#[async_trait]
impl ReadRepository for FileRepository {
    async fn check_id(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        trace!(code = %code, "scanning file for short code");
        Ok(self.load().await?.by_code(code).cloned())
    }

    async fn check_url(&self, owner: OwnerId, url: &str) -> Result<Option<UrlRecord>> {
        trace!(owner = %owner, url, "scanning file for url");
        Ok(self.load().await?.by_url(owner, url).cloned())
    }

    async fn check_batch_url(&self, owner: OwnerId, items: &mut [BatchItem]) -> Result<()> {
        let snapshot = self.load().await?;
        for item in items.iter_mut().filter(|item| item.is_pending()) {
            if let Some(stored) = snapshot.by_url(owner, &item.original_url) {
                item.mark_existing(stored);
            }
        }
        Ok(())
    }

    async fn urls_by_owner(&self, owner: OwnerId) -> Result<Vec<UrlRecord>> {
        let snapshot = self.load().await?;
        Ok(snapshot
            .records
            .into_iter()
            .filter(|record| record.owner == owner)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|_| ())
            .map_err(|e| io_error(&self.path, e))
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn add_url(&self, record: UrlRecord) -> Result<()> {
        let snapshot = self.load().await?;
        if let Some(err) = snapshot.conflict(&record) {
            return Err(err);
        }
        debug!(code = %record.short_code, owner = %record.owner, "appending url");
        self.append(std::slice::from_ref(&record)).await
    }

    async fn write_batch_url(&self, owner: OwnerId, items: &[BatchItem]) -> Result<()> {
        let mut snapshot = self.load().await?;
        let records: Vec<UrlRecord> = items.iter().filter_map(|item| item.to_record(owner)).collect();

        for record in &records {
            if let Some(err) = snapshot.conflict(record) {
                return Err(err);
            }
            snapshot.apply(record.clone());
        }

        debug!(owner = %owner, count = records.len(), "appending url batch");
        // One write call for the whole batch.
        self.append(&records).await
    }

    async fn remove_url(&self, owner: OwnerId, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let snapshot = self.load().await?;
        let tombstones: Vec<UrlRecord> = records
            .iter()
            .filter_map(|record| snapshot.by_code(&record.short_code))
            .filter(|stored| stored.owner == owner && !stored.deleted)
            .map(|stored| UrlRecord {
                deleted: true,
                ..stored.clone()
            })
            .collect();

        debug!(owner = %owner, count = tombstones.len(), "appending deletion marks");
        self.append(&tombstones).await
    }

    async fn new_owner(&self) -> Result<OwnerId> {
        let max_seen = self.load().await?.max_owner();
        self.last_owner.fetch_max(max_seen, Ordering::SeqCst);
        let id = self.last_owner.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OwnerId::new(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_core::ItemError;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn record(c: &str, url: &str, owner: i64) -> UrlRecord {
        UrlRecord::new(code(c), url, OwnerId::new(owner))
    }

    async fn open_repo(dir: &TempDir) -> FileRepository {
        FileRepository::open(dir.path().join("nested").join("short-url-db.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        assert!(repo.path().exists());
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn add_and_check() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;

        repo.add_url(record("AAAAaaaa", "http://ya.ru", 1))
            .await
            .unwrap();

        let by_id = repo.check_id(&code("AAAAaaaa")).await.unwrap().unwrap();
        assert_eq!(by_id.original_url, "http://ya.ru");

        let by_url = repo
            .check_url(OwnerId::new(1), "http://ya.ru")
            .await
            .unwrap();
        assert_eq!(by_url.unwrap().short_code, code("AAAAaaaa"));

        // Owner scoped.
        assert!(repo
            .check_url(OwnerId::new(2), "http://ya.ru")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn add_conflicts() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        repo.add_url(record("AAAAaaaa", "http://ya.ru", 1))
            .await
            .unwrap();

        let err = repo
            .add_url(record("AAAAaaaa", "http://other.ru", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IdExists(_)));

        let err = repo
            .add_url(record("BBBBbbbb", "http://ya.ru", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UrlExists(_)));
    }

    #[tokio::test]
    async fn file_layout_is_one_json_object_per_line() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        repo.add_url(record("AAAAaaaa", "http://ya.ru", 3))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(repo.path()).unwrap();
        assert_eq!(
            contents,
            "{\"short_url\":\"AAAAaaaa\",\"original_url\":\"http://ya.ru\",\"user_id\":3}\n"
        );
    }

    #[tokio::test]
    async fn tolerates_blank_and_partial_trailing_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            "{\"short_url\":\"AAAAaaaa\",\"original_url\":\"http://ya.ru\"}\n\n\n{\"short_url\":\"BBBB",
        )
        .unwrap();

        let repo = FileRepository::open(&path).await.unwrap();
        let record = repo.check_id(&code("AAAAaaaa")).await.unwrap().unwrap();
        assert_eq!(record.owner, OwnerId::new(0));
        assert!(repo.check_id(&code("BBBBbbbb")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn torn_tail_is_cut_before_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            "{\"short_url\":\"AAAAaaaa\",\"original_url\":\"http://ya.ru\",\"user_id\":1}\n{\"short_url\":\"BB",
        )
        .unwrap();
        let repo = FileRepository::open(&path).await.unwrap();

        repo.add_url(record("CCCCcccc", "http://yandex.ru", 1))
            .await
            .unwrap();
        repo.add_url(record("DDDDdddd", "http://google.com", 1))
            .await
            .unwrap();

        for c in ["AAAAaaaa", "CCCCcccc", "DDDDdddd"] {
            assert!(repo.check_id(&code(c)).await.unwrap().is_some(), "{c}");
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.ends_with('\n'));
    }

    #[tokio::test]
    async fn torn_multibyte_character_in_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let mut contents =
            b"{\"short_url\":\"AAAAaaaa\",\"original_url\":\"http://ya.ru\",\"user_id\":1}\n".to_vec();
        contents.extend_from_slice(b"{\"short_url\":\"BBBBbbbb\",\"original_url\":\"http://ya.ru/");
        // First byte of the two-byte encoding of 'п'.
        contents.push(0xD0);
        std::fs::write(&path, contents).unwrap();
        let repo = FileRepository::open(&path).await.unwrap();

        assert!(repo.check_id(&code("AAAAaaaa")).await.unwrap().is_some());
        assert!(repo.check_id(&code("BBBBbbbb")).await.unwrap().is_none());

        repo.add_url(record("CCCCcccc", "http://yandex.ru", 1))
            .await
            .unwrap();
        assert!(repo.check_id(&code("AAAAaaaa")).await.unwrap().is_some());
        assert!(repo.check_id(&code("CCCCcccc")).await.unwrap().is_some());
        assert!(std::str::from_utf8(&std::fs::read(&path).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn unterminated_complete_line_is_kept_on_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            "{\"short_url\":\"AAAAaaaa\",\"original_url\":\"http://ya.ru\",\"user_id\":1}",
        )
        .unwrap();
        let repo = FileRepository::open(&path).await.unwrap();

        repo.add_url(record("BBBBbbbb", "http://yandex.ru", 1))
            .await
            .unwrap();

        assert!(repo.check_id(&code("AAAAaaaa")).await.unwrap().is_some());
        assert!(repo.check_id(&code("BBBBbbbb")).await.unwrap().is_some());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn rejects_corrupt_lines_in_the_middle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            "garbage\n{\"short_url\":\"AAAAaaaa\",\"original_url\":\"http://ya.ru\"}\n",
        )
        .unwrap();

        let repo = FileRepository::open(&path).await.unwrap();
        let err = repo.check_id(&code("AAAAaaaa")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn batch_write_and_check() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        let owner = OwnerId::new(1);

        let mut first = BatchItem::new("a", "http://yandex.ru");
        first.short_code = Some(code("AAAAaaaa"));
        let mut second = BatchItem::new("b", "http://ya.ru");
        second.short_code = Some(code("BBBBbbbb"));
        repo.write_batch_url(owner, &[first, second]).await.unwrap();

        let mut again = BatchItem::new("c", "http://ya.ru");
        again.short_code = Some(code("CCCCcccc"));
        let mut items = vec![again];
        repo.check_batch_url(owner, &mut items).await.unwrap();

        assert_eq!(items[0].error, Some(ItemError::UrlExists));
        assert_eq!(items[0].short_code, Some(code("BBBBbbbb")));
    }

    #[tokio::test]
    async fn batch_write_conflict_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        let owner = OwnerId::new(1);
        repo.add_url(record("AAAAaaaa", "http://ya.ru", 1))
            .await
            .unwrap();

        let mut fresh = BatchItem::new("a", "http://yandex.ru");
        fresh.short_code = Some(code("BBBBbbbb"));
        let mut clash = BatchItem::new("b", "http://google.com");
        clash.short_code = Some(code("AAAAaaaa"));

        let err = repo
            .write_batch_url(owner, &[fresh, clash])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IdExists(_)));
        assert!(repo.check_id(&code("BBBBbbbb")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_appends_deletion_and_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        let mine = record("AAAAaaaa", "http://ya.ru", 1);
        let theirs = record("BBBBbbbb", "http://ya.ru", 2);
        repo.add_url(mine.clone()).await.unwrap();
        repo.add_url(theirs.clone()).await.unwrap();

        repo.remove_url(OwnerId::new(1), &[mine.clone(), theirs])
            .await
            .unwrap();
        // Removing twice appends nothing new.
        repo.remove_url(OwnerId::new(1), &[mine]).await.unwrap();

        assert!(repo.check_id(&code("AAAAaaaa")).await.unwrap().unwrap().deleted);
        assert!(!repo.check_id(&code("BBBBbbbb")).await.unwrap().unwrap().deleted);

        let contents = std::fs::read_to_string(repo.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[tokio::test]
    async fn new_owner_continues_after_stored_owners() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        repo.add_url(record("AAAAaaaa", "http://ya.ru", 41))
            .await
            .unwrap();

        assert_eq!(repo.new_owner().await.unwrap(), OwnerId::new(42));
        assert_eq!(repo.new_owner().await.unwrap(), OwnerId::new(43));
    }

    #[tokio::test]
    async fn urls_by_owner_keeps_insertion_order() {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(&dir).await;
        repo.add_url(record("ZZZZzzzz", "http://ya.ru", 1))
            .await
            .unwrap();
        repo.add_url(record("AAAAaaaa", "http://yandex.ru", 1))
            .await
            .unwrap();
        repo.add_url(record("BBBBbbbb", "http://ya.ru", 2))
            .await
            .unwrap();

        let records = repo.urls_by_owner(OwnerId::new(1)).await.unwrap();
        let codes: Vec<&str> = records.iter().map(|r| r.short_code.as_str()).collect();
        assert_eq!(codes, vec!["ZZZZzzzz", "AAAAaaaa"]);
    }
}

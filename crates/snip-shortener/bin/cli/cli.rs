use clap::{Args, Parser, Subcommand, ValueEnum};
use snip_shortener::deletion::DEFAULT_WORKERS;
use snip_shortener::DEFAULT_BASE_URL;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";
pub const BACKUP_FILE_ENV: &str = "SNIP_BACKUP_FILE";
pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const OWNER_ENV: &str = "SNIP_OWNER";
pub const LOG_LEVEL_ENV: &str = "SNIP_LOG_LEVEL";

pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/short-url-db.json";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 256;
pub const DEFAULT_DB_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "file")]
    File,
    #[value(name = "mysql")]
    Mysql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Memory => write!(f, "memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten, resolve and delete URLs")]
pub struct CLI {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Owner to act as. Allocated on demand when omitted.
    #[arg(long, env = OWNER_ENV)]
    pub owner: Option<i64>,

    #[arg(long, env = LOG_LEVEL_ENV, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[arg(long)]
    pub log_json: bool,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub deletion_workers: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_ID_ATTEMPTS)]
    pub max_id_attempts: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct StorageArgs {
    #[arg(
        long = "storage",
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub backend: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, default_value = DEFAULT_FILE_STORAGE_PATH)]
    pub file_storage_path: PathBuf,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("backend", "mysql"))]
    pub database_dsn: Option<String>,

    #[arg(long, default_value_t = DEFAULT_DB_TIMEOUT_MS)]
    pub db_timeout_ms: u64,

    /// Mirror every write into this file.
    #[arg(long, env = BACKUP_FILE_ENV)]
    pub backup_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one URL.
    Shorten { url: String },
    /// Shorten a JSON array of `{correlation_id, original_url}` read from a
    /// file, or from stdin when the path is `-`.
    Batch { input: PathBuf },
    /// Print the record behind a short code.
    Resolve { code: String },
    /// List the owner's live links.
    List,
    /// Soft-delete short codes owned by the owner.
    Delete {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Allocate a new owner id.
    NewOwner,
    /// Check that the storage backend is reachable.
    Ping,
}

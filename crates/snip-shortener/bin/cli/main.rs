mod cli;

use crate::cli::{Command, StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use snip_core::{OwnerId, Repository, ShortCode};
use snip_generator::AlphaGenerator;
use snip_shortener::{
    BatchRequest, DeletionSettings, Shortener, ShortenerError, ShortenerService, ShortenerSettings,
};
use snip_storage::{FileRepository, InMemoryRepository, MySqlRepository, MySqlSettings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(&config.log_level, config.log_json);

    info!(
        storage_backend = %config.storage.backend,
        base_url = %config.base_url,
        "starting snip"
    );

    match config.storage.backend {
        StorageBackendArg::Memory => run(InMemoryRepository::new(), config).await,
        StorageBackendArg::File => {
            let repository = FileRepository::open(&config.storage.file_storage_path)
                .await
                .context("failed to open file storage")?;
            run(repository, config).await
        }
        StorageBackendArg::Mysql => {
            let dsn = config
                .storage
                .database_dsn
                .as_deref()
                .context("database dsn is required when storage backend is mysql")?;
            let settings = MySqlSettings::builder()
                .timeout(Duration::from_millis(config.storage.db_timeout_ms))
                .build();
            let repository = MySqlRepository::connect(dsn, settings)
                .await
                .context("failed to connect to mysql")?;
            repository
                .apply_schema()
                .await
                .context("failed to apply mysql schema")?;
            run(repository, config).await
        }
    }
}

/// Logs go to stderr so stdout carries only command output.
/// `RUST_LOG`, when set, overrides `level`.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run<R: Repository>(repository: R, config: CLI) -> anyhow::Result<()> {
    let settings = ShortenerSettings::builder()
        .base_url(config.base_url)
        .max_id_attempts(config.max_id_attempts)
        .deletion(
            DeletionSettings::builder()
                .workers(config.deletion_workers)
                .build(),
        )
        .build();

    let mut service = ShortenerService::new(repository, AlphaGenerator, settings);
    if let Some(path) = &config.storage.backup_file {
        let backup = FileRepository::open(path)
            .await
            .context("failed to open backup file")?;
        info!(path = %path.display(), "mirroring writes to backup file");
        service = service.with_backup(Arc::new(backup));
    }

    let shortener: Arc<dyn Shortener> = Arc::new(service);
    execute(
        shortener.as_ref(),
        config.owner.map(OwnerId::new),
        config.command,
    )
    .await
}

async fn execute(
    shortener: &dyn Shortener,
    owner: Option<OwnerId>,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Shorten { url } => {
            let owner = resolve_owner(shortener, owner).await?;
            match shortener.shorten(owner, &url).await {
                Ok(shortened) => print_json(&json!({
                    "owner": owner,
                    "code": shortened.code,
                    "short_url": shortened.short_url,
                })),
                Err(ShortenerError::UrlExists { code, short_url }) => print_json(&json!({
                    "owner": owner,
                    "code": code,
                    "short_url": short_url,
                    "error": "url already exists",
                })),
                Err(err) => Err(err.into()),
            }
        }
        Command::Batch { input } => {
            let owner = resolve_owner(shortener, owner).await?;
            let raw = read_input(&input).await?;
            let requests: Vec<BatchRequest> =
                serde_json::from_str(&raw).context("batch input must be a JSON array")?;
            let results = shortener.shorten_batch(owner, requests).await?;
            print_json(&json!({ "owner": owner, "results": results }))
        }
        Command::Resolve { code } => {
            let code = ShortCode::new(code)?;
            let record = shortener.resolve(&code).await?;
            print_json(&record)
        }
        Command::List => {
            let owner = resolve_owner(shortener, owner).await?;
            let urls = shortener.owner_urls(owner).await?;
            print_json(&json!({ "owner": owner, "urls": urls }))
        }
        Command::Delete { codes } => {
            let owner = owner.context("--owner is required to delete")?;
            let codes = codes
                .into_iter()
                .map(ShortCode::new)
                .collect::<Result<Vec<_>, _>>()?;
            let requested = codes.len();
            shortener
                .delete(owner, codes)
                .await
                .context("deletion pipeline panicked")?;
            print_json(&json!({ "owner": owner, "requested": requested, "status": "accepted" }))
        }
        Command::NewOwner => {
            let owner = shortener.new_owner().await?;
            print_json(&json!({ "owner": owner }))
        }
        Command::Ping => {
            shortener.ping().await?;
            print_json(&json!({ "status": "ok" }))
        }
    }
}

async fn resolve_owner(shortener: &dyn Shortener, owner: Option<OwnerId>) -> anyhow::Result<OwnerId> {
    match owner {
        Some(owner) => Ok(owner),
        None => {
            let owner = shortener.new_owner().await?;
            info!(owner = %owner, "allocated new owner");
            Ok(owner)
        }
    }
}

async fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("failed to read batch from stdin")?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read batch from {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

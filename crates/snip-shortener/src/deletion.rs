//! Detached soft deletion of a list of short codes.
//!
//! A request flows through four stages connected by bounded channels:
//!
//! ```text
//! generator ─▶ workers (check_id) ─▶ fan-in ─▶ remover (one remove_url)
//! ```
//!
//! The remover owns the `done` signal and raises it once, after the merged
//! channel has drained and the single `remove_url` call has returned. A code
//! that cannot be resolved raises it early and cancels the removal: the
//! batch is applied whole or not at all.

use snip_core::{OwnerId, Repository, ShortCode, StorageError, UrlRecord};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// What a worker hands downstream for one deletable code.
type Resolved = std::result::Result<UrlRecord, StorageError>;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DeletionSettings {
    /// Number of concurrent `check_id` workers. Zero is treated as one.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Capacity of every hand-off channel.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl Default for DeletionSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub struct DeletionPipeline<R: ?Sized> {
    repository: Arc<R>,
    settings: DeletionSettings,
}

impl<R: ?Sized> Clone for DeletionPipeline<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            settings: self.settings.clone(),
        }
    }
}

impl<R: Repository + ?Sized> DeletionPipeline<R> {
    pub fn new(repository: Arc<R>, settings: DeletionSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// Starts deleting `codes` on behalf of `owner` and returns immediately.
    ///
    /// Codes that are unknown, already deleted or owned by someone else are
    /// dropped. The handle completes after the single `remove_url` call;
    /// dropping it leaves the pipeline running. If any code fails to resolve,
    /// `remove_url` is not called at all. Failures are logged and never
    /// reported to the caller.
    pub fn spawn(&self, owner: OwnerId, codes: Vec<ShortCode>) -> JoinHandle<()> {
        let capacity = self.settings.queue_capacity.max(1);
        let workers = self.settings.workers.max(1);
        debug!(owner = %owner, requested = codes.len(), workers, "starting deletion pipeline");

        let (done_tx, done_rx) = watch::channel(false);
        let (code_tx, code_rx) = mpsc::channel(capacity);
        let generator = tokio::spawn(generate(codes, code_tx, done_rx.clone()));

        let code_rx = Arc::new(Mutex::new(code_rx));
        let outputs: Vec<_> = (0..workers)
            .map(|worker| {
                let (tx, rx) = mpsc::channel(capacity);
                tokio::spawn(resolve(
                    worker,
                    Arc::clone(&self.repository),
                    owner,
                    Arc::clone(&code_rx),
                    tx,
                    done_rx.clone(),
                ));
                rx
            })
            .collect();
        let merged = fan_in(outputs, capacity);

        let repository = Arc::clone(&self.repository);
        tokio::spawn(async move {
            remove(repository.as_ref(), owner, merged, done_tx).await;
            if let Err(err) = generator.await {
                warn!(error = %err, "deletion generator task failed");
            }
        })
    }
}

async fn generate(
    codes: Vec<ShortCode>,
    tx: mpsc::Sender<ShortCode>,
    mut done: watch::Receiver<bool>,
) {
    for code in codes {
        if *done.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = done.changed() => break,
            sent = tx.send(code) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

async fn resolve<R: Repository + ?Sized>(
    worker: usize,
    repository: Arc<R>,
    owner: OwnerId,
    codes: Arc<Mutex<mpsc::Receiver<ShortCode>>>,
    tx: mpsc::Sender<Resolved>,
    mut done: watch::Receiver<bool>,
) {
    loop {
        if *done.borrow() {
            break;
        }
        let next = {
            let mut codes = codes.lock().await;
            tokio::select! {
                biased;
                _ = done.changed() => None,
                code = codes.recv() => code,
            }
        };
        let Some(code) = next else {
            break;
        };

        match repository.check_id(&code).await {
            Ok(Some(record)) if record.owner == owner && !record.deleted => {
                trace!(worker, code = %code, "resolved code for deletion");
                if tx.send(Ok(record)).await.is_err() {
                    break;
                }
            }
            Ok(_) => trace!(worker, code = %code, "skipping code not deletable by owner"),
            Err(err) => {
                debug!(worker, code = %code, error = %err, "failed to resolve code for deletion");
                let _ = tx.send(Err(err)).await;
                break;
            }
        }
    }
}

/// Merges the per-worker channels into one; it closes once every worker
/// channel has closed.
fn fan_in(inputs: Vec<mpsc::Receiver<Resolved>>, capacity: usize) -> mpsc::Receiver<Resolved> {
    let (tx, rx) = mpsc::channel(capacity);
    for mut input in inputs {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(record) = input.recv().await {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });
    }
    rx
}

async fn remove<R: Repository + ?Sized>(
    repository: &R,
    owner: OwnerId,
    mut merged: mpsc::Receiver<Resolved>,
    done: watch::Sender<bool>,
) {
    let mut records = Vec::new();
    let mut failure = None;
    while let Some(resolved) = merged.recv().await {
        match resolved {
            Ok(record) => records.push(record),
            Err(err) if failure.is_none() => {
                // Stop the generator and workers; in-flight results still drain.
                done.send_replace(true);
                failure = Some(err);
            }
            Err(_) => {}
        }
    }

    if let Some(err) = failure {
        error!(
            owner = %owner,
            resolved = records.len(),
            error = %err,
            "deletion batch cancelled, a code could not be resolved"
        );
        return;
    }

    match repository.remove_url(owner, &records).await {
        Ok(()) => debug!(owner = %owner, removed = records.len(), "deletion batch applied"),
        Err(err) => error!(owner = %owner, count = records.len(), error = %err, "deletion batch failed"),
    }

    done.send_replace(true);
}

//! Worker pool lifecycle management.
//!
//! Workers run as independent tokio tasks sharing nothing but the job store.
//! Graceful shutdown is cooperative (a shared cancellation token observed
//! between work iterations); workers that fail to stop within the escalation
//! timeout are aborted.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffStrategy;
use crate::executor::CommandRunner;
use crate::worker::Worker;
use crate::JobStore;

/// How long to wait for each worker to finish its current iteration before
/// escalating to an abort.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("workers are already running")]
    AlreadyRunning,
    #[error("failed to read or write the pool record: {0}")]
    Record(#[from] std::io::Error),
    #[error("malformed pool record: {0}")]
    MalformedRecord(#[from] serde_json::Error),
}

/// The durable side-record describing a started pool.
///
/// Written on start and removed on stop so a later invocation can see that a
/// pool was launched and by which process. Concurrent writers are not
/// synchronised; a second independent invocation can still double-start
/// workers against the same store.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolRecord {
    pub pid: u32,
    pub count: usize,
    pub worker_ids: Vec<usize>,
}

struct WorkerHandle {
    id: usize,
    task: JoinHandle<()>,
}

/// Spawns and stops the worker tasks that drain the queue.
pub struct WorkerPool {
    store: JobStore,
    runner: CommandRunner,
    backoff: BackoffStrategy,
    record_path: PathBuf,
    workers: Vec<WorkerHandle>,
    cancellation: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        store: JobStore,
        runner: CommandRunner,
        backoff: BackoffStrategy,
        record_path: PathBuf,
    ) -> Self {
        Self {
            store,
            runner,
            backoff,
            record_path,
            workers: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Spawns `count` worker tasks and persists the pool record.
    ///
    /// Refuses to start when this manager already has a running pool. This is
    /// a best-effort, in-memory guard only.
    pub async fn start_workers(&mut self, count: usize) -> Result<(), PoolError> {
        if !self.workers.is_empty() {
            return Err(PoolError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();
        for id in 1..=count {
            let worker = Worker::new(id, self.store.clone(), self.runner, self.backoff);
            let task = tokio::spawn(worker.run(self.cancellation.clone()));
            self.workers.push(WorkerHandle { id, task });
        }

        let record = PoolRecord {
            pid: std::process::id(),
            count,
            worker_ids: self.workers.iter().map(|worker| worker.id).collect(),
        };
        tokio::fs::write(&self.record_path, serde_json::to_vec_pretty(&record)?).await?;
        tracing::info!(count, "Started {count} worker(s)");
        Ok(())
    }

    /// Stops all workers, escalating to an abort after [`SHUTDOWN_TIMEOUT`].
    ///
    /// The pool record is removed regardless of how the workers went down.
    pub async fn stop_workers(&mut self) -> Result<(), PoolError> {
        if self.workers.is_empty() {
            tracing::info!("No workers are running");
        } else {
            tracing::info!(count = self.workers.len(), "Stopping workers");
            self.cancellation.cancel();
            for mut worker in self.workers.drain(..) {
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut worker.task).await {
                    Ok(_) => tracing::debug!(worker_id = worker.id, "Worker stopped"),
                    Err(_elapsed) => {
                        tracing::warn!(
                            worker_id = worker.id,
                            "Worker did not stop within {SHUTDOWN_TIMEOUT:?}, aborting"
                        );
                        worker.task.abort();
                        let _ = worker.task.await;
                    }
                }
            }
        }

        match tokio::fs::remove_file(&self.record_path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        Ok(())
    }

    /// How many of this pool's workers are still running.
    ///
    /// A liveness probe, not a handshake: returns 0 when no pool record
    /// exists, otherwise counts the worker tasks that have not finished.
    pub async fn active_workers(&self) -> Result<usize, PoolError> {
        if self.load_record().await?.is_none() {
            return Ok(0);
        }
        Ok(self
            .workers
            .iter()
            .filter(|worker| !worker.task.is_finished())
            .count())
    }

    async fn load_record(&self) -> Result<Option<PoolRecord>, PoolError> {
        match tokio::fs::read(&self.record_path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

//! A durable, single-node background job queue for shell commands.
//!
//! Jobs are enqueued by identifier, pulled by a pool of worker tasks,
//! executed as subprocesses, and routed through a retry-with-backoff policy
//! into either completion or a dead letter queue once their retries are
//! exhausted. All coordination between workers goes through the SQLite-backed
//! [`JobStore`]; acquisition is a single conditional update, so a job is
//! never executed by two workers at once.
//!
//! # Example
//!
//! ```no_run
//! # use cmdqueue::{Config, Queue};
//! # async fn example() -> Result<(), cmdqueue::QueueError> {
//! let mut queue = Queue::open(Config::default()).await?;
//! queue.enqueue("backup-1".into(), "tar czf backup.tgz data/", None).await?;
//! queue.start_workers(4).await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod executor;
pub mod job;
pub mod pool;
pub mod store;
pub(crate) mod worker;

use std::collections::HashMap;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

use crate::backoff::BackoffStrategy;
use crate::executor::CommandRunner;

pub use crate::config::{Config, ConfigError};
pub use crate::job::{Job, JobId, JobState};
pub use crate::pool::{PoolError, WorkerPool};
pub use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The queue facade: ties the job store and the worker pool together behind
/// the operations consumed by front ends.
pub struct Queue {
    store: JobStore,
    pool: WorkerPool,
    config: Config,
}

impl Queue {
    /// Opens the queue described by `config`, creating the database if
    /// needed.
    pub async fn open(config: Config) -> Result<Self, QueueError> {
        let store = JobStore::connect(&config.db_path).await?;
        let runner = CommandRunner::new(
            config.execution_timeout_secs.map(Duration::from_secs),
        );
        let backoff =
            BackoffStrategy::exponential(TimeDelta::seconds(i64::from(config.backoff_base)));
        let pool = WorkerPool::new(store.clone(), runner, backoff, config.pool_file.clone());
        Ok(Self {
            store,
            pool,
            config,
        })
    }

    /// Enqueues a new job. `max_retries` falls back to the configured
    /// default.
    pub async fn enqueue(
        &self,
        id: JobId,
        command: &str,
        max_retries: Option<u32>,
    ) -> Result<Job, QueueError> {
        let max_retries = max_retries.unwrap_or(self.config.max_retries);
        Ok(self.store.create_job(id, command, max_retries).await?)
    }

    /// Fetches a single job by id.
    pub async fn job(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get_job(id).await?)
    }

    /// Lists jobs, optionally filtered by state, newest first.
    pub async fn jobs(
        &self,
        state: Option<JobState>,
        limit: u32,
    ) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_jobs(state, limit).await?)
    }

    /// The jobs currently in the dead letter queue.
    pub async fn dlq_jobs(&self, limit: u32) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.dlq_jobs(limit).await?)
    }

    /// The number of jobs in each state.
    pub async fn stats(&self) -> Result<HashMap<JobState, i64>, QueueError> {
        Ok(self.store.stats().await?)
    }

    /// Moves a dead letter queue job back to `pending` with zero attempts.
    pub async fn retry_dead(&self, id: &JobId) -> Result<Job, QueueError> {
        Ok(self.store.reset_for_retry(id).await?)
    }

    /// Starts `count` workers draining this queue.
    pub async fn start_workers(&mut self, count: usize) -> Result<(), QueueError> {
        Ok(self.pool.start_workers(count).await?)
    }

    /// Gracefully stops all workers, aborting any that exceed the shutdown
    /// timeout.
    pub async fn stop_workers(&mut self) -> Result<(), QueueError> {
        Ok(self.pool.stop_workers().await?)
    }

    /// How many workers are still alive.
    pub async fn active_workers(&self) -> Result<usize, QueueError> {
        Ok(self.pool.active_workers().await?)
    }

    /// Direct access to the underlying store, for read-only front ends.
    pub fn store(&self) -> &JobStore {
        &self.store
    }
}

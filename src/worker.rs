use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffStrategy;
use crate::executor::{CommandRunner, ExecutionOutcome};
use crate::job::JobState;
use crate::store::{JobStore, StoreError};

/// Delay between polls when no work is ready.
const IDLE_DELAY: Duration = Duration::from_secs(1);
/// Delay after losing an acquisition race to another worker.
const CONTENTION_DELAY: Duration = Duration::from_millis(500);
/// Delay after a storage failure inside an iteration.
const ERROR_DELAY: Duration = Duration::from_secs(1);

/// A single worker: polls the store for ready jobs, acquires one at a time,
/// executes it, and records the outcome.
///
/// Workers share no in-memory state with each other; all coordination goes
/// through the [`JobStore`].
pub(crate) struct Worker {
    id: usize,
    store: JobStore,
    runner: CommandRunner,
    backoff: BackoffStrategy,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        store: JobStore,
        runner: CommandRunner,
        backoff: BackoffStrategy,
    ) -> Self {
        Self {
            id,
            store,
            runner,
            backoff,
        }
    }

    /// Runs the polling loop until the cancellation token fires.
    ///
    /// Cancellation is only observed between iterations and during idle
    /// sleeps: an execution already in flight is never interrupted by the
    /// graceful path.
    pub(crate) async fn run(self, cancellation: CancellationToken) {
        tracing::info!(worker_id = self.id, "Worker started");
        while !cancellation.is_cancelled() {
            let pause = match self.run_iteration().await {
                Ok(pause) => pause,
                Err(error) => {
                    // A bad iteration must never take the worker down.
                    tracing::error!(
                        worker_id = self.id,
                        ?error,
                        "Worker iteration failed: {error}"
                    );
                    Some(ERROR_DELAY)
                }
            };
            if let Some(delay) = pause {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        tracing::info!(worker_id = self.id, "Worker shut down");
    }

    /// One poll/acquire/execute/record cycle.
    ///
    /// Returns how long to pause before the next iteration, if at all.
    async fn run_iteration(&self) -> Result<Option<Duration>, StoreError> {
        let Some(candidate) = self.store.ready_jobs(1).await?.into_iter().next() else {
            return Ok(Some(IDLE_DELAY));
        };

        if !self.store.acquire_job(&candidate.id).await? {
            // Lost the race to another worker. Expected, not an error.
            return Ok(Some(CONTENTION_DELAY));
        }

        // Reload after acquisition so we execute the current record.
        let Some(mut job) = self.store.get_job(&candidate.id).await? else {
            tracing::warn!(worker_id = self.id, job_id = %candidate.id, "Acquired job vanished");
            return Ok(None);
        };

        tracing::debug!(worker_id = self.id, job_id = %job.id, "Executing job");
        match self.runner.run(&job.command).await {
            ExecutionOutcome::Success => {
                job.record_success();
                tracing::info!(worker_id = self.id, job_id = %job.id, "Job completed");
            }
            ExecutionOutcome::Failure(error) => {
                job.record_failure(error.to_string(), &self.backoff);
                if job.state == JobState::Dead {
                    tracing::error!(
                        worker_id = self.id,
                        job_id = %job.id,
                        attempts = job.attempts,
                        "Job moved to the DLQ after {} attempts",
                        job.attempts
                    );
                } else {
                    tracing::warn!(
                        worker_id = self.id,
                        job_id = %job.id,
                        "Job failed, will retry (attempt {}/{})",
                        job.attempts,
                        job.max_retries
                    );
                }
            }
        }
        self.store.update_job(&job).await?;
        Ok(None)
    }
}

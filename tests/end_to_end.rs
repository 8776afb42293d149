//! End-to-end scenarios: a queue on disk, a pool of workers, real
//! subprocesses.

use std::time::Duration;

use cmdqueue::{Config, Job, JobId, JobState, Queue};

fn config(dir: &tempfile::TempDir, backoff_base: u32) -> Config {
    Config {
        backoff_base,
        db_path: dir.path().join("jobs.db"),
        pool_file: dir.path().join("workers.json"),
        ..Config::default()
    }
}

async fn wait_for_state(queue: &Queue, id: &JobId, state: JobState) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = queue.job(id).await.unwrap().expect("job should exist");
        if job.state == state {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for `{id}` to reach {state}, currently {}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn a_succeeding_job_is_completed_on_the_first_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = Queue::open(config(&dir, 2)).await.unwrap();

    let job = queue.enqueue("t1".into(), "echo hi", None).await.unwrap();
    assert_eq!(job.state, JobState::Pending);

    queue.start_workers(2).await.unwrap();
    let job = wait_for_state(&queue, &"t1".into(), JobState::Completed).await;
    queue.stop_workers().await.unwrap();

    assert_eq!(job.attempts, 1);
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn an_always_failing_job_ends_in_the_dlq() {
    let dir = tempfile::tempdir().unwrap();
    // Zero backoff so all retry attempts happen within the test window.
    let mut queue = Queue::open(config(&dir, 0)).await.unwrap();

    queue
        .enqueue("doomed".into(), "echo no-luck >&2; exit 1", Some(2))
        .await
        .unwrap();

    queue.start_workers(1).await.unwrap();
    let job = wait_for_state(&queue, &"doomed".into(), JobState::Dead).await;
    queue.stop_workers().await.unwrap();

    assert_eq!(job.attempts, 2);
    assert_eq!(job.next_retry_at, None);
    assert_eq!(job.error_message.as_deref(), Some("no-luck"));

    let dlq = queue.dlq_jobs(10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].id.as_str(), "doomed");
}

#[tokio::test]
async fn a_dead_job_can_be_reset_back_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = Queue::open(config(&dir, 0)).await.unwrap();

    queue
        .enqueue("flaky".into(), "exit 1", Some(1))
        .await
        .unwrap();

    queue.start_workers(1).await.unwrap();
    wait_for_state(&queue, &"flaky".into(), JobState::Dead).await;
    queue.stop_workers().await.unwrap();

    let reset = queue.retry_dead(&"flaky".into()).await.unwrap();
    assert_eq!(reset.state, JobState::Pending);
    assert_eq!(reset.attempts, 0);
    assert_eq!(reset.error_message, None);

    // Resetting a job that is no longer dead is rejected.
    assert!(queue.retry_dead(&"flaky".into()).await.is_err());
}

#[tokio::test]
async fn multiple_workers_drain_the_queue_without_double_execution() {
    let dir = tempfile::tempdir().unwrap();
    let marker_dir = dir.path().join("markers");
    std::fs::create_dir(&marker_dir).unwrap();
    let mut queue = Queue::open(config(&dir, 2)).await.unwrap();

    // Each command appends a line to its own marker file; a double execution
    // would leave two lines behind.
    for i in 0..5 {
        let marker = marker_dir.join(format!("job-{i}"));
        let command = format!("echo ran >> {}", marker.display());
        queue
            .enqueue(format!("job-{i}").into(), &command, None)
            .await
            .unwrap();
    }

    queue.start_workers(3).await.unwrap();
    for i in 0..5 {
        wait_for_state(&queue, &format!("job-{i}").into(), JobState::Completed).await;
    }
    queue.stop_workers().await.unwrap();

    for i in 0..5 {
        let contents = std::fs::read_to_string(marker_dir.join(format!("job-{i}"))).unwrap();
        assert_eq!(contents.lines().count(), 1, "job-{i} ran more than once");
    }

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.get(&JobState::Completed), Some(&5));
    assert_eq!(queue.active_workers().await.unwrap(), 0);
}

#[tokio::test]
async fn the_pool_record_tracks_the_running_workers() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = Queue::open(config(&dir, 2)).await.unwrap();

    assert_eq!(queue.active_workers().await.unwrap(), 0);

    queue.start_workers(2).await.unwrap();
    assert!(dir.path().join("workers.json").exists());
    assert_eq!(queue.active_workers().await.unwrap(), 2);
    assert!(queue.start_workers(2).await.is_err());

    queue.stop_workers().await.unwrap();
    assert!(!dir.path().join("workers.json").exists());
    assert_eq!(queue.active_workers().await.unwrap(), 0);
}

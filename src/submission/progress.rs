//! Shared progress tracker for a submission run.
//!
//! The runner mutates the tracker in place while an observer (the CLI
//! progress bar, or any other poller) reads consistent snapshots. Cloning a
//! [`ProgressTracker`] yields another handle to the same state.
//!
//! # Example
//!
//! ```rust,ignore
//! let tracker = ProgressTracker::new(entries.len());
//! let observer = tracker.clone();
//! tokio::spawn(async move {
//!     observer.observe(Duration::from_millis(500), |s| println!("{}", s.current)).await
//! });
//! machine.run(&entries, &tracker).await;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{PilotError, Result};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// Point-in-time copy of the tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: Uuid,
    pub total: usize,
    /// Entries submitted or skipped.
    pub completed: usize,
    pub failed: usize,
    /// Human-readable description of the entry in flight.
    pub current: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Entries that reached a terminal state.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

/// Cloneable handle over shared run progress.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressSnapshot {
                run_id: Uuid::new_v4(),
                total,
                completed: 0,
                failed: 0,
                current: String::new(),
                status: RunStatus::Processing,
                error: None,
                started_at: Utc::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        // A panicked writer leaves plain counters behind; keep reading them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.lock().run_id
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    pub fn set_current(&self, current: impl Into<String>) {
        self.lock().current = current.into();
    }

    pub fn record_success(&self) {
        self.lock().completed += 1;
    }

    /// Skipped entries count as completed.
    pub fn record_skipped(&self) {
        self.lock().completed += 1;
    }

    pub fn record_failure(&self) {
        self.lock().failed += 1;
    }

    /// Mark the run as finished normally.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.status = RunStatus::Completed;
        state.current.clear();
    }

    /// Mark the run as aborted.
    pub fn fail(&self, error: impl Into<String>) {
        let mut state = self.lock();
        state.status = RunStatus::Failed;
        state.error = Some(error.into());
    }

    /// Poll the tracker every `interval`, calling `on_update` with each
    /// snapshot, until the run reaches a terminal status.
    ///
    /// Returns the terminal snapshot.
    pub async fn observe<F>(&self, interval: Duration, mut on_update: F) -> ProgressSnapshot
    where
        F: FnMut(&ProgressSnapshot),
    {
        loop {
            let snapshot = self.snapshot();
            on_update(&snapshot);
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Observe the run driven by `task` until the task ends.
    ///
    /// Unlike [`observe`](Self::observe) this returns even when the task
    /// dies before reaching a terminal status: a panicked or cancelled task
    /// marks the run failed and surfaces as an error.
    pub async fn observe_task<T, F>(
        &self,
        mut task: JoinHandle<T>,
        interval: Duration,
        mut on_update: F,
    ) -> Result<(T, ProgressSnapshot)>
    where
        F: FnMut(&ProgressSnapshot),
    {
        let joined = {
            let observer = self.observe(interval, &mut on_update);
            tokio::pin!(observer);
            tokio::select! {
                joined = &mut task => joined,
                _ = &mut observer => task.await,
            }
        };

        match joined {
            Ok(value) => {
                let snapshot = self.snapshot();
                on_update(&snapshot);
                Ok((value, snapshot))
            }
            Err(e) => {
                let message = if e.is_panic() {
                    "submission task panicked"
                } else {
                    "submission task was cancelled"
                };
                self.fail(message);
                on_update(&self.snapshot());
                Err(PilotError::Other(anyhow::anyhow!(message)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_processing() {
        let tracker = ProgressTracker::new(5);
        let snap = tracker.snapshot();
        assert_eq!(snap.total, 5);
        assert_eq!(snap.processed(), 0);
        assert_eq!(snap.status, RunStatus::Processing);
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = ProgressTracker::new(3);
        let observer = tracker.clone();

        tracker.record_success();
        tracker.record_skipped();
        tracker.record_failure();
        tracker.set_current("[3/3] 2025-01-08");

        let snap = observer.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.current, "[3/3] 2025-01-08");
        assert_eq!(observer.run_id(), tracker.run_id());
    }

    #[test]
    fn test_fail_records_error() {
        let tracker = ProgressTracker::new(2);
        tracker.fail("Login failed: bad password");
        let snap = tracker.snapshot();
        assert_eq!(snap.status, RunStatus::Failed);
        assert!(snap.error.unwrap().contains("bad password"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let tracker = ProgressTracker::new(1);
        tracker.finish();
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["status"], "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_stops_at_terminal_status() {
        let tracker = ProgressTracker::new(2);
        let worker = tracker.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            worker.record_success();
            tokio::time::sleep(Duration::from_secs(1)).await;
            worker.record_success();
            worker.finish();
        });

        let mut updates = 0;
        let last = tracker
            .observe(Duration::from_millis(500), |_| updates += 1)
            .await;
        handle.await.unwrap();

        assert_eq!(last.status, RunStatus::Completed);
        assert_eq!(last.completed, 2);
        assert!(updates >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_task_returns_task_output() {
        let tracker = ProgressTracker::new(1);
        let worker = tracker.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            worker.record_success();
            worker.finish();
            "done"
        });

        let (value, last) = tracker
            .observe_task(task, Duration::from_millis(500), |_| {})
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(last.status, RunStatus::Completed);
        assert_eq!(last.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_task_ends_when_task_panics() {
        let tracker = ProgressTracker::new(3);
        let worker = tracker.clone();
        let task = tokio::spawn(async move {
            worker.record_success();
            tokio::time::sleep(Duration::from_secs(1)).await;
            panic!("driver went away");
        });

        let mut seen = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            tracker.observe_task(task, Duration::from_millis(500), |s| seen.push(s.status)),
        )
        .await
        .expect("observer must not hang on a dead task");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        let snap = tracker.snapshot();
        assert_eq!(snap.status, RunStatus::Failed);
        assert_eq!(snap.completed, 1);
        assert_eq!(seen.last(), Some(&RunStatus::Failed));
    }
}

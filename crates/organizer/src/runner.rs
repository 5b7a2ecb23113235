//! Sequential background runner for blocking file I/O and organize passes.
//!
//! Jobs run one at a time on the tokio blocking pool, strictly in the order
//! they were posted. Callers rely on that ordering: a reply posted after a
//! batch of reads is only delivered once every read in the batch has
//! completed.

use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a sequential job queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct TaskRunner {
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskRunner {
    /// Spawn the queue worker onto the current tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    error!(error = %e, "background job failed");
                }
            }
            debug!("task runner stopped");
        });
        Self { tx }
    }

    /// Queue `job` behind every previously posted job.
    ///
    /// Returns `false` if the worker is gone (runtime shutting down).
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn jobs_run_in_post_order() {
        let runner = TaskRunner::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for i in 0..16 {
            let seen = seen.clone();
            let done_tx = done_tx.clone();
            runner.post(move || {
                // Earlier jobs sleep longer; order must still hold.
                std::thread::sleep(std::time::Duration::from_millis((16 - i) as u64));
                seen.lock().unwrap().push(i);
                done_tx.send(()).unwrap();
            });
        }
        for _ in 0..16 {
            done_rx.recv().await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_the_queue() {
        let runner = TaskRunner::spawn();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        runner.post(|| panic!("boom"));
        runner.post(move || done_tx.send(7).unwrap());
        assert_eq!(done_rx.recv().await, Some(7));
    }
}

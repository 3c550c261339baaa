//! Bounded job queue for work deferred off the receive path.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::BoxFuture;

/// Default maximum notification jobs running at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 32;

/// A unit of work submitted by the dispatcher.
pub type Job = BoxFuture<'static, ()>;

/// Runs jobs on spawned tasks, at most `capacity` at a time.
///
/// `submit` never waits: a job that finds no free slot is handed back.
#[derive(Clone, Debug)]
pub struct JobQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl JobQueue {
    /// Create a queue allowing `capacity` concurrent jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Start `job` on its own task, or hand it back if the queue is full.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(job),
        };

        tokio::spawn(async move {
            // Slot is held until the job finishes
            let _permit = permit;
            job.await;
        });
        Ok(())
    }

    /// Jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Maximum concurrent jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_JOBS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_job_runs_off_caller() {
        let queue = JobQueue::new(2);
        let (tx, rx) = oneshot::channel();

        queue
            .submit(Box::pin(async move {
                let _ = tx.send(42);
            }))
            .unwrap_or_else(|_| panic!("queue rejected job"));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let queue = JobQueue::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        queue
            .submit(Box::pin(async move {
                let _ = release_rx.await;
            }))
            .unwrap_or_else(|_| panic!("queue rejected job"));
        assert_eq!(queue.in_flight(), 1);

        assert!(queue.submit(Box::pin(async {})).is_err());

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if queue.in_flight() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.submit(Box::pin(async {})).is_ok());
    }
}

//! Bounded admission of reply jobs.
//!
//! A fixed number of worker tasks drain a bounded queue. Before a job is queued it must
//! win a permit from a semaphore sized `workers + queue_capacity`; the permit travels with
//! the job and is released when the job finishes, panics, or is dropped. When no permit
//! is free the job is refused on the spot, so the receive path never waits.
use log::{debug, error, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::metrics::RelayMetrics;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Admitted {
    job: Job,
    permit: OwnedSemaphorePermit,
}

pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
    queue: mpsc::Sender<Admitted>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<RelayMetrics>,
}

impl AdmissionController {
    /// Spawn `workers` worker tasks on the current runtime.
    pub fn new(workers: usize, queue_capacity: usize, metrics: Arc<RelayMetrics>) -> Self {
        let workers = workers.max(1);
        let capacity = workers + queue_capacity;
        let (tx, rx) = mpsc::channel::<Admitted>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(Admitted { job, permit }) = next else {
                            break;
                        };
                        // A panic stays inside the job's own task.
                        if let Err(e) = tokio::spawn(job).await {
                            error!("Worker {} job failed: {}", worker_id, e);
                        }
                        drop(permit);
                    }
                    debug!("Worker {} exiting", worker_id);
                })
            })
            .collect();

        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            queue: tx,
            workers: handles,
            metrics,
        }
    }

    /// Try to admit `job`. Returns `false` when every slot is taken; the job is dropped.
    pub fn try_schedule<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                self.metrics.inc_admission_rejected();
                return false;
            }
        };
        let admitted = Admitted {
            job: Box::pin(job),
            permit,
        };
        // The queue holds `capacity` items and every queued item holds a permit, so a
        // permit-holder always finds room.
        match self.queue.try_send(admitted) {
            Ok(()) => {
                self.metrics.inc_admission_accepted();
                true
            }
            Err(e) => {
                warn!("Admission queue unexpectedly unavailable: {}", e);
                self.metrics.inc_admission_rejected();
                false
            }
        }
    }

    /// Permits currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting work and wait for queued jobs to drain.
    pub async fn shutdown(self) {
        self.permits.close();
        drop(self.queue);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn rejects_exactly_one_past_capacity() {
        let metrics = Arc::new(RelayMetrics::new());
        let ctl = AdmissionController::new(2, 3, metrics.clone());
        let mut releases = Vec::new();
        let mut accepted = 0;
        for _ in 0..6 {
            let (tx, rx) = oneshot::channel::<()>();
            if ctl.try_schedule(async move {
                let _ = rx.await;
            }) {
                accepted += 1;
                releases.push(tx);
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(metrics.snapshot().admission_rejected, 1);
        assert_eq!(ctl.available_slots(), 0);

        // Finishing one job frees exactly one slot.
        let first = releases.remove(0);
        let _ = first.send(());
        settle().await;
        assert_eq!(ctl.available_slots(), 1);
        let (tx, rx) = oneshot::channel::<()>();
        assert!(ctl.try_schedule(async move {
            let _ = rx.await;
        }));
        releases.push(tx);
        assert!(!ctl.try_schedule(async {}));
        drop(releases);
    }

    #[tokio::test]
    async fn panicking_job_releases_its_slot() {
        let ctl = AdmissionController::new(1, 0, Arc::new(RelayMetrics::new()));
        assert!(ctl.try_schedule(async { panic!("boom") }));
        settle().await;
        assert_eq!(ctl.available_slots(), 1);

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        assert!(ctl.try_schedule(async move {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        settle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn workers_bound_concurrency() {
        let ctl = AdmissionController::new(2, 10, Arc::new(RelayMetrics::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            assert!(ctl.try_schedule(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        ctl.shutdown().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}

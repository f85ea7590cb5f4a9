use crate::jobs::executor::Executor;
use crate::jobs::model::Job;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;

/// Bounds how many executions run at once and keeps a handle on every one it
/// started, so shutdown can wait for them.
///
/// The counter is process-local and only shapes load; the store's atomic claim
/// is what keeps a job from running twice.
pub struct Dispatcher {
    executor: Executor,
    max_concurrent: usize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    tasks: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(executor: Executor, max_concurrent: usize) -> Self {
        Self {
            executor,
            max_concurrent,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight() < self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed since construction.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Start executing `job` in the background and return immediately.
    /// Callers check `has_capacity` first.
    pub fn launch(&self, job: Job) {
        let slot = InFlightSlot::acquire(&self.in_flight);
        self.peak_in_flight.fetch_max(slot.count, Ordering::AcqRel);

        let executor = self.executor.clone();
        let mut tasks = self.tasks();
        reap_finished(&mut tasks);

        tasks.spawn(async move {
            // released on every exit path, including panics
            let _slot = slot;
            let job_id = job.id;
            if let Err(e) = executor.run(job).await {
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    "failed to record job outcome, job left in processing"
                );
            }
        });
    }

    /// Wait until every launched execution has finished, including ones
    /// launched while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                return;
            }
            while let Some(joined) = batch.join_next().await {
                log_join_error(joined);
            }
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct InFlightSlot {
    counter: Arc<AtomicUsize>,
    count: usize,
}

impl InFlightSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        let count = counter.fetch_add(1, Ordering::AcqRel) + 1;
        Self {
            counter: Arc::clone(counter),
            count,
        }
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        log_join_error(joined);
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "job task panicked");
        }
    }
}

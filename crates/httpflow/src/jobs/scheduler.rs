use crate::config::EngineConfig;
use crate::jobs::dispatcher::Dispatcher;
use crate::jobs::executor::Executor;
use crate::jobs::metrics::{PollerState, StatusSnapshot};
use crate::jobs::store::JobStore;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    /// Stopped because capacity ran out or nothing was pending.
    Finished { launched: usize },
    /// A claim failed; the rest of the tick was abandoned.
    Aborted { launched: usize },
}

/// The poller: on every interval, claims jobs until the dispatcher is full or
/// the queue is empty. Cloning yields another handle to the same poller.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    tick_running: AtomicBool,
    timer: Mutex<TimerSlot>,
}

#[derive(Default)]
struct TimerSlot {
    // `None` while stopped
    cancel: Option<CancellationToken>,
    // the latest timer task; after a stop it may still be finishing a claim
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, cfg: &EngineConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        if store.max_attempts() != cfg.max_attempts {
            anyhow::bail!(
                "store enforces max_attempts={} but the engine is configured with {}",
                store.max_attempts(),
                cfg.max_attempts
            );
        }

        let executor = Executor::new(Arc::clone(&store), cfg.request_timeout)?;
        let dispatcher = Dispatcher::new(executor, cfg.max_concurrent);

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                poll_interval: cfg.poll_interval,
                tick_running: AtomicBool::new(false),
                timer: Mutex::new(TimerSlot::default()),
            }),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    /// Start the recurring timer. The first tick fires immediately, or as
    /// soon as a tick left over from a previous run has finished.
    /// Returns false (and does nothing) when already started.
    pub fn start(&self) -> bool {
        let mut timer = self.timer();
        if timer.cancel.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let previous = timer.task.take();
        timer.task = Some(tokio::spawn(self.clone().run_timer(cancel.clone(), previous)));
        timer.cancel = Some(cancel);

        tracing::info!(
            poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
            max_concurrent = self.inner.dispatcher.max_concurrent(),
            "poller started"
        );
        true
    }

    /// Stop the timer. A tick in progress ends after its current claim, so a
    /// job already taken from the store is still launched rather than
    /// stranded; the tick-running flag clears when that claim returns.
    /// Executions already launched keep running. Returns false when not
    /// started.
    pub fn stop(&self) -> bool {
        let Some(cancel) = self.timer().cancel.take() else {
            return false;
        };

        cancel.cancel();
        tracing::info!("poller stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.timer().cancel.is_some()
    }

    pub fn state(&self) -> PollerState {
        if self.inner.tick_running.load(Ordering::Acquire) {
            PollerState::TickRunning
        } else {
            PollerState::Idle
        }
    }

    /// Stop polling, then wait up to `grace` for the last tick and for
    /// in-flight executions. Returns true if everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        let timer_task = self.timer().task.take();

        let in_flight = self.inner.dispatcher.in_flight();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for in-flight jobs");
        }

        let drain = async {
            if let Some(task) = timer_task {
                // a tick finishing its last claim may still launch one more job
                let _ = task.await;
            }
            self.inner.dispatcher.wait_idle().await;
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    in_flight = self.inner.dispatcher.in_flight(),
                    grace_ms = grace.as_millis() as u64,
                    "shutdown grace elapsed with jobs still in flight"
                );
                false
            }
        }
    }

    /// Poll until `stop_signal` resolves, then shut down with `grace` whether
    /// the signal carried an error or not. The signal's result is returned
    /// once draining is over.
    pub async fn run_until<F>(&self, stop_signal: F, grace: Duration) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        self.start();
        let exit = stop_signal.await;
        if let Err(e) = &exit {
            tracing::error!(error = %e, "stopping poller after failure");
        }

        let drained = self.shutdown(grace).await;
        tracing::info!(drained, "poller shut down");
        exit
    }

    /// One fill-to-capacity pass. A tick that starts while another is running
    /// returns `Skipped` without touching the store.
    pub async fn tick(&self) -> TickOutcome {
        self.fill(None).await
    }

    async fn fill(&self, stop: Option<&CancellationToken>) -> TickOutcome {
        let Some(_running) = TickGuard::enter(&self.inner.tick_running) else {
            tracing::debug!("previous tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let dispatcher = &self.inner.dispatcher;
        let mut launched = 0;

        while dispatcher.has_capacity() {
            if stop.is_some_and(|c| c.is_cancelled()) {
                break;
            }
            match self.inner.store.claim_next().await {
                Ok(Some(job)) => {
                    tracing::debug!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        priority = job.priority,
                        "claimed job"
                    );
                    dispatcher.launch(job);
                    launched += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, launched, "claim failed, abandoning tick");
                    return TickOutcome::Aborted { launched };
                }
            }
        }

        if launched > 0 {
            tracing::debug!(launched, in_flight = dispatcher.in_flight(), "tick finished");
        }
        TickOutcome::Finished { launched }
    }

    pub async fn status(&self) -> anyhow::Result<StatusSnapshot> {
        let counts = self.inner.store.status_counts().await?;
        let dispatcher = &self.inner.dispatcher;

        Ok(StatusSnapshot {
            at: Utc::now(),
            pending: counts.pending,
            processing: counts.processing,
            failed: counts.failed,
            completed_today: counts.completed_today,
            current_in_flight: dispatcher.in_flight(),
            max_concurrent: dispatcher.max_concurrent(),
            peak_in_flight: dispatcher.peak_in_flight(),
            poller_running: self.is_running(),
            poller_state: self.state(),
        })
    }

    async fn run_timer(self, cancel: CancellationToken, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = previous => {}
            }
        }

        let mut interval = tokio::time::interval(self.inner.poll_interval);
        // a tick that overruns swallows the ticks it overlapped; they are not queued
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.fill(Some(&cancel)).await;
        }
    }

    fn timer(&self) -> MutexGuard<'_, TimerSlot> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds the tick-running flag; clears it when the tick ends or is dropped.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

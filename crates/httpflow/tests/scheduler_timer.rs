// tests/scheduler_timer.rs
//
// The tokio clock is paused in these tests, so intervals and sleeps advance
// instantly and deterministically.
use async_trait::async_trait;
use httpflow::config::EngineConfig;
use httpflow::jobs::{Job, JobStore, Scheduler, StatusCounts};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// An always-empty queue that counts claims and optionally makes each one slow.
#[derive(Default)]
struct CountingStore {
    claims: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    claim_delay: Option<Duration>,
}

impl CountingStore {
    fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for CountingStore {
    fn max_attempts(&self) -> i32 {
        EngineConfig::default().max_attempts
    }
    async fn claim_next(&self) -> anyhow::Result<Option<Job>> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.claim_delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(None)
    }
    async fn complete(&self, _job_id: Uuid, _result: &str) -> anyhow::Result<()> {
        anyhow::bail!("nothing is ever claimed")
    }
    async fn requeue(&self, _job_id: Uuid, _error_message: &str) -> anyhow::Result<()> {
        anyhow::bail!("nothing is ever claimed")
    }
    async fn fail(&self, _job_id: Uuid, _error_message: &str) -> anyhow::Result<()> {
        anyhow::bail!("nothing is ever claimed")
    }
    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        Ok(StatusCounts::default())
    }
    async fn get_job(&self, _job_id: Uuid) -> anyhow::Result<Option<Job>> {
        Ok(None)
    }
}

fn every(poll_interval: Duration) -> EngineConfig {
    EngineConfig {
        poll_interval,
        ..EngineConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn first_tick_fires_immediately_then_every_interval() {
    let store = Arc::new(CountingStore::default());
    let scheduler = Scheduler::new(store.clone(), &every(Duration::from_millis(100))).unwrap();

    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(store.claims(), 1);

    // ticks at 0, 100, ..., 1000
    tokio::time::sleep(Duration::from_millis(1_049)).await;
    assert_eq!(store.claims(), 11);

    assert!(scheduler.stop());
}

#[tokio::test(start_paused = true)]
async fn starting_twice_keeps_a_single_timer() {
    let store = Arc::new(CountingStore::default());
    let scheduler = Scheduler::new(store.clone(), &every(Duration::from_millis(100))).unwrap();

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(!scheduler.clone().start());
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(1_050)).await;
    let claims = store.claims();
    assert!((10..=12).contains(&claims), "claims = {claims}");

    assert!(scheduler.stop());
}

#[tokio::test(start_paused = true)]
async fn stop_halts_polling_and_is_idempotent() {
    let store = Arc::new(CountingStore::default());
    let scheduler = Scheduler::new(store.clone(), &every(Duration::from_millis(100))).unwrap();

    assert!(!scheduler.stop(), "stop before start is a no-op");

    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    assert!(!scheduler.is_running());

    let at_stop = store.claims();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.claims(), at_stop);

    // and it can be started again
    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(store.claims(), at_stop + 1);
    assert!(scheduler.stop());
}

#[tokio::test(start_paused = true)]
async fn slow_ticks_never_overlap() {
    let store = Arc::new(CountingStore {
        claim_delay: Some(Duration::from_millis(250)),
        ..CountingStore::default()
    });
    let scheduler = Scheduler::new(store.clone(), &every(Duration::from_millis(100))).unwrap();

    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    assert!(scheduler.stop());

    assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
    // a slow tick delays the next one instead of running beside it
    let claims = store.claims();
    assert!((3..=5).contains(&claims), "claims = {claims}");
}

#[tokio::test(start_paused = true)]
async fn restart_during_a_slow_tick_resumes_when_it_ends() {
    let store = Arc::new(CountingStore {
        claim_delay: Some(Duration::from_millis(250)),
        ..CountingStore::default()
    });
    let scheduler = Scheduler::new(store.clone(), &every(Duration::from_secs(1))).unwrap();

    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.claims(), 1);

    // the first timer's claim is still running
    assert!(scheduler.stop());
    assert!(scheduler.start());

    // the new timer ticks as soon as the old claim returns at 250ms,
    // not a full interval later
    tokio::time::sleep(Duration::from_millis(290)).await;
    assert_eq!(store.claims(), 2);
    assert_eq!(store.max_active.load(Ordering::SeqCst), 1);

    assert!(scheduler.stop());
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_nothing_in_flight_returns_at_once() {
    let store = Arc::new(CountingStore::default());
    let scheduler = Scheduler::new(store.clone(), &every(Duration::from_millis(100))).unwrap();

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = tokio::time::Instant::now();
    assert!(scheduler.shutdown(Duration::from_secs(15)).await);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!scheduler.is_running());
}

#[test]
fn invalid_engine_settings_are_refused() {
    let store = Arc::new(CountingStore::default());
    let cfg = EngineConfig {
        max_concurrent: 0,
        ..EngineConfig::default()
    };
    assert!(Scheduler::new(store, &cfg).is_err());
}

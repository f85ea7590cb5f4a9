// tests/admin_api.rs
mod common;

use common::{engine, spawn_server};

use httpflow::api::{router, AdminState};
use httpflow::jobs::{JobStore, MemoryJobStore, NewJob, Scheduler};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

async fn admin() -> (Arc<MemoryJobStore>, String) {
    let store = Arc::new(MemoryJobStore::new(3));
    let scheduler = Scheduler::new(store.clone(), &engine(4, 3)).unwrap();
    let addr = spawn_server(router(AdminState { scheduler })).await;
    (store, format!("http://{addr}"))
}

#[tokio::test]
async fn health_is_plain_ok() {
    let (_store, base) = admin().await;

    let res = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn status_reports_counts_and_poller_state() {
    let (store, base) = admin().await;
    store.enqueue(NewJob::new("GET", "http://localhost/a")).unwrap();
    store.enqueue(NewJob::new("GET", "http://localhost/b")).unwrap();
    store.claim_next().await.unwrap().unwrap();

    let res = reqwest::get(format!("{base}/status")).await.unwrap();
    assert_eq!(res.status(), 200);
    let v: Value = res.json().await.unwrap();

    assert_eq!(v["pending"], 1);
    assert_eq!(v["processing"], 1);
    assert_eq!(v["failed"], 0);
    assert_eq!(v["completed_today"], 0);
    assert_eq!(v["current_in_flight"], 0);
    assert_eq!(v["max_concurrent"], 4);
    assert_eq!(v["poller_running"], false);
    assert_eq!(v["poller_state"], "idle");
    assert!(v["at"].is_string());
}

#[tokio::test]
async fn prometheus_metrics_match_status() {
    let (store, base) = admin().await;
    store.enqueue(NewJob::new("GET", "http://localhost/a")).unwrap();

    let res = reqwest::get(format!("{base}/metrics/prom")).await.unwrap();
    assert_eq!(res.status(), 200);
    let content_type = res
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let text = res.text().await.unwrap();
    assert!(text.contains("httpflow_pending_jobs 1\n"));
    assert!(text.contains("httpflow_max_concurrent 4\n"));
}

#[tokio::test]
async fn job_lookup() {
    let (store, base) = admin().await;
    let id = store
        .enqueue(NewJob::new("POST", "http://localhost/x").body("{}").priority(2).owner("ops"))
        .unwrap();

    let res = reqwest::get(format!("{base}/jobs/{id}")).await.unwrap();
    assert_eq!(res.status(), 200);
    let v: Value = res.json().await.unwrap();
    assert_eq!(v["id"], id.to_string());
    assert_eq!(v["status"], "pending");
    assert_eq!(v["attempts"], 0);
    assert_eq!(v["priority"], 2);
    assert_eq!(v["method"], "POST");
    assert_eq!(v["owner_id"], "ops");

    let res = reqwest::get(format!("{base}/jobs/{}", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let v: Value = res.json().await.unwrap();
    assert_eq!(v["error"], "job not found");

    let res = reqwest::get(format!("{base}/jobs/not-a-uuid")).await.unwrap();
    assert_eq!(res.status(), 400);
}

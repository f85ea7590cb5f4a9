use axum::Router;
use httpflow::config::EngineConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

/// Connects to TEST_DATABASE_URL, migrates and empties `jobs`.
/// Returns `None` (and the caller skips) when no database is configured.
#[allow(dead_code)]
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    httpflow::db::run_migrations(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}

/// Serve `app` on an ephemeral local port for the rest of the test.
#[allow(dead_code)]
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server crashed");
    });

    addr
}

#[allow(dead_code)]
pub fn engine(max_concurrent: usize, max_attempts: i32) -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        max_concurrent,
        max_attempts,
    }
}

/// Poll `check` every few milliseconds until it returns true or `within` elapses.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

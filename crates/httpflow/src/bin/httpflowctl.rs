use httpflow::config::EngineConfig;
use httpflow::db;
use httpflow::jobs::{Job, JobStore, NewJob, PgJobStore};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;
use uuid::Uuid;

const USAGE: &str = "httpflowctl <command>\n\
     Commands:\n\
     - migrate\n\
     - reset\n\
     - enqueue <method> <url> [body] [priority]\n\
     - seed <n> <url>\n\
     - status\n\
     - list [status] [limit]\n\
     - show <job_id>\n\
     - retry <job_id>\n\
     - requeue-stuck <older_than_secs>\n\
     \n\
     Uses DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    let max_attempts = EngineConfig::max_attempts_from_env()?;
    let store = PgJobStore::new(pool.clone(), max_attempts);

    match args[1].as_str() {
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrations OK");
        }
        "reset" => reset(&pool).await?,
        "enqueue" => {
            let (Some(method), Some(target)) = (args.get(2), args.get(3)) else {
                anyhow::bail!("usage: httpflowctl enqueue <method> <url> [body] [priority]");
            };
            let mut job = NewJob::new(method, target);
            if let Some(body) = args.get(4).filter(|b| !b.is_empty()) {
                job = job.body(body.as_str());
            }
            if let Some(priority) = args.get(5) {
                job = job.priority(priority.parse()?);
            }
            let id = store.enqueue(job).await?;
            println!("+ enqueued {} {} id={id}", method.to_uppercase(), target);
        }
        "seed" => {
            let n: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            let target = args
                .get(3)
                .ok_or_else(|| anyhow::anyhow!("usage: httpflowctl seed <n> <url>"))?;
            seed(&store, n, target).await?;
        }
        "status" => {
            let counts = store.status_counts().await?;
            println!(
                "jobs: pending={} processing={} failed={} completed_today={}",
                counts.pending, counts.processing, counts.failed, counts.completed_today
            );
        }
        "list" => {
            let status = args.get(2).map(String::as_str).filter(|s| *s != "all");
            let limit: i64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
            for job in store.list_recent(status, limit).await? {
                print_job(&job);
            }
        }
        "show" => {
            let job_id = parse_id(args.get(2), "show")?;
            match store.get_job(job_id).await? {
                Some(job) => {
                    print_job(&job);
                    if let Some(result) = &job.result {
                        println!("result: {result}");
                    }
                }
                None => println!("job {job_id} not found"),
            }
        }
        "retry" => {
            let job_id = parse_id(args.get(2), "retry")?;
            if store.retry_failed(job_id).await? {
                println!("job {job_id} re-queued");
            } else {
                println!("job {job_id} is not failed; nothing to do");
            }
        }
        "requeue-stuck" => {
            let Some(raw) = args.get(2) else {
                anyhow::bail!("usage: httpflowctl requeue-stuck <older_than_secs>");
            };
            let secs: u64 = raw.parse()?;
            let moved = store.requeue_stuck(Duration::from_secs(secs)).await?;
            println!("recovered {moved} job(s) stuck in processing for over {secs}s");
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE jobs")
        .execute(pool)
        .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(store: &PgJobStore, n: i64, target: &str) -> anyhow::Result<()> {
    for i in 0..n {
        // alternate plain GETs and JSON POSTs; priorities cycle 0..3
        let job = if i % 2 == 0 {
            NewJob::new("GET", target)
        } else {
            NewJob::new("POST", target).body(format!(r#"{{"seq":{i}}}"#))
        };
        let job = job.priority((i % 3) as i32);

        let id = store.enqueue(job).await?;
        println!("+ inserted job #{i} id={id}");
    }
    Ok(())
}

fn parse_id(arg: Option<&String>, cmd: &str) -> anyhow::Result<Uuid> {
    let raw = arg.ok_or_else(|| anyhow::anyhow!("usage: httpflowctl {cmd} <job_id>"))?;
    Ok(raw.parse()?)
}

fn print_job(job: &Job) {
    println!(
        "JOB: id={} status={} attempts={} priority={} {} {} updated_at={} error={:?}",
        job.id,
        job.status,
        job.attempts,
        job.priority,
        job.method,
        job.url,
        job.updated_at.to_rfc3339(),
        job.error_message
    );
}

use std::time::Duration;

/// Static engine settings. Never mutated after startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_concurrent: usize,
    pub max_attempts: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_500),
            request_timeout: Duration::from_secs(10),
            max_concurrent: 5,
            max_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// `HTTPFLOW_MAX_ATTEMPTS`, falling back to `MAX_ATTEMPTS`, then the default.
    /// A malformed or non-positive value is an error.
    pub fn max_attempts_from_env() -> anyhow::Result<i32> {
        let max_attempts = env_parse("HTTPFLOW_MAX_ATTEMPTS", "MAX_ATTEMPTS")?
            .unwrap_or(Self::default().max_attempts);
        if max_attempts < 1 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        Ok(max_attempts)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll interval must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("request timeout must be greater than zero");
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        if self.max_attempts < 1 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        Ok(())
    }
}

// Process configuration, loaded once from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub shutdown_grace: Duration,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let defaults = EngineConfig::default();

        let engine = EngineConfig {
            poll_interval: env_millis("HTTPFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            request_timeout: env_millis("HTTPFLOW_REQUEST_TIMEOUT_MS", "REQUEST_TIMEOUT_MS")?
                .unwrap_or(defaults.request_timeout),
            max_concurrent: env_parse("HTTPFLOW_MAX_CONCURRENT", "MAX_CONCURRENT")?
                .unwrap_or(defaults.max_concurrent),
            max_attempts: EngineConfig::max_attempts_from_env()?,
        };
        engine.validate()?;

        let admin_addr = env_or_fallback("HTTPFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("HTTPFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let db_max_connections = env_parse::<u32>("HTTPFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS")?
            .unwrap_or(8)
            .clamp(1, 64);

        let db_acquire_timeout = Duration::from_secs(
            env_parse::<u64>("HTTPFLOW_DB_ACQUIRE_TIMEOUT_SECS", "DB_ACQUIRE_TIMEOUT_SECS")?
                .unwrap_or(10)
                .clamp(1, 60),
        );

        let shutdown_grace = env_millis("HTTPFLOW_SHUTDOWN_GRACE_MS", "SHUTDOWN_GRACE_MS")?
            .unwrap_or(Duration::from_secs(15));

        Ok(Self {
            database_url,
            admin_addr,
            migrate_on_startup,
            db_max_connections,
            db_acquire_timeout,
            shutdown_grace,
            engine,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

/// Unset is `None`; set but unparsable is an error rather than a silent default.
fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> anyhow::Result<Option<T>> {
    match env_or_fallback(primary, fallback) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{primary} has an invalid value: {raw:?}")),
        None => Ok(None),
    }
}

fn env_millis(primary: &str, fallback: &str) -> anyhow::Result<Option<Duration>> {
    Ok(env_parse::<u64>(primary, fallback)?.map(Duration::from_millis))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

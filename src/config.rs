use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::info;

use crate::error::ConfigError;
use crate::poller::PollPolicy;

pub struct Config {
    pub port: u16,
    pub database_file: String,
    pub drugs_file: Option<PathBuf>,
    pub webhook_url: String,
    pub webhook_timeout: Duration,
    pub poll: PollPolicy,
    pub search_limit: i64,
    pub session_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    // `source` renvoie la valeur d'une variable, ou `None` si elle est absente.
    pub fn from_source<F>(source: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let poll = PollPolicy::new(
            Duration::from_millis(try_load(&source, "POLL_INTERVAL_MS", "2000")?),
            Duration::from_secs(try_load(&source, "POLL_TIMEOUT_SECS", "300")?),
        )?;

        let search_limit: i64 = try_load(&source, "SEARCH_LIMIT", "10")?;
        if search_limit <= 0 {
            return Err(ConfigError::Invalid {
                key: "SEARCH_LIMIT",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            port: try_load(&source, "PORT", "5000")?,
            database_file: try_load(&source, "DATABASE_FILE", ":memory:")?,
            drugs_file: source("DRUGS_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            webhook_url: try_load(
                &source,
                "WEBHOOK_URL",
                "http://localhost:5678/webhook/drug-interaction",
            )?,
            webhook_timeout: Duration::from_secs(try_load(&source, "WEBHOOK_TIMEOUT_SECS", "30")?),
            poll,
            search_limit,
            session_ttl: Duration::from_secs(try_load(&source, "SESSION_TTL_SECS", "3600")?),
        })
    }
}

fn try_load<T, F>(source: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    source(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
}

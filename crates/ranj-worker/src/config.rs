//! Process configuration read from the environment (after `.env` is loaded).

use anyhow::{bail, Result};
use ranj_db::PoolConfig;

/// Settings the worker needs before it can touch the database.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub pool: PoolConfig,
    /// Run pending migrations on startup (`RUN_MIGRATIONS`, default true).
    pub run_migrations: bool,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::from_lookup(|key| std::env::var(key).ok())?;
        settings.pool = PoolConfig::from_env();
        Ok(settings)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match lookup("DATABASE_URL") {
            Some(url) if !url.trim().is_empty() => url,
            _ => bail!("DATABASE_URL must be set"),
        };
        let run_migrations = lookup("RUN_MIGRATIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            pool: PoolConfig::default(),
            run_migrations,
        })
    }
}

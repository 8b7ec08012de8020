use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;
use r2d2_postgres::{PostgresConnectionManager, TlsMode};
use serde::{Deserialize, Serialize};
use url::Url;

use infra::persistence::DocumentConnectionManager;

use crate::session::FileSessionStore;

const ENV_PREFIX: &str = "TABLESIDE_";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DbConfig {
    pub url: Url,
    #[serde(default = "DbConfig::default_pool_size")]
    pub pool_size: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub dir: PathBuf,
}

/// Settings that may come from the environment instead of the file, eg:
/// `TABLESIDE_DB_URL`.
#[derive(Deserialize, Debug, Default)]
struct Overrides {
    db_url: Option<Url>,
    session_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct EnvLogger {
    level: Option<LogLevel>,
    modules: HashMap<String, LogLevel>,
    timestamp_nanos: bool,
}

impl Config {
    /// Applies any `TABLESIDE_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(std::env::vars())
    }

    fn with_overrides_from<I: IntoIterator<Item = (String, String)>>(
        mut self,
        vars: I,
    ) -> Result<Self> {
        let overrides: Overrides = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("read environment overrides")?;
        if let Some(url) = overrides.db_url {
            debug!("Database url overridden from environment");
            self.db.url = url;
        }
        if let Some(dir) = overrides.session_dir {
            debug!("Session dir overridden from environment: {:?}", dir);
            self.session.dir = dir;
        }
        Ok(self)
    }
}

impl DbConfig {
    fn default_pool_size() -> u32 {
        4
    }

    pub(crate) fn build(&self) -> Result<Pool<DocumentConnectionManager>> {
        debug!(
            "Build pool for {}:{:?}/{} size {}",
            self.url.host_str().unwrap_or_default(),
            self.url.port(),
            self.url.path(),
            self.pool_size
        );

        let manager = PostgresConnectionManager::new(self.url.as_str(), TlsMode::None)
            .context("postgres connection manager")?;
        let builder = r2d2::Pool::builder().max_size(self.pool_size);

        debug!("Pool builder: {:?}", builder);
        let pool = builder
            .build(DocumentConnectionManager::new(manager))
            .context("build pool")?;

        Ok(pool)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            dir: PathBuf::from(".tableside"),
        }
    }
}

impl SessionConfig {
    pub fn store(&self) -> FileSessionStore {
        FileSessionStore::new(&self.dir)
    }
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl EnvLogger {
    pub fn builder(&self) -> env_logger::Builder {
        let mut b = env_logger::Builder::from_default_env();
        if let Some(level) = self.level {
            b.filter_level(level.to_filter());
        }

        for (module, level) in self.modules.iter() {
            b.filter_module(module, level.to_filter());
        }

        if self.timestamp_nanos {
            b.format_timestamp_nanos();
        }

        b
    }
}

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::Error;
use crate::imaging::composite::DEFAULT_MARGIN;
use crate::imaging::qr::DEFAULT_ARTIFACT_SIZE;

/// Value of `DATABASE_URL` that selects the in-process store.
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_name: String,
    pub artifact_size: u32,
    pub overlay_margin: u32,
    pub seed_demo_campaign: bool,
}

impl Config {
    /// Reads the configuration from the environment, after merging in a
    /// `.env` file if one is present.
    pub fn load() -> Result<Config, Error> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("loaded environment from {}", path.display());
        }

        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Config {
            host: try_load(&lookup, "HOST", "127.0.0.1")?,
            port: try_load(&lookup, "PORT", "8080")?,
            database_url: try_load(&lookup, "DATABASE_URL", "mongodb://localhost:27017")?,
            database_name: try_load(&lookup, "DATABASE_NAME", "qrstamp")?,
            artifact_size: try_load(&lookup, "ARTIFACT_SIZE", &DEFAULT_ARTIFACT_SIZE.to_string())?,
            overlay_margin: try_load(&lookup, "OVERLAY_MARGIN", &DEFAULT_MARGIN.to_string())?,
            seed_demo_campaign: try_load(&lookup, "SEED_DEMO_CAMPAIGN", "false")?,
        };

        if config.artifact_size == 0 {
            return Err(Error::InvalidConfiguration {
                key: "ARTIFACT_SIZE",
                reason: "must be positive".to_string(),
            });
        }

        Ok(config)
    }

    pub fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn uses_memory_database(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{} not set, using default: {}", key, default);
        default.to_string()
    });

    value.trim().parse().map_err(|err: T::Err| {
        warn!("invalid {} value: {}", key, err);
        Error::InvalidConfiguration {
            key,
            reason: err.to_string(),
        }
    })
}

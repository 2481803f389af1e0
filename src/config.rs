use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_ALLOWED_CHANNEL: &str = "music";
pub const DEFAULT_VOLUME: u8 = 50;

/// Most queue entries shown by the queue command.
pub const MAX_QUEUE_DISPLAY: usize = 10;

/// Consecutive tracks that may fail to start before the queue is dropped.
pub const MAX_PLAY_RETRIES: u32 = 3;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const ALONE_TIMEOUT: Duration = Duration::from_secs(60);
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub const COMMAND_RATE: u32 = 2;
pub const COMMAND_PER_SECONDS: u64 = 5;
pub const ADMIN_COMMAND_RATE: u32 = 1;
pub const ADMIN_COMMAND_PER_SECONDS: u64 = 10;

/// When the idle sweep runs and what it considers abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    pub sweep_interval: Duration,
    pub alone_timeout: Duration,
    pub inactivity_timeout: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        IdlePolicy {
            sweep_interval: SWEEP_INTERVAL,
            alone_timeout: ALONE_TIMEOUT,
            inactivity_timeout: INACTIVITY_TIMEOUT,
        }
    }
}

/// `max_calls` admissions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub max_calls: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub regular: RateQuota,
    pub privileged: RateQuota,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy {
            regular: RateQuota {
                max_calls: COMMAND_RATE,
                window: Duration::from_secs(COMMAND_PER_SECONDS),
            },
            privileged: RateQuota {
                max_calls: ADMIN_COMMAND_RATE,
                window: Duration::from_secs(ADMIN_COMMAND_PER_SECONDS),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub prefix: String,
    pub allowed_channel: String,
    pub idle: IdlePolicy,
    pub rate_limits: RateLimitPolicy,
}

impl Config {
    /// Reads the process environment, after merging in a `.env` file if present.
    pub fn from_env() -> Result<Config, ConfigError> {
        if dotenv().is_err() {
            info!(".env file not found, using the process environment");
        }

        let token = env::var("DISCORD_TOKEN").map_err(|_| ConfigError::Missing("DISCORD_TOKEN"))?;
        let prefix = env::var("COMMAND_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string());
        let allowed_channel = env::var("MUSIC_CHANNEL").unwrap_or_else(|_| DEFAULT_ALLOWED_CHANNEL.to_string());

        let idle = IdlePolicy {
            sweep_interval: Duration::from_secs(var_or("SWEEP_INTERVAL_SECS", SWEEP_INTERVAL.as_secs())?),
            alone_timeout: Duration::from_secs(var_or("ALONE_TIMEOUT_SECS", ALONE_TIMEOUT.as_secs())?),
            inactivity_timeout: Duration::from_secs(var_or(
                "INACTIVITY_TIMEOUT_SECS",
                INACTIVITY_TIMEOUT.as_secs(),
            )?),
        };

        let rate_limits = RateLimitPolicy {
            regular: RateQuota {
                max_calls: var_or("COMMAND_RATE", COMMAND_RATE)?,
                window: Duration::from_secs(var_or("COMMAND_PER_SECONDS", COMMAND_PER_SECONDS)?),
            },
            privileged: RateQuota {
                max_calls: var_or("ADMIN_COMMAND_RATE", ADMIN_COMMAND_RATE)?,
                window: Duration::from_secs(var_or("ADMIN_COMMAND_PER_SECONDS", ADMIN_COMMAND_PER_SECONDS)?),
            },
        };

        Ok(Config {
            token,
            prefix,
            allowed_channel,
            idle,
            rate_limits,
        })
    }
}

fn var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

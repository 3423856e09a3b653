use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::mllp::DEFAULT_MAX_PAYLOAD_BYTES;

/// Transport settings for the MLLP client and the pager
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `host:port` of the MLLP source
    pub mllp_address: String,
    /// `host:port` (or base URL) of the pager service
    pub pager_address: String,
    pub rust_log: String,
    pub read_buffer_size: usize,
    pub max_frame_bytes: usize,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub reconnect_max_retries: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mllp_address = lookup("MLLP_ADDRESS").unwrap_or_else(|| "localhost:8440".to_string());
        validate_address("MLLP_ADDRESS", &mllp_address)?;

        let pager_address =
            lookup("PAGER_ADDRESS").unwrap_or_else(|| "localhost:8441".to_string());
        if !pager_address.starts_with("http://") && !pager_address.starts_with("https://") {
            validate_address("PAGER_ADDRESS", &pager_address)?;
        }

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let read_buffer_size = parse_number(&lookup, "READ_BUFFER_SIZE", 1024usize)?;
        let max_frame_bytes = parse_number(&lookup, "MAX_FRAME_BYTES", DEFAULT_MAX_PAYLOAD_BYTES)?;
        if read_buffer_size == 0 || max_frame_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "READ_BUFFER_SIZE and MAX_FRAME_BYTES must be positive".to_string(),
            ));
        }

        let reconnect_initial = parse_number(&lookup, "RECONNECT_INITIAL_SECS", 1u64)?;
        let reconnect_max = parse_number(&lookup, "RECONNECT_MAX_SECS", 30u64)?;
        if reconnect_initial > reconnect_max {
            return Err(ConfigError::InvalidValue(format!(
                "RECONNECT_INITIAL_SECS ({}) exceeds RECONNECT_MAX_SECS ({})",
                reconnect_initial, reconnect_max
            )));
        }

        let reconnect_max_retries = parse_number(&lookup, "RECONNECT_MAX_RETRIES", 10u32)?;

        Ok(Self {
            mllp_address,
            pager_address,
            rust_log,
            read_buffer_size,
            max_frame_bytes,
            reconnect_initial: Duration::from_secs(reconnect_initial),
            reconnect_max: Duration::from_secs(reconnect_max),
            reconnect_max_retries,
        })
    }
}

fn validate_address(key: &str, address: &str) -> Result<(), ConfigError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be host:port, got '{}'",
            key, address
        ))),
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}

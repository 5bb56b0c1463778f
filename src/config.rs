use crate::error::{ThrottlerError, ThrottlerResult};
use crate::key_resolver::HeaderResolver;
use crate::limit::{RangeOverrides, Threshold, UNLIMITED};
use crate::options::ThrottleOptions;
use crate::store::{MemoryStore, DEFAULT_CLEANUP_INTERVAL, DEFAULT_TTL};
use crate::subnet::Subnet;
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Service configuration, read from a JSON file.
///
/// ```json
/// {
///   "bind_addr": "0.0.0.0:3000",
///   "threshold": 100,
///   "ttl": "1m",
///   "range_overrides": { "10.0.0.0/8": -1, "192.168.1.0/24": 10 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Server bind address
    pub bind_addr: SocketAddr,

    /// Requests allowed per window, -1 for unlimited
    #[validate(range(min = -1))]
    pub threshold: i64,

    /// Forward throttling events to the logger
    pub verbose: bool,

    /// Body of 429 responses
    #[validate(length(min = 1))]
    pub limit_reached_message: Option<String>,

    /// Counter window length
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_non_zero"))]
    pub ttl: Duration,

    /// How often expired counters are purged
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_non_zero"))]
    pub cleanup_interval: Duration,

    /// Take the client address from this header instead of the peer address
    #[validate(custom(function = "validate_header_name"))]
    pub trust_header: Option<String>,

    /// Per-subnet thresholds, keyed by CIDR
    #[validate(custom(function = "validate_range_overrides"))]
    pub range_overrides: BTreeMap<String, i64>,

    /// Log level for the `throttler` target
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            threshold: UNLIMITED,
            verbose: true,
            limit_reached_message: None,
            ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            trust_header: None,
            range_overrides: BTreeMap::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> ThrottlerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ThrottlerResult<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build middleware options; starts the store's sweeper, so call it from
    /// within a Tokio runtime.
    pub fn into_options(self) -> ThrottlerResult<ThrottleOptions> {
        let mut options = ThrottleOptions::new(Threshold::try_from(self.threshold)?)
            .with_verbose(self.verbose)
            .with_store(Arc::new(MemoryStore::new(self.ttl, self.cleanup_interval)));

        if let Some(message) = self.limit_reached_message {
            options = options.with_limit_reached_message(message);
        }

        if let Some(header) = self.trust_header {
            let header = HeaderName::try_from(header.as_str())
                .map_err(|_| ThrottlerError::Configuration(format!("invalid header name '{}'", header)))?;
            options = options.with_key_resolver(HeaderResolver::new(header));
        }

        if !self.range_overrides.is_empty() {
            let overrides = RangeOverrides::parse(
                self.range_overrides
                    .iter()
                    .map(|(cidr, threshold)| (cidr.as_str(), *threshold)),
            )?;
            options = options.with_range_overrides(overrides);
        }

        Ok(options)
    }
}

fn validate_non_zero(duration: &Duration) -> Result<(), ValidationError> {
    if duration.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<(), ValidationError> {
    HeaderName::try_from(name)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_header_name"))
}

fn validate_range_overrides(overrides: &BTreeMap<String, i64>) -> Result<(), ValidationError> {
    for (cidr, threshold) in overrides {
        if cidr.parse::<Subnet>().is_err() {
            return Err(ValidationError::new("invalid_subnet"));
        }
        if Threshold::try_from(*threshold).is_err() {
            return Err(ValidationError::new("invalid_threshold"));
        }
    }
    Ok(())
}

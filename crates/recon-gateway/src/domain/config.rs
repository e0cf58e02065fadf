//! Gateway configuration with validation.
//!
//! Every section is `#[serde(default)]`, so a partial TOML/JSON document only
//! has to name the values it changes.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener configuration
    pub http: HttpConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Allow-list and replay configuration
    pub security: SecurityConfig,
    /// Command bridge configuration
    pub execution: ExecutionConfig,
    /// Persistence locations for the reference adapters
    pub storage: StorageConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "requests_per_minute cannot be 0".into(),
            ));
        }

        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_body_bytes cannot be 0".into(),
            ));
        }

        if self.security.replay_window.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "replay_window cannot be 0".into(),
            ));
        }

        if self.execution.deadline.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "execution deadline cannot be 0".into(),
            ));
        }

        if self.execution.grace_period >= self.execution.deadline {
            return Err(ConfigError::InvalidTimeout(format!(
                "grace_period ({:?}) must be shorter than the deadline ({:?})",
                self.execution.grace_period, self.execution.deadline
            )));
        }

        for interval in [
            self.rate_limit.sweep_interval,
            self.security.sweep_interval,
            self.storage.queue_sweep_interval,
        ] {
            if interval.is_zero() {
                return Err(ConfigError::InvalidTimeout(
                    "sweep intervals cannot be 0".into(),
                ));
            }
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 4161)
    pub port: u16,
    /// Largest request body read before the JSON parse
    pub max_body_bytes: usize,
    /// Peers whose `X-Forwarded-For` header is honored
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4161,
            max_body_bytes: 64 * 1024,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Sliding-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Accepted requests per client address per 60s window
    pub requests_per_minute: u32,
    /// How often empty windows are evicted
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Allow-list and replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Addresses allowed to call the gateway at all (empty = everyone)
    pub global_ip_allowlist: Vec<String>,
    /// How long a used nonce is remembered.
    ///
    /// A timestamp stays acceptable for up to twice `timestamp_tolerance`
    /// after the nonce was first seen (a future-dated request). A window
    /// shorter than that forgets the nonce while a captured request could
    /// still pass the timestamp check; see [`SecurityConfig::replay_exposure`].
    #[serde(with = "humantime_serde")]
    pub replay_window: Duration,
    /// Accepted distance between the client timestamp and the server clock
    #[serde(with = "humantime_serde")]
    pub timestamp_tolerance: Duration,
    /// How often expired nonces are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl SecurityConfig {
    /// How long a replayed request could outlive its remembered nonce, if at
    /// all: `2 * timestamp_tolerance - replay_window`.
    pub fn replay_exposure(&self) -> Option<Duration> {
        self.timestamp_tolerance
            .saturating_mul(2)
            .checked_sub(self.replay_window)
            .filter(|gap| !gap.is_zero())
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            global_ip_allowlist: Vec::new(),
            replay_window: Duration::from_secs(60),
            timestamp_tolerance: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Command bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Overall bound on one invocation, trailing output included
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
    /// Extra wait after dispatch returns, for asynchronous output
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Delay between an actor arriving and its queue being replayed
    #[serde(with = "humantime_serde")]
    pub join_delivery_delay: Duration,
    /// Honor `queue: true` for every credential, not only flagged ones
    pub allow_queue_for_all_users: bool,
    /// Queued commands older than this are dropped undelivered
    #[serde(with = "humantime_serde")]
    pub queue_expiry: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            grace_period: Duration::from_millis(150),
            join_delivery_delay: Duration::from_secs(1),
            allow_queue_for_all_users: false,
            queue_expiry: Duration::from_secs(72 * 3600),
        }
    }
}

/// Persistence locations for the reference adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON document holding the credential list
    pub users_path: PathBuf,
    /// JSON document holding the offline queues
    pub queue_path: PathBuf,
    /// How often expired queue entries are purged
    #[serde(with = "humantime_serde")]
    pub queue_sweep_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            users_path: PathBuf::from("users.json"),
            queue_path: PathBuf::from("queues.json"),
            queue_sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn format_duration(duration: Duration) -> String {
        if duration.subsec_nanos() != 0 {
            format!("{}ms", duration.as_millis())
        } else if duration.as_secs() != 0 && duration.as_secs() % 3600 == 0 {
            format!("{}h", duration.as_secs() / 3600)
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be tried before 's' and 'm'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.trim().parse::<u64>().map_err(|_| "invalid minutes")?;
            scaled(mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            let hours = hours.trim().parse::<u64>().map_err(|_| "invalid hours")?;
            scaled(hours, 3600)
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }

    fn scaled(count: u64, unit_secs: u64) -> Result<Duration, &'static str> {
        count
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or("duration overflow")
    }
}

//! Configuration management for the veilnet router
//!
//! A [`RouterConfig`] is loaded from a TOML file, from `VEILNET_*`
//! environment variables on top of the defaults, or built in code. Every
//! constructor path ends in [`RouterConfig::validate`].

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Identity and advertised contact
    pub router: RouterSection,

    /// Link session policy
    pub link: LinkConfig,

    /// Path building and transit policy
    pub path: PathConfig,

    /// Peer discovery (DHT client)
    pub discovery: DiscoveryConfig,

    /// Peer scoring
    pub profiling: ProfilingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Identity and advertised contact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Addresses advertised in our router contact (host:port)
    pub public_addresses: Vec<String>,

    /// JSON keyfile holding the identity and encryption seeds.
    /// Without one, a fresh ephemeral identity is generated.
    pub keyfile: Option<PathBuf>,

    /// How long a router contact stays acceptable after it was signed
    #[serde(with = "humantime_serde")]
    pub contact_lifetime: Duration,

    /// Tolerated clock skew for timestamps from the future
    #[serde(with = "humantime_serde")]
    pub max_clock_skew: Duration,

    /// Event loop housekeeping interval
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
}

/// Link session policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Time a session may stay in Connecting before it is failed
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Idle time after which an unpinned session is closed
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Maximum sessions in Connecting at once
    pub max_pending_sessions: usize,

    /// Frames buffered per peer while no session is live
    pub max_queued_per_peer: usize,

    /// How long a buffered frame waits for a session
    #[serde(with = "humantime_serde")]
    pub queue_timeout: Duration,
}

/// Path building and transit policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Hops per path built by this router
    pub hop_count: usize,

    /// Fixed lifetime of every path
    #[serde(with = "humantime_serde")]
    pub path_lifetime: Duration,

    /// Time to wait for one hop to answer a build or extend
    #[serde(with = "humantime_serde")]
    pub hop_timeout: Duration,

    /// Overall deadline for a whole build
    #[serde(with = "humantime_serde")]
    pub build_deadline: Duration,

    /// Builds in flight at once; excess builds fail immediately
    pub max_concurrent_builds: usize,

    /// Accepted age of a build request timestamp
    #[serde(with = "humantime_serde")]
    pub freshness_window: Duration,

    /// Build ephemerals remembered for replay rejection
    pub replay_cache_size: usize,

    /// Transit hops this router carries at once
    pub max_transit_hops: usize,

    /// Connected routers required before builds are attempted
    pub min_connected_for_build: usize,
}

/// Peer discovery (DHT client)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Time to wait for a single lookup reply
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,

    /// Attempts per lookup, each against a different peer
    pub lookup_max_attempts: u32,

    /// Backoff base between attempts
    #[serde(with = "humantime_serde")]
    pub lookup_backoff_base: Duration,

    /// Backoff cap
    #[serde(with = "humantime_serde")]
    pub lookup_backoff_max: Duration,

    /// Interval between explore requests
    #[serde(with = "humantime_serde")]
    pub explore_interval: Duration,

    /// Below this many connected routers, explore runs at twice the rate
    pub min_connected_routers: usize,

    /// Contacts returned when serving a lookup we cannot answer exactly
    pub dht_reply_count: usize,

    /// Cap on stored contacts
    pub max_contacts: usize,

    /// Directory for persisted contacts (disabled when unset)
    pub contacts_dir: Option<PathBuf>,

    /// Interval between contact persistence runs
    #[serde(with = "humantime_serde")]
    pub persist_interval: Duration,
}

/// Peer scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Connect timeouts (net of successes) that mark a peer bad for dialing
    pub connect_failure_threshold: u64,

    /// Path failures (net of successes) that mark a peer bad for paths
    pub path_failure_threshold: u64,

    /// Profiles untouched for this long are forgotten
    #[serde(with = "humantime_serde")]
    pub profile_decay: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            public_addresses: vec!["127.0.0.1:1090".to_string()],
            keyfile: None,
            contact_lifetime: Duration::from_secs(6 * 3600),
            max_clock_skew: Duration::from_secs(60),
            tick_interval: Duration::from_millis(500),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            max_pending_sessions: 32,
            max_queued_per_peer: 64,
            queue_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            hop_count: 3,
            path_lifetime: Duration::from_secs(600),
            hop_timeout: Duration::from_secs(5),
            build_deadline: Duration::from_secs(20),
            max_concurrent_builds: 8,
            freshness_window: Duration::from_secs(30),
            replay_cache_size: 4096,
            max_transit_hops: 10_000,
            min_connected_for_build: 1,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(5),
            lookup_max_attempts: 3,
            lookup_backoff_base: Duration::from_millis(250),
            lookup_backoff_max: Duration::from_secs(4),
            explore_interval: Duration::from_secs(30),
            min_connected_routers: 4,
            dht_reply_count: 4,
            max_contacts: 5_000,
            contacts_dir: None,
            persist_interval: Duration::from_secs(300),
        }
    }
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            connect_failure_threshold: 3,
            path_failure_threshold: 5,
            profile_decay: Duration::from_secs(3600),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn env_parse<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e)),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

impl RouterConfig {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `VEILNET_<SECTION>_<KEY>`; durations are
    /// given in milliseconds with an `_MS` suffix.
    /// Example: `VEILNET_LINK_CONNECT_TIMEOUT_MS=2500`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `VEILNET_*` variables onto this configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Router
        if let Ok(addrs) = env::var("VEILNET_ROUTER_PUBLIC_ADDRESSES") {
            self.router.public_addresses = addrs
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(keyfile) = env::var("VEILNET_ROUTER_KEYFILE") {
            self.router.keyfile = Some(PathBuf::from(keyfile));
        }
        if let Some(v) = env_millis("VEILNET_ROUTER_CONTACT_LIFETIME_MS")? {
            self.router.contact_lifetime = v;
        }

        // Link
        if let Some(v) = env_millis("VEILNET_LINK_CONNECT_TIMEOUT_MS")? {
            self.link.connect_timeout = v;
        }
        if let Some(v) = env_millis("VEILNET_LINK_IDLE_TIMEOUT_MS")? {
            self.link.idle_timeout = v;
        }
        if let Some(v) = env_parse("VEILNET_LINK_MAX_PENDING_SESSIONS")? {
            self.link.max_pending_sessions = v;
        }

        // Path
        if let Some(v) = env_parse("VEILNET_PATH_HOP_COUNT")? {
            self.path.hop_count = v;
        }
        if let Some(v) = env_parse("VEILNET_PATH_MAX_CONCURRENT_BUILDS")? {
            self.path.max_concurrent_builds = v;
        }
        if let Some(v) = env_millis("VEILNET_PATH_LIFETIME_MS")? {
            self.path.path_lifetime = v;
        }

        // Discovery
        if let Some(v) = env_millis("VEILNET_DISCOVERY_EXPLORE_INTERVAL_MS")? {
            self.discovery.explore_interval = v;
        }
        if let Ok(dir) = env::var("VEILNET_DISCOVERY_CONTACTS_DIR") {
            self.discovery.contacts_dir = Some(PathBuf::from(dir));
        }

        // Logging
        if let Ok(level) = env::var("VEILNET_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(v) = env_parse("VEILNET_LOG_JSON")? {
            self.logging.json_format = v;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn require(ok: bool, msg: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::ValidationFailed(msg.to_string()))
            }
        }

        for addr in &self.router.public_addresses {
            require(
                addr.rsplit_once(':').is_some_and(|(host, port)| {
                    !host.is_empty() && port.parse::<u16>().is_ok()
                }),
                "public addresses must be host:port",
            )?;
        }
        require(
            !self.router.contact_lifetime.is_zero(),
            "contact_lifetime must be greater than 0",
        )?;
        require(
            !self.router.tick_interval.is_zero(),
            "tick_interval must be greater than 0",
        )?;

        require(
            !self.link.connect_timeout.is_zero(),
            "connect_timeout must be greater than 0",
        )?;
        require(
            self.link.max_pending_sessions > 0,
            "max_pending_sessions must be greater than 0",
        )?;
        require(
            self.link.max_queued_per_peer > 0,
            "max_queued_per_peer must be greater than 0",
        )?;

        require(
            (1..=crate::core_path::MAX_HOPS).contains(&self.path.hop_count),
            "hop_count out of range",
        )?;
        require(
            self.path.max_concurrent_builds > 0,
            "max_concurrent_builds must be greater than 0",
        )?;
        require(
            self.path.hop_timeout <= self.path.build_deadline,
            "hop_timeout must not exceed build_deadline",
        )?;
        require(
            !self.path.path_lifetime.is_zero(),
            "path_lifetime must be greater than 0",
        )?;
        require(
            self.path.replay_cache_size > 0,
            "replay_cache_size must be greater than 0",
        )?;

        require(
            self.discovery.lookup_max_attempts > 0,
            "lookup_max_attempts must be greater than 0",
        )?;
        require(
            self.discovery.dht_reply_count > 0,
            "dht_reply_count must be greater than 0",
        )?;

        require(
            crate::logging::LogLevel::parse(&self.logging.level).is_some(),
            &format!("Invalid log level: {}", self.logging.level),
        )?;

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RouterConfig::default();
        config.path.max_concurrent_builds = 0;
        assert!(config.validate().is_err());

        config = RouterConfig::default();
        config.path.hop_count = 0;
        assert!(config.validate().is_err());

        config = RouterConfig::default();
        config.router.public_addresses = vec!["no-port".to_string()];
        assert!(config.validate().is_err());

        config = RouterConfig::default();
        config.path.hop_timeout = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = RouterConfig::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.toml");
        std::fs::write(
            &path,
            "[link]\nconnect_timeout = \"3s\"\n\n[path]\nhop_count = 2\n",
        )
        .unwrap();

        let config = RouterConfig::from_file(&path).unwrap();
        assert_eq!(config.link.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.path.hop_count, 2);
        assert_eq!(config.link.max_pending_sessions, 32);

        let out = dir.path().join("saved.toml");
        config.save_to_file(&out).unwrap();
        let again = RouterConfig::from_file(&out).unwrap();
        assert_eq!(again.path.hop_count, 2);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[path\nhop_count = ").unwrap();
        assert!(matches!(
            RouterConfig::from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }
}

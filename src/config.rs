//! JSON configuration for the relay.
//!
//! ```json
//! {
//!   "statsd": {
//!     "bind": "127.0.0.1:8125",
//!     "validate": true,
//!     "shard_map": ["10.0.0.1:8125", "10.0.0.2:8125"],
//!     "duplicate_to": [{ "prefix": "dup.", "shard_map": ["10.0.1.1:8125"] }],
//!     "sampling": [{
//!       "sampling_threshold": 10, "sampling_window": 10,
//!       "shard_map": ["10.0.2.1:8125"]
//!     }]
//!   }
//! }
//! ```

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Location used when no config path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/statsrelay.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON")]
    Json(#[from] serde_json::Error),
    #[error("invalid ring entry {0:?}, expected host:port")]
    InvalidRingEntry(String),
    #[error("invalid ingress regex")]
    InvalidRegex(#[from] regex::Error),
    #[error("{0}")]
    Invalid(String),
}

fn default_bind() -> String {
    "127.0.0.1:8125".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_threshold() -> f64 {
    1.0
}

fn default_max_send_queue() -> u64 {
    134_217_728
}

fn default_reservoir_size() -> u32 {
    100
}

/// Top-level configuration. A missing `statsd` section leaves the statsd
/// listener unconfigured.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub statsd: Option<ProtoConfig>,
}

/// Listener and routing settings for one protocol.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProtoConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub send_health_metrics: bool,
    #[serde(default = "default_true", alias = "validate")]
    pub enable_validation: bool,
    #[serde(default = "default_true", alias = "tcp_cork")]
    pub enable_tcp_cork: bool,
    /// Drop backend connections and reconnect when the send buffer fills.
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Fraction of `max_send_queue` at which a reconnect is initiated.
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: f64,
    #[serde(default = "default_max_send_queue")]
    pub max_send_queue: u64,
    /// Backends to forward to, consistently hashed.
    #[serde(default, alias = "ring")]
    pub shard_map: Vec<String>,
    #[serde(default, alias = "dupl")]
    pub duplicate_to: Vec<AdditionalConfig>,
    #[serde(default, alias = "sstats")]
    pub sampling: Vec<AdditionalConfig>,
}

impl Default for ProtoConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            send_health_metrics: false,
            enable_validation: true,
            enable_tcp_cork: true,
            auto_reconnect: false,
            reconnect_threshold: default_reconnect_threshold(),
            max_send_queue: default_max_send_queue(),
            shard_map: Vec::new(),
            duplicate_to: Vec::new(),
            sampling: Vec::new(),
        }
    }
}

/// A duplicate or sampling block. Thresholds and limits of 0 disable the
/// corresponding behavior.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AdditionalConfig {
    /// Raw string prepended to every key; no dot is added.
    pub prefix: Option<String>,
    /// Raw string appended to every key.
    pub suffix: Option<String>,
    /// Only keys matching this regex pass.
    pub ingress_filter: Option<String>,
    /// Keys matching this regex are dropped.
    pub ingress_blacklist: Option<String>,

    /// Start sampling counters seen more than this many times per window.
    pub sampling_threshold: u32,
    /// Counter sampling window in seconds.
    pub sampling_window: u32,

    /// Unique keys tracked per class before new keys are flagged.
    pub max_counters: u32,
    pub max_timers: u32,
    pub max_gauges: u32,

    pub timer_sampling_threshold: u32,
    pub timer_sampling_window: u32,
    /// Flush the true min/max of sampled timers every window.
    pub timer_flush_min_max: bool,
    /// Samples kept per sampled timer.
    pub reservoir_size: u32,

    pub gauge_sampling_threshold: u32,
    pub gauge_sampling_window: u32,

    /// How often tracked keys are checked for expiry, in seconds.
    pub hm_key_expiration_frequency_in_seconds: u32,
    /// Tracked keys unseen for this long are dropped, in seconds.
    pub hm_key_ttl_in_seconds: u32,

    #[serde(alias = "ring")]
    pub shard_map: Vec<String>,
}

impl Default for AdditionalConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            suffix: None,
            ingress_filter: None,
            ingress_blacklist: None,
            sampling_threshold: 0,
            sampling_window: 0,
            max_counters: 0,
            max_timers: 0,
            max_gauges: 0,
            timer_sampling_threshold: 0,
            timer_sampling_window: 0,
            timer_flush_min_max: false,
            reservoir_size: default_reservoir_size(),
            gauge_sampling_threshold: 0,
            gauge_sampling_window: 0,
            hm_key_expiration_frequency_in_seconds: 0,
            hm_key_ttl_in_seconds: 0,
            shard_map: Vec::new(),
        }
    }
}

/// Splits `host:port`, requiring a non-empty host and a numeric port.
pub fn parse_host_port(entry: &str) -> Result<(&str, u16), ConfigError> {
    let invalid = || ConfigError::InvalidRingEntry(entry.to_owned());
    let (host, port) = entry.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host, port))
}

fn check_window(name: &str, threshold: u32, window: u32) -> Result<(), ConfigError> {
    if threshold > 0 && window == 0 {
        return Err(ConfigError::Invalid(format!(
            "{name} threshold {threshold} requires a positive window"
        )));
    }
    Ok(())
}

impl AdditionalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_map.is_empty() {
            return Err(ConfigError::Invalid(
                "duplicate/sampling block has an empty shard_map".to_owned(),
            ));
        }
        for entry in &self.shard_map {
            parse_host_port(entry)?;
        }
        check_window("sampling", self.sampling_threshold, self.sampling_window)?;
        check_window(
            "timer sampling",
            self.timer_sampling_threshold,
            self.timer_sampling_window,
        )?;
        check_window(
            "gauge sampling",
            self.gauge_sampling_threshold,
            self.gauge_sampling_window,
        )?;
        if self.hm_key_ttl_in_seconds > 0 && self.hm_key_expiration_frequency_in_seconds == 0 {
            return Err(ConfigError::Invalid(
                "hm_key_ttl_in_seconds requires hm_key_expiration_frequency_in_seconds".to_owned(),
            ));
        }
        IngressFilter::from_config(self)?;
        Ok(())
    }
}

impl ProtoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_host_port(&self.bind)?;
        for entry in &self.shard_map {
            parse_host_port(entry)?;
        }
        if !(self.reconnect_threshold > 0.0 && self.reconnect_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "reconnect_threshold {} must be in (0, 1]",
                self.reconnect_threshold
            )));
        }
        for block in self.duplicate_to.iter().chain(&self.sampling) {
            block.validate()?;
        }
        Ok(())
    }
}

impl Config {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("loading config from {path:?}");
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.statsd {
            Some(statsd) => statsd.validate(),
            None => Ok(()),
        }
    }
}

/// Compiled ingress rules and key decoration of one duplicate/sampling block.
#[derive(Clone, Debug)]
pub struct IngressFilter {
    allow: Option<Regex>,
    deny: Option<Regex>,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl IngressFilter {
    pub fn from_config(config: &AdditionalConfig) -> Result<Self, ConfigError> {
        let compile = |pattern: &Option<String>| -> Result<Option<Regex>, ConfigError> {
            Ok(match pattern {
                Some(p) => Some(Regex::new(p)?),
                None => None,
            })
        };
        Ok(Self {
            allow: compile(&config.ingress_filter)?,
            deny: compile(&config.ingress_blacklist)?,
            prefix: config.prefix.clone().unwrap_or_default().into_bytes(),
            suffix: config.suffix.clone().unwrap_or_default().into_bytes(),
        })
    }

    /// Whether `key` passes the filter and is not blacklisted.
    pub fn allows(&self, key: &[u8]) -> bool {
        self.allow.as_ref().map_or(true, |re| re.is_match(key))
            && !self.deny.as_ref().map_or(false, |re| re.is_match(key))
    }

    /// `prefix + key + suffix`.
    pub fn decorate(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len() + self.suffix.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(key);
        out.extend_from_slice(&self.suffix);
        out
    }
}

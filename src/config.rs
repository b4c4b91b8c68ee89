//! Configuration loading and types.
//!
//! Configuration is read once from a YAML file at startup and deserialized
//! into [`Config`].  Components receive the section they need through their
//! constructors; nothing reads configuration from global state.

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::arn::Arn;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Request-signing and user settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Embedded key-value store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Notification sink selection.
    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Region reported in events and `x-amz-bucket-region`. SigV4 scopes
    /// carry their own region and are not checked against it.
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// A user as written in the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserConfig {
    /// Only read for the root user; regular users are keyed by access key.
    #[serde(default, alias = "accessKey")]
    pub access_key: String,

    #[serde(default, alias = "secretKey")]
    pub secret_key: String,

    /// Resource identifier of the user.
    #[serde(default)]
    pub arn: Arn,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Treat requests without an Authorization header as anonymous instead
    /// of denying them.
    #[serde(default, alias = "anonymousAccess")]
    pub anonymous_access: bool,

    /// Reject legacy `AWS access:signature` requests.
    #[serde(default, alias = "disableV2")]
    pub disable_v2: bool,

    /// Reject `AWS4-HMAC-SHA256` requests.
    #[serde(default, alias = "disableV4")]
    pub disable_v4: bool,

    /// Log canonical requests and computed signatures at debug level.
    #[serde(default)]
    pub debug: bool,

    /// The root user; overrides any regular user with the same access key.
    #[serde(default = "default_root_user", alias = "rootUser")]
    pub root_user: UserConfig,

    /// Regular users, keyed by access key.
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_access: false,
            disable_v2: false,
            disable_v4: false,
            debug: false,
            root_user: default_root_user(),
            users: BTreeMap::new(),
        }
    }
}

/// How the ETag of an object assembled from a multipart upload is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultipartEtag {
    /// Hex MD5 of the concatenated content, same as a single PUT.
    #[default]
    Plain,
    /// Hex MD5 of the concatenated binary part digests, suffixed `-N`.
    Composite,
}

/// Embedded key-value store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path of the database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Maximum size of one stored part of a directly uploaded object.
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    #[serde(default)]
    pub multipart_etag: MultipartEtag,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            part_size: default_part_size(),
            multipart_etag: MultipartEtag::default(),
        }
    }
}

/// Which notification sink receives object events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Log,
    /// Queue events for a background publisher.
    Queue,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub sink: SinkKind,

    /// Events held for the publisher before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_root_user() -> UserConfig {
    UserConfig {
        access_key: "objectstore".to_string(),
        secret_key: "objectstore-secret".to_string(),
        arn: Arn::default(),
    }
}

fn default_db_path() -> String {
    "./data/objectstore.redb".to_string()
}

fn default_part_size() -> usize {
    4 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let mut config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    config.normalize()?;
    Ok(config)
}

impl Config {
    /// Fill derived fields and reject values no component can work with.
    pub fn normalize(&mut self) -> anyhow::Result<()> {
        for (access_key, user) in self.auth.users.iter_mut() {
            user.access_key = access_key.clone();
        }
        if self.storage.part_size == 0 {
            anyhow::bail!("storage.part_size must be greater than zero");
        }
        Ok(())
    }
}

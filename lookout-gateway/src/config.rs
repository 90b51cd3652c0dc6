//! Gateway configuration: a YAML file with environment overrides on top.

mod duration;

pub use duration::{deserialize_duration, format_duration, parse_duration, serialize_duration};

use std::path::{Path, PathBuf};
use std::time::Duration;

use lookout_protocol::protocol::DEFAULT_LOG_SERVER_PORT;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::registry::UpsertPolicy;

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const ENV_WORKER_DOMAIN: &str = "LOOKOUT_WORKER_DOMAIN";
pub const ENV_LOG_SERVER_PORT: &str = "LOOKOUT_LOG_SERVER_PORT";
pub const ENV_LOG_ROOT: &str = "LOOKOUT_LOG_ROOT";
pub const ENV_ADMIN_URL: &str = "LOOKOUT_ADMIN_URL";
pub const ENV_ADMIN_TOKEN: &str = "LOOKOUT_ADMIN_TOKEN";
pub const ENV_METADATA_ADDR: &str = "LOOKOUT_METADATA_ADDR";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address the gateway listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Suffix appended to a bare worker id to form its host name
    #[serde(default)]
    pub worker_domain: String,

    /// Port of the log agent on every worker
    #[serde(default = "default_log_server_port")]
    pub log_server_port: u16,

    /// Directory all function logs live under on the workers
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,

    #[serde(
        default = "default_dial_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub dial_timeout: Duration,

    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub request_timeout: Duration,

    /// How long a cached worker id is trusted before the admin endpoint
    /// is asked again
    #[serde(
        default = "default_staleness_window",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub staleness_window: Duration,

    /// Base URL of the authoritative function status endpoint
    #[serde(default)]
    pub admin_url: Option<String>,

    #[serde(default, skip_serializing)]
    pub admin_token: Option<String>,

    /// Deadline for one status query
    #[serde(
        default = "default_admin_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub admin_timeout: Duration,

    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    /// `host:port` of the metadata event relay; no subscriber runs if unset
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub upsert_policy: UpsertPolicy,

    #[serde(
        default = "default_dial_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub connect_timeout: Duration,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Delay between subscriber restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    #[serde(
        default = "default_backoff_initial",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub initial: Duration,

    #[serde(
        default = "default_backoff_max",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max: Duration,
}

fn default_listen() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_log_server_port() -> u16 {
    DEFAULT_LOG_SERVER_PORT
}

fn default_log_root() -> PathBuf {
    PathBuf::from("/var/log/functions")
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_staleness_window() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_admin_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_initial() -> Duration {
    Duration::from_millis(100)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(30)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            worker_domain: String::new(),
            log_server_port: default_log_server_port(),
            log_root: default_log_root(),
            dial_timeout: default_dial_timeout(),
            request_timeout: default_request_timeout(),
            staleness_window: default_staleness_window(),
            admin_url: None,
            admin_token: None,
            admin_timeout: default_admin_timeout(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            address: None,
            upsert_policy: UpsertPolicy::default(),
            connect_timeout: default_dial_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: default_backoff_initial(),
            max: default_backoff_max(),
        }
    }
}

impl GatewayConfig {
    /// Load the YAML file (if any), apply process environment overrides
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        Self::from_yaml(path, &contents)
    }

    /// Parse YAML text; `path` is only used for error messages
    pub fn from_yaml(path: &Path, contents: &str) -> Result<Self> {
        // An empty file means "all defaults"
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let de = serde_yaml::Deserializer::from_str(contents);
        serde_path_to_error::deserialize(de).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Override fields from environment variables looked up via `lookup`.
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(domain) = get(ENV_WORKER_DOMAIN) {
            self.worker_domain = domain;
        }
        if let Some(port) = get(ENV_LOG_SERVER_PORT) {
            self.log_server_port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_LOG_SERVER_PORT.to_string(),
                message: format!("'{}' is not a port number", port),
            })?;
        }
        if let Some(root) = get(ENV_LOG_ROOT) {
            self.log_root = PathBuf::from(root);
        }
        if let Some(url) = get(ENV_ADMIN_URL) {
            self.admin_url = Some(url);
        }
        if let Some(token) = get(ENV_ADMIN_TOKEN) {
            self.admin_token = Some(token);
        }
        if let Some(address) = get(ENV_METADATA_ADDR) {
            self.metadata.address = Some(address);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::Invalid {
                key: key.to_string(),
                message: message.to_string(),
            })
        };

        if self.log_server_port == 0 {
            return invalid("log_server_port", "must not be 0");
        }
        if self.dial_timeout.is_zero() {
            return invalid("dial_timeout", "must be greater than 0");
        }
        if self.request_timeout.is_zero() {
            return invalid("request_timeout", "must be greater than 0");
        }
        if self.admin_timeout.is_zero() {
            return invalid("admin_timeout", "must be greater than 0");
        }
        if !self.log_root.is_absolute() {
            return invalid("log_root", "must be an absolute path");
        }
        if let Some(url) = &self.admin_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return invalid("admin_url", "must be an http(s) URL");
        }
        if self.metadata.connect_timeout.is_zero() {
            return invalid("metadata.connect_timeout", "must be greater than 0");
        }
        let backoff = &self.metadata.backoff;
        if backoff.initial.is_zero() {
            return invalid("metadata.backoff.initial", "must be greater than 0");
        }
        if backoff.initial > backoff.max {
            return invalid("metadata.backoff", "initial must not exceed max");
        }
        Ok(())
    }
}

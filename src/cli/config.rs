//! blobsite configuration file handling
//!
//! Configuration is TOML. Lookup order when `--config` is not given:
//! 1. `./blobsite.toml`
//! 2. `<config dir>/blobsite/config.toml` (e.g. `~/.config/blobsite/config.toml`)
//!
//! A missing file is not an error: the built-in defaults are used and a
//! warning is logged. A file that exists but does not parse is an error.
//!
//! Durations are written the human way (`"5s"`, `"500ms"`, `"2m"`).

use blobsite::network::traits::ObjectId;
use blobsite::publish::{Backoff, PublishSettings, RetryPolicy, SiteMetadata};
use blobsite::publish::{DEFAULT_MAX_GROUP_SIZE, DEFAULT_PORTAL_DOMAIN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "blobsite.toml";

/// blobsite configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobsiteConfig {
    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub signer: SignerConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What gets published and where it is served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,

    /// Directory holding the built site
    pub path: PathBuf,

    /// Existing site object to update (omit to create a new site)
    pub object_id: Option<ObjectId>,

    pub portal_domain: String,

    /// Publish dotfiles too
    pub include_hidden: bool,

    /// Upper bound on the bytes packed into one blob
    pub max_group_size: u64,

    pub metadata: SiteMetadata,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "my-site".to_string(),
            path: PathBuf::from("./dist"),
            object_id: None,
            portal_domain: DEFAULT_PORTAL_DOMAIN.to_string(),
            include_hidden: false,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            metadata: SiteMetadata::default(),
        }
    }
}

/// Ledger gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network name (informational: testnet, mainnet, ...)
    pub name: String,

    pub ledger_url: String,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "testnet".to_string(),
            ledger_url: "http://127.0.0.1:9000".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Storage reservation and write behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub epochs: u32,

    /// Attempts per node write; 0 means the built-in default (5)
    pub write_retry_limit: u32,

    /// Acknowledgments required per blob (default: Byzantine quorum of the committee)
    pub quorum: Option<usize>,

    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    pub max_parallel: usize,

    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            write_retry_limit: 3,
            quorum: None,
            settle_delay: Duration::from_secs(5),
            write_timeout: Duration::from_secs(30),
            max_parallel: 4,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

/// Signing key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// File holding the hex Ed25519 seed (falls back to BLOBSITE_SIGNER_KEY)
    pub key_file: Option<PathBuf>,

    /// Expected owner address; publishing refuses to run with another key
    pub owner: Option<String>,
}

/// Post-publish notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Tracking endpoint (omit to disable)
    pub endpoint: Option<String>,

    /// Project id (falls back to PROJECT_ID, then a temporary id)
    pub project_id: Option<String>,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How long the CLI waits for the notification before exiting
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            project_id: None,
            timeout: Duration::from_secs(10),
            grace: Duration::from_secs(5),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Durations as humantime strings.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub path: Option<PathBuf>,
    pub site_object_id: Option<ObjectId>,
    pub epochs: Option<u32>,
    pub retry_limit: Option<u32>,
}

impl BlobsiteConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: BlobsiteConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Load `path`, or the defaults if it does not exist. The flag tells
    /// whether a file was read.
    pub fn load_or_default(path: &Path) -> Result<(Self, bool), Box<dyn std::error::Error>> {
        if path.exists() {
            Ok((Self::load(path)?, true))
        } else {
            Ok((Self::default(), false))
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create config directory: {}", e))?;
            }
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(path) = &overrides.path {
            self.site.path = path.clone();
        }
        if let Some(id) = overrides.site_object_id {
            self.site.object_id = Some(id);
        }
        if let Some(epochs) = overrides.epochs {
            self.storage.epochs = epochs;
        }
        if let Some(limit) = overrides.retry_limit {
            self.storage.write_retry_limit = limit;
        }
    }

    /// Pipeline settings described by this configuration.
    pub fn publish_settings(&self) -> PublishSettings {
        let backoff = Backoff::Exponential {
            base: self.storage.backoff_base,
            max: self.storage.backoff_max,
        };

        PublishSettings {
            upload_path: self.site.path.clone(),
            site_name: self.site.name.clone(),
            metadata: self.site.metadata.clone(),
            epochs: self.storage.epochs,
            site_object_id: self.site.object_id,
            max_group_size: self.site.max_group_size,
            include_hidden: self.site.include_hidden,
            quorum: self.storage.quorum,
            retry: RetryPolicy::from_limit(Some(self.storage.write_retry_limit), backoff),
            write_timeout: self.storage.write_timeout,
            max_parallel: self.storage.max_parallel,
            settle_delay: self.storage.settle_delay,
            portal_domain: self.site.portal_domain.clone(),
        }
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml() -> String {
        format!(
            r#"# blobsite configuration
#
# Durations accept human units: "500ms", "5s", "2m".

[site]
name = "my-site"
# Directory holding the built site
path = "./dist"
# Existing site object to update; leave commented to create a new site
# object_id = "0x..."
portal_domain = "{portal}"
include_hidden = false
# Upper bound on the bytes packed into one blob
max_group_size = {max_group_size}

[site.metadata]
link = ""
image_url = ""
name = "My Project"
description = "A decentralized web app deployed on blob storage."
project_url = ""
creator = ""

[network]
name = "testnet"
ledger_url = "http://127.0.0.1:9000"
request_timeout = "30s"

[storage]
epochs = 5
# Attempts per storage node; 0 uses the built-in default (5)
write_retry_limit = 3
# Acknowledgments required per blob; defaults to n - floor((n - 1) / 3)
# quorum = 3
settle_delay = "5s"
write_timeout = "30s"
max_parallel = 4
backoff_base = "500ms"
backoff_max = "8s"

[signer]
# Hex Ed25519 seed file; BLOBSITE_SIGNER_KEY is used when unset
# key_file = "~/.config/blobsite/signer.key"
# owner = "0x..."

[notify]
# Tracking endpoint that receives {{"projectId", "url"}} after a publish
# endpoint = "https://example.com/api/project-domains"
# project_id = "my-project"
timeout = "10s"
grace = "5s"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"
"#,
            portal = DEFAULT_PORTAL_DOMAIN,
            max_group_size = DEFAULT_MAX_GROUP_SIZE,
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml();

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create config directory: {}", e))?;
            }
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Get the user-level config file path
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blobsite")
        .join("config.toml")
}

/// Resolve the config file to use
///
/// An explicit path always wins. Otherwise `./blobsite.toml` is used if it
/// exists, then the user-level file.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        local
    } else {
        user_config_path()
    }
}

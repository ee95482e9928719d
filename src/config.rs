//! Configuration types for xdcc-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Acquisition behavior (temp storage, offer wait, command re-sends)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory offers are streamed into (default: "<system temp>/IrcDownloads")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// How long to wait for an offer after each command (default: 300 seconds)
    #[serde(default = "default_offer_timeout", with = "duration_serde")]
    pub offer_timeout: Duration,

    /// Re-send policy when no offer arrives within `offer_timeout`
    ///
    /// `max_attempts` counts re-sends after the first command; 0 disables them.
    #[serde(default = "default_command_retry")]
    pub command_retry: RetryConfig,

    /// Retry policy for connecting the transport
    #[serde(default)]
    pub connect_retry: RetryConfig,

    /// Treat a byte count different from the declared size as an integrity failure (default: true)
    #[serde(default = "default_true")]
    pub verify_size: bool,

    /// Remove the local temp file once the upload succeeded (default: true)
    #[serde(default = "default_true")]
    pub cleanup_temp_files: bool,

    /// Chat command sent to the bot; `{package}` is replaced by the package number
    #[serde(default = "default_command_template")]
    pub command_template: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            offer_timeout: default_offer_timeout(),
            command_retry: default_command_retry(),
            connect_retry: RetryConfig::default(),
            verify_size: true,
            cleanup_temp_files: true,
            command_template: default_command_template(),
        }
    }
}

impl DownloadConfig {
    /// Render the chat command for a package number
    pub fn render_command(&self, package_number: u32) -> String {
        self.command_template
            .replace("{package}", &package_number.to_string())
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    fn validate(&self, key: &str) -> Result<()> {
        // NaN fails the comparison too
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(config_error(
                "backoff_multiplier must be a finite number of at least 1.0",
                key,
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Disk space checking before a stream starts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum free space to maintain (default: 1 GB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Multiplier for the declared size (default: 1.1)
    #[serde(default = "default_size_multiplier")]
    pub size_multiplier: f64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
            size_multiplier: default_size_multiplier(),
        }
    }
}

/// Publication layout and the directory storage target
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Logical directory every published file lives under (default: "Files")
    #[serde(default = "default_logical_root")]
    pub logical_root: String,

    /// Separator used when joining the logical path (default: "/")
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Filesystem root for [`DirectoryStorage`](crate::storage::DirectoryStorage) (default: "./storage")
    #[serde(default = "default_storage_root")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            logical_root: default_logical_root(),
            separator: default_separator(),
            root_dir: default_storage_root(),
        }
    }
}

impl StorageConfig {
    /// Canonical storage path for a file name, e.g. `Files/Episode01.mkv`
    pub fn storage_path(&self, file_name: &str) -> String {
        format!("{}{}{}", self.logical_root, self.separator, file_name)
    }
}

/// Data storage and state management
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./xdcc-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for XdccDownloader
///
/// Every section has defaults, so `Config::default()` is a working setup and a
/// JSON file only needs to name what it overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Acquisition behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Pre-stream disk space check
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Publication layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ledger location
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read '{}': {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.download.offer_timeout.is_zero() {
            return Err(config_error(
                "offer_timeout must be greater than zero",
                "download.offer_timeout",
            ));
        }
        if !self.download.command_template.contains("{package}") {
            return Err(config_error(
                "command_template must contain {package}",
                "download.command_template",
            ));
        }
        if self.storage.logical_root.is_empty() {
            return Err(config_error(
                "logical_root must not be empty",
                "storage.logical_root",
            ));
        }
        if self.storage.separator.is_empty() {
            return Err(config_error(
                "separator must not be empty",
                "storage.separator",
            ));
        }
        self.download
            .command_retry
            .validate("download.command_retry.backoff_multiplier")?;
        self.download
            .connect_retry
            .validate("download.connect_retry.backoff_multiplier")?;
        if self.disk_space.size_multiplier < 1.0 {
            return Err(config_error(
                "size_multiplier must be at least 1.0",
                "disk_space.size_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("IrcDownloads")
}

fn default_offer_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_command_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_secs(5),
        ..RetryConfig::default()
    }
}

fn default_command_template() -> String {
    "xdcc send #{package}".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./xdcc-dl.db")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_logical_root() -> String {
    "Files".to_string()
}

fn default_separator() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_free_space() -> u64 {
    1024 * 1024 * 1024 // 1 GB
}

fn default_size_multiplier() -> f64 {
    1.1
}

// Custom serialization for Duration (as seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

//! Client configuration.
//!
//! The configuration is a YAML document stored in the user's configuration
//! directory. The client takes a copy at construction time and never changes
//! it afterwards.

use dirs::config_dir;
use serde::{Deserialize, Serialize};
use serde_yaml;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::PathBuf,
    time::Duration,
};
use tracing::debug;
use url::Url;

use crate::format::{Formattable, FormattingError, OutputFormat};

pub const DEFAULT_APPLICATION_ID: &str = "campus";
pub const DEFAULT_CONFIGURATION_FILE_NAME: &str = "config.yml";
pub const CONFIG_DIR_ENV: &str = "CAMPUS_CONFIG_DIR";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("failed to resolve the configuration directory")]
    FailedToFindConfigurationDirectory,
    #[error("failed to load configuration data, because of: {cause}")]
    FailedToLoadData {
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to write configuration data to file, because of: {cause}")]
    FailedToWriteData {
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to build the HTTP client, because of: {cause}")]
    FailedToBuildHttpClient { cause: reqwest::Error },
    #[error("invalid value for property {name:?}: {reason}")]
    InvalidPropertyValue { name: String, reason: String },
    #[error("{cause}")]
    FormattingError {
        #[from]
        cause: FormattingError,
    },
}

/// Endpoints and timing for the token lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfiguration {
    #[serde(alias = "loginPath")]
    pub login_path: String,
    #[serde(alias = "refreshPath")]
    pub refresh_path: String,
    #[serde(alias = "refreshTimeout")]
    pub refresh_timeout_ms: u64,
    /// Tokens are considered expired this many seconds early
    #[serde(alias = "expirySkew")]
    pub expiry_skew_secs: u64,
}

impl Default for AuthConfiguration {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            refresh_timeout_ms: 10_000,
            expiry_skew_secs: 30,
        }
    }
}

/// Configuration of one API client instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(alias = "baseURL", alias = "baseUrl")]
    pub base_url: String,
    /// Version segment inserted between the base URL and request paths
    #[serde(alias = "apiVersion")]
    pub api_version: String,
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    /// Enables the response cache
    #[serde(alias = "enableOfflineCache")]
    pub enable_offline_cache: bool,
    #[serde(alias = "cacheTTL", alias = "cacheTtl")]
    pub cache_ttl_ms: u64,
    #[serde(alias = "cacheMaxEntries")]
    pub cache_max_entries: usize,
    #[serde(alias = "enableRetry")]
    pub enable_retry: bool,
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,
    #[serde(alias = "maxRetryDelay")]
    pub max_retry_delay_ms: u64,
    #[serde(alias = "enableLogging")]
    pub enable_logging: bool,
    #[serde(alias = "enableOfflineQueue")]
    pub enable_offline_queue: bool,
    #[serde(alias = "queueMaxRetries")]
    pub queue_max_retries: u32,
    /// Headers sent with every request
    pub headers: BTreeMap<String, String>,
    pub auth: AuthConfiguration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "User-Agent".to_string(),
            format!("campus-client/{}", env!("CARGO_PKG_VERSION")),
        );

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: "v1".to_string(),
            timeout_ms: 30_000,
            enable_offline_cache: true,
            cache_ttl_ms: 300_000,
            cache_max_entries: 256,
            enable_retry: true,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            enable_logging: false,
            enable_offline_queue: true,
            queue_max_retries: 3,
            headers,
            auth: AuthConfiguration::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.refresh_timeout_ms)
    }

    /// Absolute URL for a request path: base + version segment + path.
    ///
    /// Paths that are already absolute URLs are returned unchanged.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let version = self.api_version.trim_matches('/');
        let path = path.trim_start_matches('/');
        if version.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}/{}", base, version, path)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::InvalidPropertyValue {
                name: "timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        match Url::parse(&self.base_url) {
            Ok(url) if !url.cannot_be_a_base() => {}
            Ok(_) => {
                return Err(ConfigurationError::InvalidPropertyValue {
                    name: "base_url".to_string(),
                    reason: format!("{} cannot be used as a base URL", self.base_url),
                })
            }
            Err(e) => {
                return Err(ConfigurationError::InvalidPropertyValue {
                    name: "base_url".to_string(),
                    reason: e.to_string(),
                })
            }
        }
        if self.retry_delay_ms > self.max_retry_delay_ms {
            return Err(ConfigurationError::InvalidPropertyValue {
                name: "retry_delay_ms".to_string(),
                reason: "must not exceed max_retry_delay_ms".to_string(),
            });
        }
        Ok(())
    }

    pub fn get_default_configuration_file_path() -> Result<PathBuf, ConfigurationError> {
        if let Ok(config_dir_str) = std::env::var(CONFIG_DIR_ENV) {
            let mut config_path = PathBuf::from(config_dir_str);
            config_path.push(DEFAULT_CONFIGURATION_FILE_NAME);
            return Ok(config_path);
        }

        match config_dir() {
            Some(mut path) => {
                path.push(DEFAULT_APPLICATION_ID);
                path.push(DEFAULT_CONFIGURATION_FILE_NAME);
                Ok(path)
            }
            None => Err(ConfigurationError::FailedToFindConfigurationDirectory),
        }
    }

    pub fn load_default() -> Result<ClientConfig, ConfigurationError> {
        let default_file_path = ClientConfig::get_default_configuration_file_path()?;
        debug!("Loading configuration from {:?}...", default_file_path);
        ClientConfig::load_from_file(default_file_path)
    }

    /// Load the default configuration, writing a default file if none exists.
    pub fn load_or_create_default() -> Result<ClientConfig, ConfigurationError> {
        let default_file_path = ClientConfig::get_default_configuration_file_path()?;
        debug!("Loading or creating configuration from {:?}...", default_file_path);

        if !default_file_path.exists() {
            debug!("Configuration file not found, creating default configuration");
            let default_config = ClientConfig::default();
            default_config.save(&default_file_path)?;
            return Ok(default_config);
        }

        ClientConfig::load_from_file(default_file_path)
    }

    pub fn load_from_file(path: PathBuf) -> Result<ClientConfig, ConfigurationError> {
        let contents = fs::read_to_string(path)
            .map_err(|cause| ConfigurationError::FailedToLoadData { cause: Box::new(cause) })?;
        let configuration: ClientConfig = serde_yaml::from_str(&contents)
            .map_err(|cause| ConfigurationError::FailedToLoadData { cause: Box::new(cause) })?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn write(&self, writer: Box<dyn Write>) -> Result<(), ConfigurationError> {
        serde_yaml::to_writer(writer, self)
            .map_err(|e| ConfigurationError::FailedToWriteData { cause: Box::new(e) })
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), ConfigurationError> {
        match path.parent() {
            Some(directory) => fs::create_dir_all(directory)
                .map_err(|_| ConfigurationError::FailedToFindConfigurationDirectory)?,
            None => return Err(ConfigurationError::FailedToFindConfigurationDirectory),
        }

        let file = File::create(path)
            .map_err(|e| ConfigurationError::FailedToWriteData { cause: Box::new(e) })?;
        self.write(Box::new(file))
    }

    pub fn save_to_default(&self) -> Result<(), ConfigurationError> {
        self.save(&Self::get_default_configuration_file_path()?)
    }
}

impl Formattable for ClientConfig {
    fn format(&self, f: &OutputFormat) -> Result<String, FormattingError> {
        match f {
            OutputFormat::Json(options) => {
                if options.pretty {
                    Ok(serde_json::to_string_pretty(self)?)
                } else {
                    Ok(serde_json::to_string(self)?)
                }
            }
            OutputFormat::Csv(options) => {
                let mut wtr = csv::Writer::from_writer(vec![]);
                if options.with_headers {
                    wtr.write_record(["BASE_URL", "API_VERSION", "TIMEOUT_MS", "MAX_RETRIES"])?;
                }
                wtr.write_record([
                    self.base_url.clone(),
                    self.api_version.clone(),
                    self.timeout_ms.to_string(),
                    self.max_retries.to_string(),
                ])?;
                Ok(String::from_utf8(wtr.into_inner()?)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_url_joins_version_segment() {
        let config = ClientConfig::default().with_base_url("https://campus.example.edu/api/");
        assert_eq!(
            config.build_url("/students"),
            "https://campus.example.edu/api/v1/students"
        );
        assert_eq!(
            config.build_url("courses/12"),
            "https://campus.example.edu/api/v1/courses/12"
        );
    }

    #[test]
    fn test_build_url_without_version() {
        let mut config = ClientConfig::default().with_base_url("https://campus.example.edu");
        config.api_version = String::new();
        assert_eq!(config.build_url("/rooms"), "https://campus.example.edu/rooms");
        assert_eq!(
            config.build_url("https://other.example.edu/x"),
            "https://other.example.edu/x"
        );
    }

    #[test]
    fn test_accepts_documented_option_names() {
        let yaml = r#"
baseURL: https://campus.example.edu/api
apiVersion: v2
timeout: 5000
enableOfflineCache: false
enableRetry: true
maxRetries: 5
retryDelay: 200
enableLogging: true
headers:
  X-Client: admin
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api_version, "v2");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(!config.enable_offline_cache);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay(), Duration::from_millis(200));
        assert!(config.enable_logging);
        assert_eq!(config.headers.get("X-Client").map(String::as_str), Some("admin"));
        // unspecified fields fall back to defaults
        assert_eq!(config.cache_max_entries, 256);
        assert_eq!(config.auth.refresh_path, "/auth/refresh");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ClientConfig {
            timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidPropertyValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_relative_base_url() {
        let config = ClientConfig::default().with_base_url("campus/api");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(DEFAULT_CONFIGURATION_FILE_NAME);
        let mut config = ClientConfig::default();
        config.max_retries = 7;
        config.save(&path).unwrap();

        let loaded = ClientConfig::load_from_file(path).unwrap();
        assert_eq!(loaded, config);
    }
}

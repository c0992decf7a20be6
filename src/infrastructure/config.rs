//! Configuration infrastructure
//!
//! One `SyncConfig` carries every path, limit and policy a run needs; nothing
//! is read from process-wide state after loading. Values come from a TOML file
//! layered under `RCP_MIRROR__*` environment variables, e.g.
//! `RCP_MIRROR__FETCH__CONCURRENCY_LIMIT=8`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::http_client::HttpClientConfig;
use super::layout::StorageLayout;
use crate::domain::retry_policy::RetryPolicy;

pub const ENV_PREFIX: &str = "RCP_MIRROR";

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://www.ema.europa.eu/{lang}/documents/product-information/{slug}_{lang}.pdf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Data directory not found; set data_root explicitly")]
    NoDataRoot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Document language code substituted for `{lang}`
    pub language: String,
    /// Root of every persisted file; defaults to the user's local data dir
    pub data_root: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub http: HttpClientConfig,
    pub retry: RetryPolicy,
    pub queue: QueueConfig,
    pub url: UrlConfig,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            data_root: None,
            fetch: FetchConfig::default(),
            http: HttpClientConfig::default(),
            retry: RetryPolicy::default(),
            queue: QueueConfig::default(),
            url: UrlConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on in-flight requests
    pub concurrency_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { concurrency_limit: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Consecutive failed drain cycles before a transient failure turns permanent
    pub escalate_after_cycles: u32,
    pub max_drain_cycles: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            escalate_after_cycles: 5,
            max_drain_cycles: 10,
        }
    }
}

/// Hand-curated slug replacing the default one for a single id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlOverride {
    pub id: String,
    pub slug: String,
}

impl UrlOverride {
    fn new(id: &str, slug: &str) -> Self {
        Self {
            id: id.to_string(),
            slug: slug.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    /// Must contain `{slug}`; `{lang}` is optional
    pub template: String,
    pub authorised_overrides: Vec<UrlOverride>,
    pub withdrawn_overrides: Vec<UrlOverride>,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_URL_TEMPLATE.to_string(),
            authorised_overrides: vec![
                UrlOverride::new("Arikayce-liposomal", "arikayce-liposomal-product-information"),
                UrlOverride::new(
                    "Budesonide-formoterol-teva",
                    "budesonideformoterol-teva-epar-product-information",
                ),
                UrlOverride::new(
                    "Lamivudine-zidovudine-teva",
                    "lamivudinezidovudine-teva-epar-product-information",
                ),
                UrlOverride::new(
                    "Pandemic-influenza-vaccine-h5n1-baxter-ag",
                    "pandemic-influenza-vaccine-h5n1-baxter-epar-product-information",
                ),
            ],
            withdrawn_overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug" or "trace"; `RUST_LOG` wins when set
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data_root>/logs`
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
        }
    }
}

impl SyncConfig {
    /// Loads `path` (extension optional) layered under the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::build(Some(&path))
    }

    /// `config/default` if present, then the environment, then built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    fn build(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = path.map_or_else(
            || config::File::with_name("config/default").required(false),
            config::File::with_name,
        );
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.language.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "language must not be empty".to_string(),
            });
        }
        if self.fetch.concurrency_limit == 0 {
            return Err(ConfigError::Validation {
                message: "fetch.concurrency_limit must be greater than 0".to_string(),
            });
        }
        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "http.timeout_seconds must be greater than 0".to_string(),
            });
        }
        if self.queue.escalate_after_cycles == 0 || self.queue.max_drain_cycles == 0 {
            return Err(ConfigError::Validation {
                message: "queue cycle counts must be greater than 0".to_string(),
            });
        }
        if !self.url.template.contains("{slug}") {
            return Err(ConfigError::Validation {
                message: format!("url.template '{}' has no {{slug}} placeholder", self.url.template),
            });
        }
        self.retry
            .validate()
            .map_err(|message| ConfigError::Validation { message })
    }

    /// File layout rooted at `data_root`, or the platform data directory.
    pub fn layout(&self) -> Result<StorageLayout, ConfigError> {
        match &self.data_root {
            Some(root) => Ok(StorageLayout::new(root.clone())),
            None => StorageLayout::default_root()
                .map(StorageLayout::new)
                .map_err(|_| ConfigError::NoDataRoot),
        }
    }
}

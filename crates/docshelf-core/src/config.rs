//! Engine configuration types.

use std::path::Path;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for listing sessions.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ListingConfig {
    /// Entries requested per page.
    #[builder(default = "40")]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Quiet window for coalescing search input, in milliseconds.
    #[builder(default = "750")]
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,

    /// Drop entities whose parent is not the listed folder (outside search).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub enforce_parent: bool,
}

fn default_page_size() -> usize {
    40
}

fn default_search_debounce_ms() -> u64 {
    750
}

fn default_true() -> bool {
    true
}

impl ListingConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.page_size == Some(0) {
            return Err("Page size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl ListingConfig {
    /// Create a new listing config builder.
    pub fn builder() -> ListingConfigBuilder {
        ListingConfigBuilder::default()
    }

    /// The search debounce window.
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            search_debounce_ms: default_search_debounce_ms(),
            enforce_parent: true,
        }
    }
}

/// Configuration for transfers.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct TransferConfig {
    /// Preferred I/O chunk size for streamed transfers.
    #[builder(default = "64 * 1024")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Capacity of the progress event channel.
    #[builder(default = "100")]
    #[serde(default = "default_progress_channel_size")]
    pub progress_channel_size: usize,

    /// Page size used when enumerating folders for conflict checks and
    /// folder transfers.
    #[builder(default = "200")]
    #[serde(default = "default_children_page_size")]
    pub children_page_size: usize,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_progress_channel_size() -> usize {
    100
}

fn default_children_page_size() -> usize {
    200
}

impl TransferConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        if self.progress_channel_size == Some(0) {
            return Err("Progress channel size must be greater than zero".to_string());
        }
        if self.children_page_size == Some(0) {
            return Err("Children page size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl TransferConfig {
    /// Create a new transfer config builder.
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_channel_size: default_progress_channel_size(),
            children_page_size: default_children_page_size(),
        }
    }
}

/// Errors loading an engine config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {message}")]
    Invalid { message: String },
}

/// Complete engine configuration, as stored in `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.listing.page_size == 0 {
            return invalid("listing.page_size must be greater than zero");
        }
        if self.transfer.chunk_size == 0 {
            return invalid("transfer.chunk_size must be greater than zero");
        }
        if self.transfer.progress_channel_size == 0 {
            return invalid("transfer.progress_channel_size must be greater than zero");
        }
        if self.transfer.children_page_size == 0 {
            return invalid("transfer.children_page_size must be greater than zero");
        }
        Ok(())
    }
}

//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration management for the biodiversity search platform,
//! supporting file-based settings with environment-variable overrides,
//! validation and type-safe access to all system settings.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Type checking, range validation, dependency verification
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration files
//! 3. Default values (lowest priority)
//!
//! ## Usage
//! ```rust,no_run
//! use biodiversity_search::config::Config;
//!
//! let config = Config::from_file("config.toml").unwrap();
//! println!("Taxon tree TTL: {}s", config.cache.taxon_tree_ttl_seconds);
//! ```

use crate::errors::{Result, SearchError};
use crate::UserType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cache lifecycle settings
    pub cache: CacheConfig,
    /// Spatial index and position resolution settings
    pub spatial: SpatialConfig,
    /// Admission-control semaphore limits
    pub limits: LimitsConfig,
    /// Storage and database settings
    pub storage: StorageConfig,
    /// Search and paging behavior
    pub search: SearchConfig,
    /// Logging and monitoring
    pub logging: LoggingConfig,
    /// Performance tuning
    pub performance: PerformanceConfig,
}

/// Cache lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard TTL for the taxon tree cache slot in seconds
    pub taxon_tree_ttl_seconds: u64,
    /// Hard TTL for the taxon-list-set cache slot in seconds
    pub taxon_list_ttl_seconds: u64,
    /// Margin before hard expiry at which the background refresh runs
    pub refresh_margin_seconds: u64,
}

impl CacheConfig {
    pub fn taxon_tree_ttl(&self) -> Duration {
        Duration::from_secs(self.taxon_tree_ttl_seconds)
    }

    pub fn taxon_list_ttl(&self) -> Duration {
        Duration::from_secs(self.taxon_list_ttl_seconds)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_seconds)
    }
}

/// Spatial index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// Decimal places used when rounding coordinates into cache keys
    pub coordinate_precision: u32,
    /// Warn when the position cache grows beyond this many entries
    pub position_cache_warn_entries: usize,
}

/// Admission-control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-user-type concurrency limits; must contain the Unknown slot
    pub user_types: HashMap<UserType, UserTypeLimits>,
    /// Bounded semaphore acquisition timeout in seconds
    pub acquire_timeout_seconds: u64,
}

/// Concurrency limits for a single user type
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserTypeLimits {
    /// Maximum concurrent observation searches
    pub observation_permits: usize,
    /// Maximum concurrent expensive aggregations
    pub aggregation_permits: usize,
}

/// Storage and database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path
    pub db_path: PathBuf,
    /// Enable database compression
    pub enable_compression: bool,
}

/// Search and paging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default aggregation page size
    pub default_page_size: usize,
    /// Upper bound on pages fetched by a single paging loop
    pub max_pages: usize,
    /// Per-page aggregation timeout in seconds
    pub aggregation_timeout_seconds: u64,
}

/// Logging and monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

/// Performance tuning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Number of worker threads for async runtime
    pub worker_threads: usize,
    /// Thread pool size for CPU-intensive work (spatial index preparation)
    pub cpu_pool_size: usize,
}

impl Config {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| SearchError::Config {
            message: format!("Failed to read config file {:?}: {}", path, e),
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| SearchError::Config {
            message: format!("Failed to parse config file {:?}: {}", path, e),
        })?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_path) = std::env::var("BIODIVERSITY_SEARCH_DB_PATH") {
            self.storage.db_path = PathBuf::from(db_path);
        }
        if let Ok(ttl) = std::env::var("BIODIVERSITY_SEARCH_TAXON_TTL_SECONDS") {
            self.cache.taxon_tree_ttl_seconds = ttl.parse().map_err(|_| SearchError::Config {
                message: "Invalid value in BIODIVERSITY_SEARCH_TAXON_TTL_SECONDS".to_string(),
            })?;
        }
        if let Ok(level) = std::env::var("BIODIVERSITY_SEARCH_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.cache.taxon_tree_ttl_seconds == 0 {
            return Err(SearchError::ValidationFailed {
                field: "cache.taxon_tree_ttl_seconds".to_string(),
                reason: "TTL must be greater than zero".to_string(),
            });
        }

        if self.cache.refresh_margin_seconds == 0 {
            return Err(SearchError::ValidationFailed {
                field: "cache.refresh_margin_seconds".to_string(),
                reason: "Refresh margin must be greater than zero".to_string(),
            });
        }

        if self.cache.refresh_margin_seconds >= self.cache.taxon_tree_ttl_seconds {
            return Err(SearchError::ValidationFailed {
                field: "cache.refresh_margin_seconds".to_string(),
                reason: "Refresh margin must be smaller than the TTL".to_string(),
            });
        }

        if self.spatial.coordinate_precision > 9 {
            return Err(SearchError::ValidationFailed {
                field: "spatial.coordinate_precision".to_string(),
                reason: "Coordinate precision above 9 decimals overflows the cache key".to_string(),
            });
        }

        if !self.limits.user_types.contains_key(&UserType::Unknown) {
            return Err(SearchError::ValidationFailed {
                field: "limits.user_types".to_string(),
                reason: "The Unknown fallback slot must be configured".to_string(),
            });
        }

        if self.search.default_page_size == 0 {
            return Err(SearchError::ValidationFailed {
                field: "search.default_page_size".to_string(),
                reason: "Page size cannot be zero".to_string(),
            });
        }

        Ok(())
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SearchError::Config {
            message: format!("Failed to serialize config to TOML: {}", e),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut user_types = HashMap::new();
        user_types.insert(
            UserType::Authenticated,
            UserTypeLimits {
                observation_permits: 16,
                aggregation_permits: 4,
            },
        );
        user_types.insert(
            UserType::Application,
            UserTypeLimits {
                observation_permits: 32,
                aggregation_permits: 8,
            },
        );
        user_types.insert(
            UserType::Unknown,
            UserTypeLimits {
                observation_permits: 8,
                aggregation_permits: 2,
            },
        );

        Self {
            cache: CacheConfig {
                taxon_tree_ttl_seconds: 24 * 3600,
                taxon_list_ttl_seconds: 24 * 3600,
                refresh_margin_seconds: 3600,
            },
            spatial: SpatialConfig {
                coordinate_precision: 5,
                position_cache_warn_entries: 1_000_000,
            },
            limits: LimitsConfig {
                user_types,
                acquire_timeout_seconds: 50,
            },
            storage: StorageConfig {
                db_path: PathBuf::from("./data/biodiversity_search.db"),
                enable_compression: true,
            },
            search: SearchConfig {
                default_page_size: 1000,
                max_pages: 10_000,
                aggregation_timeout_seconds: 120,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
            },
            performance: PerformanceConfig {
                worker_threads: num_cpus::get(),
                cpu_pool_size: num_cpus::get(),
            },
        }
    }
}

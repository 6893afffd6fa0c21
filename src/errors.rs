//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the biodiversity search platform, providing
//! structured error types for every subsystem: repositories, caches, spatial
//! resolution, filter resolution and admission control.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from storage, cache rebuilds, spatial lookups
//! - **Output**: Structured error types with context and error chains
//! - **Error Categories**: Configuration, Storage, Taxonomy, Geography, Search
//!
//! ## Key Features
//! - Hierarchical error types with detailed context
//! - Automatic error conversion from library errors
//! - Distinct admission-timeout signal so callers can answer with a
//!   rate-limit response instead of an empty result set
//! - Structured logging integration

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, SearchError>;

/// Comprehensive error types for the biodiversity search platform
#[derive(Debug, Error)]
pub enum SearchError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation failed for field '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Binary serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // Repository errors
    #[error("Taxon repository fetch failed: {details}")]
    TaxonFetchFailed { details: String },

    #[error("Taxon list repository fetch failed: {details}")]
    TaxonListFetchFailed { details: String },

    #[error("Area repository fetch failed: {details}")]
    AreaFetchFailed { details: String },

    #[error("Geometry missing for {area_type} feature '{feature_id}'")]
    GeometryMissing {
        area_type: String,
        feature_id: String,
    },

    // Taxonomy errors
    #[error("Taxon tree build failed: {reason}")]
    TreeBuildFailed { reason: String },

    // Geography errors
    #[error("Spatial index is not initialized")]
    SpatialIndexNotInitialized,

    #[error("Invalid coordinate: lon={longitude}, lat={latitude}")]
    InvalidCoordinate { longitude: f64, latitude: f64 },

    // Search / admission errors
    #[error("Admission semaphore wait exceeded {timeout_seconds}s for user type '{user_type}'")]
    AdmissionTimeout {
        user_type: String,
        timeout_seconds: u64,
    },

    #[error("Semaphore limits missing the Unknown fallback slot")]
    MissingUnknownLimit,

    #[error("Aggregation backend error: {details}")]
    AggregationFailed { details: String },

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SearchError {
    /// Check if the error is recoverable (can be retried by the caller)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SearchError::TaxonFetchFailed { .. }
                | SearchError::TaxonListFetchFailed { .. }
                | SearchError::AreaFetchFailed { .. }
                | SearchError::AdmissionTimeout { .. }
                | SearchError::AggregationFailed { .. }
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            SearchError::Config { .. } | SearchError::Toml(_) => "configuration",
            SearchError::Database(_) | SearchError::Serialization(_) | SearchError::Json(_) => {
                "storage"
            }
            SearchError::TaxonFetchFailed { .. }
            | SearchError::TaxonListFetchFailed { .. }
            | SearchError::TreeBuildFailed { .. } => "taxonomy",
            SearchError::AreaFetchFailed { .. }
            | SearchError::GeometryMissing { .. }
            | SearchError::SpatialIndexNotInitialized
            | SearchError::InvalidCoordinate { .. } => "geography",
            SearchError::AdmissionTimeout { .. } | SearchError::MissingUnknownLimit => "admission",
            SearchError::AggregationFailed { .. } => "search",
            SearchError::ValidationFailed { .. } | SearchError::Internal { .. } => "generic",
        }
    }
}

impl From<std::io::Error> for SearchError {
    fn from(err: std::io::Error) -> Self {
        SearchError::Internal {
            message: format!("IO error: {}", err),
        }
    }
}

// Helper macro for common error patterns
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::SearchError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::SearchError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

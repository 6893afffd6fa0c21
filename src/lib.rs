//! # Biodiversity-Observation Search Platform
//!
//! ## Overview
//! This library implements the data-platform core for biodiversity observation
//! search: a process-wide, lazily-rebuilt in-memory taxon hierarchy combined
//! with taxon-list membership sets, a spatial index over administrative-area
//! polygons, and a filter-resolution pipeline that turns user-supplied search
//! filters into fully expanded, backend-ready predicates.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `taxonomy`: Taxon tree construction, cache lifecycle and list-set derivation
//! - `geography`: R-tree over area polygons with per-coordinate result caching
//! - `cache`: Generic expiring single-value cache with background refresh
//! - `filter`: Search-filter model and filter-resolution pipeline
//! - `limits`: Per-user-type admission-control semaphores
//! - `search`: Admission-gated, cursor-paged aggregation driver
//! - `repository`: Collaborator contracts (taxon/area storage, aggregation backend)
//! - `storage`: Embedded document store implementing the repository contracts
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Raw search filters (taxon ids/lists/categories, areas), coordinates
//! - **Output**: Resolved filters, hierarchical membership sets, area lookups
//! - **Performance**: Sub-millisecond membership queries against a warm tree cache
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use biodiversity_search::{Config, PlatformState};
//! use biodiversity_search::storage::DocumentStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::from_file("config.toml")?);
//!     let store = Arc::new(DocumentStore::new(config.storage.clone()).await?);
//!     let state = PlatformState::new(config, store.clone(), store.clone(), store).await?;
//!     state.taxon_manager.start_background_refresh();
//!     let tree = state.taxon_manager.get_taxon_tree().await?;
//!     println!("Cached tree holds {} taxa", tree.len());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod cache;
pub mod config;
pub mod errors;
pub mod filter;
pub mod geography;
pub mod limits;
pub mod repository;
pub mod search;
pub mod storage;
pub mod taxonomy;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use errors::{Result, SearchError};
pub use filter::{FilterManager, ResolvedSearchFilter, SearchFilter};
pub use taxonomy::{TaxonManager, TaxonTree};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unique identifier for taxa
pub type TaxonId = i32;

/// The synthetic root taxon representing "all life"
pub const BIOTA_TAXON_ID: TaxonId = 0;

/// Sentinel taxon id guaranteed absent from real data, used to force
/// zero matches when a filter provably excludes every taxon
pub const NO_MATCH_TAXON_ID: TaxonId = -1;

/// Administrative or ecological region classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AreaType {
    County,
    Municipality,
    Parish,
    Province,
    EconomicZoneOfSweden,
}

impl AreaType {
    /// The fixed set of area types held by the spatial index
    pub const INDEXED: [AreaType; 5] = [
        AreaType::County,
        AreaType::Province,
        AreaType::Municipality,
        AreaType::Parish,
        AreaType::EconomicZoneOfSweden,
    ];
}

impl std::fmt::Display for AreaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AreaType::County => "County",
            AreaType::Municipality => "Municipality",
            AreaType::Parish => "Parish",
            AreaType::Province => "Province",
            AreaType::EconomicZoneOfSweden => "EconomicZoneOfSweden",
        };
        f.write_str(name)
    }
}

/// User categories for admission control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserType {
    Authenticated,
    Application,
    Unknown,
}

/// Reference to a resolved administrative area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaFeature {
    pub area_type: AreaType,
    /// Feature id within the area type (upstream ids are strings, e.g. "08")
    pub feature_id: String,
    pub name: String,
}

/// Observation location being enriched with area data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    pub county: Option<AreaFeature>,
    pub municipality: Option<AreaFeature>,
    pub parish: Option<AreaFeature>,
    pub province: Option<AreaFeature>,
    pub economic_zone_of_sweden: bool,
}

/// Application state shared across components
#[derive(Clone)]
pub struct PlatformState {
    pub config: Arc<config::Config>,
    pub taxon_manager: Arc<taxonomy::TaxonManager>,
    pub area_manager: Arc<geography::AreaManager>,
    pub filter_manager: Arc<filter::FilterManager>,
    pub limits: Arc<limits::SemaphoreLimitManager>,
}

impl PlatformState {
    /// Wire up the full component graph from configuration and repositories
    pub async fn new(
        config: Arc<config::Config>,
        taxon_repository: Arc<dyn repository::TaxonRepository>,
        taxon_list_repository: Arc<dyn repository::TaxonListRepository>,
        area_repository: Arc<dyn repository::AreaRepository>,
    ) -> Result<Self> {
        let taxon_manager = Arc::new(taxonomy::TaxonManager::new(
            config.cache.clone(),
            taxon_repository,
            taxon_list_repository,
        ));
        let area_manager = Arc::new(geography::AreaManager::new(
            config.spatial.clone(),
            area_repository,
        ));
        let filter_manager = Arc::new(filter::FilterManager::new(
            taxon_manager.clone(),
            area_manager.clone(),
        ));
        let limits = Arc::new(limits::SemaphoreLimitManager::new(&config.limits)?);

        Ok(Self {
            config,
            taxon_manager,
            area_manager,
            filter_manager,
            limits,
        })
    }
}

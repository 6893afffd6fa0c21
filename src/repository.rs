//! # Repository Contracts Module
//!
//! ## Purpose
//! Collaborator contracts consumed by the platform core: bulk readers for
//! taxon, taxon-list and area documents, plus the cursor-paged aggregation
//! backend that executes resolved filters. Implementations live outside the
//! core (the embedded [`crate::storage::DocumentStore`] ships one for the
//! read contracts).
//!
//! ## Input/Output Specification
//! - **Input**: Bulk fetch requests, per-feature geometry lookups
//! - **Output**: Snapshot document vectors, polygon geometries, result pages
//! - **Contract**: No paging on snapshot reads; the core dedupes by id itself

use crate::errors::Result;
use crate::filter::ResolvedSearchFilter;
use crate::taxonomy::TaxonAttributes;
use crate::{AreaType, TaxonId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimal taxon projection fetched for tree construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonDocument {
    pub id: TaxonId,
    pub scientific_name: String,
    pub parent_id: Option<TaxonId>,
    pub secondary_parent_ids: Vec<TaxonId>,
    pub attributes: TaxonAttributes,
}

/// A configured taxon list with its exact members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonListDocument {
    pub id: i32,
    pub name: String,
    pub taxon_ids: Vec<TaxonId>,
}

/// An administrative-area feature without its geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaDocument {
    pub area_type: AreaType,
    pub feature_id: String,
    pub name: String,
}

/// One page of aggregation output
#[derive(Debug, Clone)]
pub struct AggregationPage {
    pub records: Vec<serde_json::Value>,
    /// Cursor for the next page; `None` when the result set is exhausted
    pub after_key: Option<serde_json::Value>,
}

/// Bulk reader for taxon documents
#[async_trait]
pub trait TaxonRepository: Send + Sync {
    /// Fetch all taxa. The caller applies first-occurrence-wins
    /// de-duplication; upstream storage can contain duplicate ids.
    async fn get_all(&self) -> Result<Vec<TaxonDocument>>;
}

/// Bulk reader for configured taxon lists
#[async_trait]
pub trait TaxonListRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<TaxonListDocument>>;
}

/// Reader for administrative areas and their polygon geometries
#[async_trait]
pub trait AreaRepository: Send + Sync {
    /// Fetch all areas of the requested types
    async fn get_areas(&self, types: &[AreaType]) -> Result<Vec<AreaDocument>>;

    /// Fetch the polygon geometry for a single feature
    async fn get_geometry(
        &self,
        area_type: AreaType,
        feature_id: &str,
    ) -> Result<Option<geo_types::Geometry<f64>>>;
}

/// Cursor-paged execution of a fully resolved filter
#[async_trait]
pub trait AggregationBackend: Send + Sync {
    async fn execute(
        &self,
        filter: &ResolvedSearchFilter,
        page_size: usize,
        after_key: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<AggregationPage>;
}

//! # Geography Module
//!
//! ## Purpose
//! Spatial resolution of administrative-area membership for observation
//! coordinates: an R-tree over area polygons plus a coordinate-keyed result
//! cache, used to resolve County/Municipality/Parish/Province/EconomicZone
//! membership for a lon/lat pair.
//!
//! ## Input/Output Specification
//! - **Input**: Area documents and polygon geometries from the area repository
//! - **Output**: Per-coordinate `PositionLocation` records, point feature hits
//! - **Performance**: Envelope query + exact containment on cache miss,
//!   lock-free map read on cache hit
//!
//! ## Key Features
//! - Idempotent, semaphore-gated index construction (one bulk load, ever,
//!   regardless of how many first-requests arrive at once)
//! - Coordinates rounded to a configured precision (5 decimals ≈ 1m) before
//!   keying the cache; entries are append-only until an explicit clear
//! - Coarse compute lock with a double-check, tolerating the benign race of
//!   two threads computing the same key
//! - Domain regrouping rules: the lappmark provinces collapse into a
//!   synthetic "Lappland" feature, and Kalmar county splits into "Öland" /
//!   "Kalmar fastland" depending on the resolved province

use crate::config::SpatialConfig;
use crate::errors::{Result, SearchError};
use crate::repository::{AreaDocument, AreaRepository};
use crate::utils::{coordinate_key, Timer};
use crate::{AreaFeature, AreaType, Location};
use dashmap::DashMap;
use geo::{BoundingRect, Contains};
use geo_types::{Geometry, Point};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Feature ids of the five lappmark provinces that are reported as the
/// single synthetic "Lappland" province
const LAPPLAND_PART_FEATURE_IDS: [&str; 5] = ["25", "26", "27", "28", "29"];
const LAPPLAND_FEATURE_ID: &str = "100";
const LAPPLAND_NAME: &str = "Lappland";

const KALMAR_COUNTY_FEATURE_ID: &str = "8";
const OLAND_PROVINCE_FEATURE_ID: &str = "3";
const OLAND_COUNTY_FEATURE_ID: &str = "101";
const OLAND_COUNTY_NAME: &str = "Öland";
const KALMAR_FASTLAND_FEATURE_ID: &str = "102";
const KALMAR_FASTLAND_NAME: &str = "Kalmar fastland";

/// Resolved area memberships for one rounded coordinate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionLocation {
    pub county: Option<AreaFeature>,
    pub municipality: Option<AreaFeature>,
    pub parish: Option<AreaFeature>,
    pub province: Option<AreaFeature>,
    pub economic_zone_of_sweden: bool,
}

/// An area polygon held by the spatial index
pub struct IndexedArea {
    pub area_type: AreaType,
    pub feature_id: String,
    pub name: String,
    pub geometry: Geometry<f64>,
    envelope: AABB<[f64; 2]>,
}

/// R-tree entry sharing the area payload with the by-key lookup map
#[derive(Clone)]
struct SpatialEntry(Arc<IndexedArea>);

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.0.envelope
    }
}

/// Immutable spatial index over all administrative-area polygons
pub struct AreaSpatialIndex {
    tree: RTree<SpatialEntry>,
    by_key: HashMap<(AreaType, String), Arc<IndexedArea>>,
}

impl AreaSpatialIndex {
    /// Areas whose polygon contains the point, by envelope query plus exact
    /// containment test
    pub fn areas_containing(&self, longitude: f64, latitude: f64) -> Vec<&IndexedArea> {
        let point = Point::new(longitude, latitude);
        let probe = AABB::from_point([longitude, latitude]);
        self.tree
            .locate_in_envelope_intersecting(&probe)
            .filter(|entry| entry.0.geometry.contains(&point))
            .map(|entry| entry.0.as_ref())
            .collect()
    }

    /// Direct lookup of an indexed area by type and feature id
    pub fn get(&self, area_type: AreaType, feature_id: &str) -> Option<&Arc<IndexedArea>> {
        self.by_key.get(&(area_type, feature_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Owner of the spatial index lifecycle and the position-resolution cache
pub struct AreaManager {
    config: SpatialConfig,
    area_repository: Arc<dyn AreaRepository>,
    index: parking_lot::RwLock<Option<Arc<AreaSpatialIndex>>>,
    init_semaphore: Semaphore,
    position_cache: DashMap<(i64, i64), Arc<PositionLocation>>,
    compute_lock: Mutex<()>,
}

impl AreaManager {
    pub fn new(config: SpatialConfig, area_repository: Arc<dyn AreaRepository>) -> Self {
        Self {
            config,
            area_repository,
            index: parking_lot::RwLock::new(None),
            init_semaphore: Semaphore::new(1),
            position_cache: DashMap::new(),
            compute_lock: Mutex::new(()),
        }
    }

    /// Build the spatial index if it does not exist yet.
    ///
    /// Idempotent: concurrent first-callers queue on a single-permit
    /// semaphore and re-check after acquisition, so the expensive bulk load
    /// runs at most once per index lifetime.
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_index().await.map(|_| ())
    }

    async fn ensure_index(&self) -> Result<Arc<AreaSpatialIndex>> {
        if let Some(index) = self.index.read().clone() {
            return Ok(index);
        }

        let _permit = self
            .init_semaphore
            .acquire()
            .await
            .map_err(|_| crate::internal_error!("area init semaphore closed"))?;

        if let Some(index) = self.index.read().clone() {
            return Ok(index);
        }

        let index = Arc::new(self.build_index().await?);
        *self.index.write() = Some(Arc::clone(&index));
        Ok(index)
    }

    async fn build_index(&self) -> Result<AreaSpatialIndex> {
        let timer = Timer::new("area_index_build");

        let documents = self
            .area_repository
            .get_areas(&AreaType::INDEXED)
            .await
            .map_err(|e| {
                tracing::error!("Area fetch failed during spatial index build: {}", e);
                e
            })?;

        let mut fetched: Vec<(AreaDocument, Geometry<f64>)> = Vec::with_capacity(documents.len());
        for doc in documents {
            match self
                .area_repository
                .get_geometry(doc.area_type, &doc.feature_id)
                .await?
            {
                Some(geometry) => fetched.push((doc, geometry)),
                None => {
                    return Err(SearchError::GeometryMissing {
                        area_type: doc.area_type.to_string(),
                        feature_id: doc.feature_id,
                    })
                }
            }
        }

        // Envelope computation is pure CPU work over potentially large
        // polygon sets; prepare entries in parallel.
        let entries: Vec<Arc<IndexedArea>> = fetched
            .into_par_iter()
            .filter_map(|(doc, geometry)| {
                let envelope = match geometry.bounding_rect() {
                    Some(rect) => AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    None => {
                        tracing::warn!(
                            "Skipping {} feature '{}' with empty geometry",
                            doc.area_type,
                            doc.feature_id
                        );
                        return None;
                    }
                };
                Some(Arc::new(IndexedArea {
                    area_type: doc.area_type,
                    feature_id: doc.feature_id,
                    name: doc.name,
                    geometry,
                    envelope,
                }))
            })
            .collect();

        let by_key: HashMap<(AreaType, String), Arc<IndexedArea>> = entries
            .iter()
            .map(|area| ((area.area_type, area.feature_id.clone()), Arc::clone(area)))
            .collect();

        // Bulk load once after all insertions; far cheaper to query than an
        // incrementally grown tree.
        let tree = RTree::bulk_load(entries.into_iter().map(SpatialEntry).collect());

        tracing::info!(
            "Built area spatial index with {} features in {}ms",
            by_key.len(),
            timer.elapsed_ms()
        );

        Ok(AreaSpatialIndex { tree, by_key })
    }

    /// Resolve all area features containing a point
    pub async fn point_features(&self, longitude: f64, latitude: f64) -> Result<Vec<AreaFeature>> {
        let index = self.ensure_index().await?;
        Ok(index
            .areas_containing(longitude, latitude)
            .into_iter()
            .map(area_feature)
            .collect())
    }

    /// Geometry of a single indexed area, for filter expansion
    pub async fn area_geometry(
        &self,
        area_type: AreaType,
        feature_id: &str,
    ) -> Result<Option<Geometry<f64>>> {
        let index = self.ensure_index().await?;
        Ok(index.get(area_type, feature_id).map(|a| a.geometry.clone()))
    }

    /// Resolve the position record for a coordinate, caching per rounded key.
    ///
    /// Cache hits are lock-free. Misses serialize on a single coarse lock
    /// with a re-check inside; two tasks racing on the same fresh key may
    /// both compute, and insert-or-skip keeps that race benign.
    pub async fn resolve_position(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> Result<Arc<PositionLocation>> {
        if !is_valid_coordinate(longitude, latitude) {
            return Err(SearchError::InvalidCoordinate {
                longitude,
                latitude,
            });
        }

        let precision = self.config.coordinate_precision;
        let key = (
            coordinate_key(longitude, precision),
            coordinate_key(latitude, precision),
        );

        if let Some(cached) = self.position_cache.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let index = self.ensure_index().await?;
        let _guard = self.compute_lock.lock().await;

        if let Some(cached) = self.position_cache.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let location = Arc::new(build_position_location(
            index.areas_containing(longitude, latitude),
        ));
        self.position_cache
            .entry(key)
            .or_insert_with(|| Arc::clone(&location));

        if self.position_cache.len() > self.config.position_cache_warn_entries {
            tracing::warn!(
                "Position cache holds {} entries, consider clearing",
                self.position_cache.len()
            );
        }

        Ok(location)
    }

    /// Fill a location record with resolved area data
    pub async fn add_area_data_to_location(&self, location: &mut Location) -> Result<()> {
        let position = self
            .resolve_position(location.longitude, location.latitude)
            .await?;
        location.county = position.county.clone();
        location.municipality = position.municipality.clone();
        location.parish = position.parish.clone();
        location.province = position.province.clone();
        location.economic_zone_of_sweden = position.economic_zone_of_sweden;
        Ok(())
    }

    /// Wipe the position cache and the spatial index together.
    ///
    /// The next spatial operation rebuilds the index from the repository.
    pub fn clear_cache(&self) {
        self.position_cache.clear();
        *self.index.write() = None;
        tracing::info!("Cleared position cache and spatial index");
    }

    /// Number of cached position entries
    pub fn cached_positions(&self) -> usize {
        self.position_cache.len()
    }
}

/// Coordinate sanity predicate applied before spatial resolution
pub fn is_valid_coordinate(longitude: f64, latitude: f64) -> bool {
    longitude.is_finite()
        && latitude.is_finite()
        && (-180.0..=180.0).contains(&longitude)
        && (-90.0..=90.0).contains(&latitude)
}

fn area_feature(area: &IndexedArea) -> AreaFeature {
    AreaFeature {
        area_type: area.area_type,
        feature_id: area.feature_id.clone(),
        name: area.name.clone(),
    }
}

/// Aggregate winning areas by type into a position record and apply the
/// domain regrouping rules. First hit per type wins.
fn build_position_location(areas: Vec<&IndexedArea>) -> PositionLocation {
    let mut location = PositionLocation::default();

    for area in areas {
        match area.area_type {
            AreaType::County => {
                if location.county.is_none() {
                    location.county = Some(area_feature(area));
                }
            }
            AreaType::Municipality => {
                if location.municipality.is_none() {
                    location.municipality = Some(area_feature(area));
                }
            }
            AreaType::Parish => {
                if location.parish.is_none() {
                    location.parish = Some(area_feature(area));
                }
            }
            AreaType::Province => {
                if location.province.is_none() {
                    location.province = Some(area_feature(area));
                }
            }
            AreaType::EconomicZoneOfSweden => location.economic_zone_of_sweden = true,
        }
    }

    location.county = location
        .county
        .map(|county| remap_county(county, location.province.as_ref()));
    location.province = location.province.map(remap_province);

    location
}

/// The five lappmark provinces are reported as one synthetic Lappland feature
fn remap_province(province: AreaFeature) -> AreaFeature {
    if LAPPLAND_PART_FEATURE_IDS.contains(&province.feature_id.as_str()) {
        AreaFeature {
            area_type: AreaType::Province,
            feature_id: LAPPLAND_FEATURE_ID.to_string(),
            name: LAPPLAND_NAME.to_string(),
        }
    } else {
        province
    }
}

/// Kalmar county is reported as Öland or Kalmar fastland depending on the
/// resolved province
fn remap_county(county: AreaFeature, province: Option<&AreaFeature>) -> AreaFeature {
    if county.feature_id != KALMAR_COUNTY_FEATURE_ID {
        return county;
    }

    let on_oland = province
        .map(|p| p.feature_id == OLAND_PROVINCE_FEATURE_ID)
        .unwrap_or(false);

    if on_oland {
        AreaFeature {
            area_type: AreaType::County,
            feature_id: OLAND_COUNTY_FEATURE_ID.to_string(),
            name: OLAND_COUNTY_NAME.to_string(),
        }
    } else {
        AreaFeature {
            area_type: AreaType::County,
            feature_id: KALMAR_FASTLAND_FEATURE_ID.to_string(),
            name: KALMAR_FASTLAND_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geo_types::{polygon, Geometry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Square polygon [min, max] on both axes
    fn square(min: f64, max: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
            (x: min, y: min),
        ])
    }

    struct FixtureAreaRepository {
        areas: Vec<(AreaDocument, Geometry<f64>)>,
        area_fetches: AtomicUsize,
    }

    impl FixtureAreaRepository {
        fn new(areas: Vec<(AreaDocument, Geometry<f64>)>) -> Self {
            Self {
                areas,
                area_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AreaRepository for FixtureAreaRepository {
        async fn get_areas(&self, types: &[AreaType]) -> Result<Vec<AreaDocument>> {
            self.area_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .areas
                .iter()
                .filter(|(doc, _)| types.contains(&doc.area_type))
                .map(|(doc, _)| doc.clone())
                .collect())
        }

        async fn get_geometry(
            &self,
            area_type: AreaType,
            feature_id: &str,
        ) -> Result<Option<Geometry<f64>>> {
            Ok(self
                .areas
                .iter()
                .find(|(doc, _)| doc.area_type == area_type && doc.feature_id == feature_id)
                .map(|(_, geometry)| geometry.clone()))
        }
    }

    fn doc(area_type: AreaType, feature_id: &str, name: &str) -> AreaDocument {
        AreaDocument {
            area_type,
            feature_id: feature_id.to_string(),
            name: name.to_string(),
        }
    }

    fn fixture_manager() -> (Arc<AreaManager>, Arc<FixtureAreaRepository>) {
        let repo = Arc::new(FixtureAreaRepository::new(vec![
            (doc(AreaType::County, "1", "Stockholm"), square(0.0, 10.0)),
            (
                doc(AreaType::Municipality, "180", "Stockholms kommun"),
                square(0.0, 5.0),
            ),
            (doc(AreaType::Parish, "9", "Bromma"), square(0.0, 2.0)),
            (doc(AreaType::Province, "12", "Uppland"), square(0.0, 10.0)),
            (
                doc(AreaType::EconomicZoneOfSweden, "ez", "Economic zone"),
                square(-20.0, 20.0),
            ),
        ]));
        let manager = Arc::new(AreaManager::new(
            crate::config::Config::default().spatial,
            repo.clone(),
        ));
        (manager, repo)
    }

    #[tokio::test]
    async fn test_concurrent_initialization_builds_once() {
        let (manager, repo) = fixture_manager();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.initialize().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.area_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_position_aggregates_by_type() {
        let (manager, _) = fixture_manager();

        let position = manager.resolve_position(1.0, 1.0).await.unwrap();
        assert_eq!(position.county.as_ref().unwrap().name, "Stockholm");
        assert_eq!(
            position.municipality.as_ref().unwrap().name,
            "Stockholms kommun"
        );
        assert_eq!(position.parish.as_ref().unwrap().name, "Bromma");
        assert_eq!(position.province.as_ref().unwrap().name, "Uppland");
        assert!(position.economic_zone_of_sweden);
    }

    #[tokio::test]
    async fn test_position_cache_determinism() {
        let (manager, _) = fixture_manager();

        let first = manager.resolve_position(1.000_001, 1.000_001).await.unwrap();
        let second = manager.resolve_position(1.000_004, 1.000_004).await.unwrap();
        // Same 5-decimal key resolves to identical contents.
        assert_eq!(*first, *second);
        assert_eq!(manager.cached_positions(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_then_miss_returns_empty_location() {
        let (manager, _) = fixture_manager();

        manager.resolve_position(1.0, 1.0).await.unwrap();
        manager.clear_cache();
        assert_eq!(manager.cached_positions(), 0);

        // Point outside every indexed polygon: empty record, zone flag false.
        let position = manager.resolve_position(50.0, 50.0).await.unwrap();
        assert_eq!(*position, PositionLocation::default());
        assert!(!position.economic_zone_of_sweden);
    }

    #[tokio::test]
    async fn test_invalid_coordinate_is_rejected() {
        let (manager, _) = fixture_manager();
        let err = manager.resolve_position(999.0, 1.0).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidCoordinate { .. }));
    }

    #[tokio::test]
    async fn test_add_area_data_to_location() {
        let (manager, _) = fixture_manager();

        let mut location = Location {
            longitude: 1.0,
            latitude: 1.0,
            ..Location::default()
        };
        manager.add_area_data_to_location(&mut location).await.unwrap();
        assert_eq!(location.county.unwrap().name, "Stockholm");
        assert!(location.economic_zone_of_sweden);
    }

    #[tokio::test]
    async fn test_lappland_province_regrouping() {
        let repo = Arc::new(FixtureAreaRepository::new(vec![(
            doc(AreaType::Province, "26", "Lule lappmark"),
            square(0.0, 10.0),
        )]));
        let manager = AreaManager::new(crate::config::Config::default().spatial, repo);

        let position = manager.resolve_position(5.0, 5.0).await.unwrap();
        let province = position.province.as_ref().unwrap();
        assert_eq!(province.feature_id, LAPPLAND_FEATURE_ID);
        assert_eq!(province.name, LAPPLAND_NAME);
    }

    #[tokio::test]
    async fn test_kalmar_county_split() {
        let repo = Arc::new(FixtureAreaRepository::new(vec![
            (doc(AreaType::County, "8", "Kalmar"), square(0.0, 20.0)),
            (doc(AreaType::Province, "3", "Öland"), square(0.0, 10.0)),
            (doc(AreaType::Province, "5", "Småland"), square(10.0, 20.0)),
        ]));
        let manager = AreaManager::new(crate::config::Config::default().spatial, repo);

        let on_oland = manager.resolve_position(5.0, 5.0).await.unwrap();
        assert_eq!(on_oland.county.as_ref().unwrap().name, OLAND_COUNTY_NAME);

        let on_mainland = manager.resolve_position(15.0, 15.0).await.unwrap();
        assert_eq!(
            on_mainland.county.as_ref().unwrap().name,
            KALMAR_FASTLAND_NAME
        );
    }

    #[tokio::test]
    async fn test_point_features_exact_containment() {
        let (manager, _) = fixture_manager();

        // Inside the county envelope but outside the municipality polygon.
        let features = manager.point_features(8.0, 8.0).await.unwrap();
        let types: Vec<AreaType> = features.iter().map(|f| f.area_type).collect();
        assert!(types.contains(&AreaType::County));
        assert!(!types.contains(&AreaType::Municipality));
    }
}

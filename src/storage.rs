//! # Storage Management Module
//!
//! ## Purpose
//! Embedded document store for taxon, taxon-list and area documents plus
//! area polygon geometries, implementing the repository contracts consumed
//! by the platform core. Serves as the local stand-in for the upstream
//! document database.
//!
//! ## Input/Output Specification
//! - **Input**: Taxon/area snapshot documents, polygon geometries
//! - **Output**: Bulk reads for cache construction, per-feature geometry reads
//! - **Storage**: Sled embedded database, bincode-encoded documents
//!
//! ## Key Features
//! - Separate trees per document kind
//! - Bulk snapshot reads without paging
//! - Snapshot timestamp tracking for operational visibility

use crate::config::StorageConfig;
use crate::errors::Result;
use crate::repository::{
    AreaDocument, AreaRepository, TaxonDocument, TaxonListDocument, TaxonListRepository,
    TaxonRepository,
};
use crate::AreaType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const META_SNAPSHOT_KEY: &[u8] = b"snapshot_updated_at";

/// Embedded document store backing the repository contracts
pub struct DocumentStore {
    db: Arc<sled::Db>,
    taxa_tree: sled::Tree,
    taxon_lists_tree: sled::Tree,
    areas_tree: sled::Tree,
    geometries_tree: sled::Tree,
    meta_tree: sled::Tree,
}

/// Storage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub taxa: usize,
    pub taxon_lists: usize,
    pub areas: usize,
    pub snapshot_updated_at: Option<DateTime<Utc>>,
}

impl DocumentStore {
    /// Open (or create) the document store at the configured path
    pub async fn new(config: StorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::Config::new()
            .path(&config.db_path)
            .use_compression(config.enable_compression)
            .open()?;

        let taxa_tree = db.open_tree("taxa")?;
        let taxon_lists_tree = db.open_tree("taxon_lists")?;
        let areas_tree = db.open_tree("areas")?;
        let geometries_tree = db.open_tree("geometries")?;
        let meta_tree = db.open_tree("meta")?;

        let store = Self {
            db: Arc::new(db),
            taxa_tree,
            taxon_lists_tree,
            areas_tree,
            geometries_tree,
            meta_tree,
        };

        tracing::info!(
            "Document store opened with {} taxa, {} areas",
            store.taxa_tree.len(),
            store.areas_tree.len()
        );

        Ok(store)
    }

    /// Replace the stored taxon snapshot
    pub fn put_taxa(&self, documents: &[TaxonDocument]) -> Result<()> {
        for doc in documents {
            self.taxa_tree
                .insert(doc.id.to_be_bytes(), bincode::serialize(doc)?)?;
        }
        self.touch_snapshot()?;
        tracing::debug!("Stored {} taxon documents", documents.len());
        Ok(())
    }

    /// Replace the stored taxon-list snapshot
    pub fn put_taxon_lists(&self, documents: &[TaxonListDocument]) -> Result<()> {
        for doc in documents {
            self.taxon_lists_tree
                .insert(doc.id.to_be_bytes(), bincode::serialize(doc)?)?;
        }
        self.touch_snapshot()?;
        Ok(())
    }

    /// Store an area document together with its polygon geometry
    pub fn put_area(&self, document: &AreaDocument, geometry: &geo_types::Geometry<f64>) -> Result<()> {
        let key = area_key(document.area_type, &document.feature_id);
        self.areas_tree
            .insert(key.as_bytes(), bincode::serialize(document)?)?;
        self.geometries_tree
            .insert(key.as_bytes(), bincode::serialize(geometry)?)?;
        self.touch_snapshot()?;
        Ok(())
    }

    /// Current storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let snapshot_updated_at = match self.meta_tree.get(META_SNAPSHOT_KEY)? {
            Some(bytes) => Some(bincode::deserialize(&bytes)?),
            None => None,
        };
        Ok(StorageStats {
            taxa: self.taxa_tree.len(),
            taxon_lists: self.taxon_lists_tree.len(),
            areas: self.areas_tree.len(),
            snapshot_updated_at,
        })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn touch_snapshot(&self) -> Result<()> {
        self.meta_tree
            .insert(META_SNAPSHOT_KEY, bincode::serialize(&Utc::now())?)?;
        Ok(())
    }
}

fn area_key(area_type: AreaType, feature_id: &str) -> String {
    format!("{}/{}", area_type, feature_id)
}

#[async_trait]
impl TaxonRepository for DocumentStore {
    async fn get_all(&self) -> Result<Vec<TaxonDocument>> {
        let mut documents = Vec::with_capacity(self.taxa_tree.len());
        for entry in self.taxa_tree.iter() {
            let (_, value) = entry?;
            documents.push(bincode::deserialize(&value)?);
        }
        Ok(documents)
    }
}

#[async_trait]
impl TaxonListRepository for DocumentStore {
    async fn get_all(&self) -> Result<Vec<TaxonListDocument>> {
        let mut documents = Vec::with_capacity(self.taxon_lists_tree.len());
        for entry in self.taxon_lists_tree.iter() {
            let (_, value) = entry?;
            documents.push(bincode::deserialize(&value)?);
        }
        Ok(documents)
    }
}

#[async_trait]
impl AreaRepository for DocumentStore {
    async fn get_areas(&self, types: &[AreaType]) -> Result<Vec<AreaDocument>> {
        let mut documents = Vec::new();
        for entry in self.areas_tree.iter() {
            let (_, value) = entry?;
            let document: AreaDocument = bincode::deserialize(&value)?;
            if types.contains(&document.area_type) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    async fn get_geometry(
        &self,
        area_type: AreaType,
        feature_id: &str,
    ) -> Result<Option<geo_types::Geometry<f64>>> {
        let key = area_key(area_type, feature_id);
        match self.geometries_tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::TaxonAttributes;
    use geo_types::polygon;

    async fn temp_store() -> (DocumentStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            db_path: dir.path().join("store.db"),
            enable_compression: false,
        };
        (DocumentStore::new(config).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_taxa_round_trip() {
        let (store, _dir) = temp_store().await;
        let documents = vec![TaxonDocument {
            id: 1,
            scientific_name: "Parus major".to_string(),
            parent_id: Some(0),
            secondary_parent_ids: vec![],
            attributes: TaxonAttributes {
                vernacular_name: Some("Great tit".to_string()),
                taxon_category_id: Some(17),
                authorship: None,
            },
        }];
        store.put_taxa(&documents).unwrap();

        let fetched = TaxonRepository::get_all(&store).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].scientific_name, "Parus major");
        assert_eq!(fetched[0].attributes.taxon_category_id, Some(17));
    }

    #[tokio::test]
    async fn test_area_and_geometry_round_trip() {
        let (store, _dir) = temp_store().await;
        let document = AreaDocument {
            area_type: AreaType::County,
            feature_id: "1".to_string(),
            name: "Stockholm".to_string(),
        };
        let geometry = geo_types::Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        store.put_area(&document, &geometry).unwrap();

        let areas = store.get_areas(&[AreaType::County]).await.unwrap();
        assert_eq!(areas.len(), 1);

        let fetched = store.get_geometry(AreaType::County, "1").await.unwrap();
        assert_eq!(fetched, Some(geometry));

        let missing = store.get_geometry(AreaType::Parish, "1").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_stats_track_snapshot_updates() {
        let (store, _dir) = temp_store().await;
        assert!(store.stats().unwrap().snapshot_updated_at.is_none());

        store
            .put_taxon_lists(&[TaxonListDocument {
                id: 1,
                name: "Red list".to_string(),
                taxon_ids: vec![1, 2],
            }])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.taxon_lists, 1);
        assert!(stats.snapshot_updated_at.is_some());
    }
}

//! # Taxonomy Module
//!
//! ## Purpose
//! Orchestrates taxon tree construction and refresh on top of the expiring
//! value cache, and derives taxon-list membership sets per tree generation.
//!
//! ## Input/Output Specification
//! - **Input**: Taxon and taxon-list snapshots from the repositories
//! - **Output**: Shared immutable tree and list-set generations
//! - **Lifecycle**: cold build on first use, background refresh before expiry
//!
//! ## Key Features
//! - Double-checked-locking build sections bounding concurrent rebuild work
//!   to exactly one in-flight build regardless of request concurrency
//! - Separate mutex and cache slot for list sets, so a list rebuild never
//!   blocks plain tree reads
//! - Background refresh task per cache slot that swallows failures and
//!   keeps the stale generation in place
//!
//! ## Usage
//! ```rust,ignore
//! let manager = Arc::new(TaxonManager::new(cache_config, taxa, lists));
//! manager.start_background_refresh();
//! let tree = manager.get_taxon_tree().await?;
//! ```

pub mod lists;
pub mod tree;

pub use lists::{TaxonListSet, TaxonListSetMap};
pub use tree::{TaxonAttributes, TaxonNode, TaxonTree};

use crate::cache::ExpiringValueCache;
use crate::config::CacheConfig;
use crate::errors::Result;
use crate::repository::{TaxonListRepository, TaxonRepository};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Owner of the taxon tree and taxon-list-set cache lifecycles
pub struct TaxonManager {
    tree_cache: Arc<ExpiringValueCache<TaxonTree>>,
    list_cache: Arc<ExpiringValueCache<TaxonListSetMap>>,
    tree_build_lock: Mutex<()>,
    list_build_lock: Mutex<()>,
    taxon_repository: Arc<dyn TaxonRepository>,
    taxon_list_repository: Arc<dyn TaxonListRepository>,
}

impl TaxonManager {
    pub fn new(
        config: CacheConfig,
        taxon_repository: Arc<dyn TaxonRepository>,
        taxon_list_repository: Arc<dyn TaxonListRepository>,
    ) -> Self {
        Self {
            tree_cache: Arc::new(ExpiringValueCache::new(
                "taxon_tree",
                config.taxon_tree_ttl(),
                config.refresh_margin(),
            )),
            list_cache: Arc::new(ExpiringValueCache::new(
                "taxon_list_sets",
                config.taxon_list_ttl(),
                config.refresh_margin(),
            )),
            tree_build_lock: Mutex::new(()),
            list_build_lock: Mutex::new(()),
            taxon_repository,
            taxon_list_repository,
        }
    }

    /// Get the current taxon tree, building it on first use.
    ///
    /// Fast path is a lock-free cache read. On a miss the caller enters the
    /// build mutex, re-checks the cache (another task may have just finished
    /// building) and only then fetches and builds. Exactly one fetch-and-build
    /// is in flight at any time; waiters block on the mutex and then observe
    /// the finished tree.
    pub async fn get_taxon_tree(&self) -> Result<Arc<TaxonTree>> {
        if let Some(tree) = self.tree_cache.get() {
            return Ok(tree);
        }

        let _guard = self.tree_build_lock.lock().await;

        if let Some(tree) = self.tree_cache.get() {
            return Ok(tree);
        }

        let tree = Arc::new(self.build_tree().await?);
        self.tree_cache.set(Arc::clone(&tree));
        Ok(tree)
    }

    /// Get the current taxon-list membership sets, building on first use.
    ///
    /// Same double-checked-locking shape as [`Self::get_taxon_tree`], with
    /// its own mutex and cache slot. The build awaits the tree through the
    /// public path, so it transparently reuses (or triggers) the tree build.
    pub async fn get_taxon_list_sets(&self) -> Result<Arc<TaxonListSetMap>> {
        if let Some(sets) = self.list_cache.get() {
            return Ok(sets);
        }

        let _guard = self.list_build_lock.lock().await;

        if let Some(sets) = self.list_cache.get() {
            return Ok(sets);
        }

        let sets = Arc::new(self.build_list_sets().await?);
        self.list_cache.set(Arc::clone(&sets));
        Ok(sets)
    }

    /// Spawn the background refresh tasks for both cache slots.
    ///
    /// Each refresh rebuilds directly and installs the result via `set`, so
    /// request threads keep hitting a warm value across generation swaps.
    pub fn start_background_refresh(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        self.tree_cache.spawn_refresher(move || {
            let manager = Arc::clone(&manager);
            async move { manager.build_tree().await.map(Arc::new) }
        });

        let manager = Arc::clone(self);
        self.list_cache.spawn_refresher(move || {
            let manager = Arc::clone(&manager);
            async move { manager.build_list_sets().await.map(Arc::new) }
        });
    }

    async fn build_tree(&self) -> Result<TaxonTree> {
        let documents = self.taxon_repository.get_all().await.map_err(|e| {
            tracing::error!("Taxon snapshot fetch failed during tree build: {}", e);
            e
        })?;
        Ok(TaxonTree::from_documents(documents))
    }

    async fn build_list_sets(&self) -> Result<TaxonListSetMap> {
        let lists = self.taxon_list_repository.get_all().await.map_err(|e| {
            tracing::error!("Taxon list fetch failed during list-set build: {}", e);
            e
        })?;
        let tree = self.get_taxon_tree().await?;
        Ok(TaxonListSetMap::build(&lists, &tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SearchError;
    use crate::repository::{TaxonDocument, TaxonListDocument};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTaxonRepository {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl crate::repository::TaxonRepository for CountingTaxonRepository {
        async fn get_all(&self) -> Result<Vec<TaxonDocument>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SearchError::TaxonFetchFailed {
                    details: "storage unreachable".to_string(),
                });
            }
            // Slow fetch widens the race window for the single-build test.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![
                doc(0, None),
                doc(1, Some(0)),
                doc(2, Some(1)),
                doc(3, Some(2)),
            ])
        }
    }

    struct StaticListRepository;

    #[async_trait]
    impl crate::repository::TaxonListRepository for StaticListRepository {
        async fn get_all(&self) -> Result<Vec<TaxonListDocument>> {
            Ok(vec![TaxonListDocument {
                id: 7,
                name: "Protected birds".to_string(),
                taxon_ids: vec![1],
            }])
        }
    }

    fn doc(id: crate::TaxonId, parent: Option<crate::TaxonId>) -> TaxonDocument {
        TaxonDocument {
            id,
            scientific_name: format!("Taxon {}", id),
            parent_id: parent,
            secondary_parent_ids: vec![],
            attributes: TaxonAttributes::default(),
        }
    }

    fn manager(fail: bool) -> (Arc<TaxonManager>, Arc<CountingTaxonRepository>) {
        let repo = Arc::new(CountingTaxonRepository {
            fetches: AtomicUsize::new(0),
            fail,
        });
        let manager = Arc::new(TaxonManager::new(
            crate::config::Config::default().cache,
            repo.clone(),
            Arc::new(StaticListRepository),
        ));
        (manager, repo)
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_trigger_single_build() {
        let (manager, repo) = manager(false);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(
                async move { manager.get_taxon_tree().await },
            ));
        }

        for handle in handles {
            let tree = handle.await.unwrap().unwrap();
            assert_eq!(tree.len(), 4, "every caller sees the full snapshot");
        }

        assert_eq!(
            repo.fetches.load(Ordering::SeqCst),
            1,
            "exactly one fetch-and-build under concurrency"
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates_and_next_call_retries() {
        let (manager, repo) = manager(true);

        let err = manager.get_taxon_tree().await.unwrap_err();
        assert!(matches!(err, SearchError::TaxonFetchFailed { .. }));

        // No degraded tree was cached; the next caller rebuilds.
        let _ = manager.get_taxon_tree().await.unwrap_err();
        assert_eq!(repo.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_list_sets_reuse_tree_cache() {
        let (manager, repo) = manager(false);

        let sets = manager.get_taxon_list_sets().await.unwrap();
        let set = sets.get(7).unwrap();
        assert!(set.with_underlying.contains(&3));

        // The list build already populated the tree cache.
        let _tree = manager.get_taxon_tree().await.unwrap();
        assert_eq!(repo.fetches.load(Ordering::SeqCst), 1);
    }
}

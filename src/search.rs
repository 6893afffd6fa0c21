//! # Search Service Module
//!
//! ## Purpose
//! Facade combining filter resolution, admission control and the external
//! aggregation backend: resolves the caller's filter, acquires the relevant
//! admission semaphore with a bounded timeout, and drives the cursor-paged
//! execution loop.
//!
//! ## Input/Output Specification
//! - **Input**: Raw search filters, caller user type
//! - **Output**: Collected result pages with paging metadata
//! - **Admission**: Timeout surfaces as a distinct failure, never as an
//!   empty result set

use crate::config::SearchConfig;
use crate::errors::Result;
use crate::filter::{FilterManager, ResolvedSearchFilter, SearchFilter};
use crate::limits::SemaphoreLimitManager;
use crate::repository::AggregationBackend;
use crate::UserType;
use std::sync::Arc;
use std::time::Duration;

/// Result of a paged search or aggregation run
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub records: Vec<serde_json::Value>,
    pub pages_fetched: usize,
    /// True when the page budget stopped the loop before exhaustion
    pub truncated: bool,
}

/// Admission-gated, filter-resolved search driver
pub struct ObservationSearchService {
    config: SearchConfig,
    filter_manager: Arc<FilterManager>,
    limits: Arc<SemaphoreLimitManager>,
    backend: Arc<dyn AggregationBackend>,
}

impl ObservationSearchService {
    pub fn new(
        config: SearchConfig,
        filter_manager: Arc<FilterManager>,
        limits: Arc<SemaphoreLimitManager>,
        backend: Arc<dyn AggregationBackend>,
    ) -> Self {
        Self {
            config,
            filter_manager,
            limits,
            backend,
        }
    }

    /// Run an observation search for the caller.
    ///
    /// Holds an observation permit for the whole paging loop; the permit is
    /// released when the loop finishes or fails.
    pub async fn search(&self, user_type: UserType, filter: &SearchFilter) -> Result<SearchOutcome> {
        let semaphore = self.limits.observation_semaphore(user_type);
        let _permit = self.limits.acquire_with_timeout(semaphore, user_type).await?;

        let resolved = self.filter_manager.resolve(filter).await?;
        self.drive_paging(&resolved).await
    }

    /// Run an expensive aggregation for the caller, gated by the stricter
    /// aggregation semaphore
    pub async fn aggregate(
        &self,
        user_type: UserType,
        filter: &SearchFilter,
    ) -> Result<SearchOutcome> {
        let semaphore = self.limits.aggregation_semaphore(user_type);
        let _permit = self.limits.acquire_with_timeout(semaphore, user_type).await?;

        let resolved = self.filter_manager.resolve(filter).await?;
        self.drive_paging(&resolved).await
    }

    async fn drive_paging(&self, resolved: &ResolvedSearchFilter) -> Result<SearchOutcome> {
        let timeout = Duration::from_secs(self.config.aggregation_timeout_seconds);
        let mut records = Vec::new();
        let mut after_key: Option<serde_json::Value> = None;
        let mut pages_fetched = 0usize;
        let mut truncated = false;

        loop {
            if pages_fetched >= self.config.max_pages {
                tracing::warn!(
                    "Paging loop stopped at the {}-page budget",
                    self.config.max_pages
                );
                truncated = true;
                break;
            }

            let page = self
                .backend
                .execute(
                    resolved,
                    self.config.default_page_size,
                    after_key.take(),
                    timeout,
                )
                .await?;
            pages_fetched += 1;
            records.extend(page.records);

            match page.after_key {
                Some(key) => after_key = Some(key),
                None => break,
            }
        }

        tracing::debug!(
            "Paging loop collected {} records over {} pages",
            records.len(),
            pages_fetched
        );

        Ok(SearchOutcome {
            records,
            pages_fetched,
            truncated,
        })
    }
}

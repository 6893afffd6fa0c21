//! # Filter Resolution Module
//!
//! ## Purpose
//! Resolves a user-supplied search filter (taxon ids/lists/categories,
//! geographic areas, authorization-scoped restrictions) into a fully
//! expanded, backend-ready filter.
//!
//! ## Input/Output Specification
//! - **Input**: Immutable `SearchFilter` values from untrusted end users
//! - **Output**: A new `ResolvedSearchFilter`; inputs are never mutated
//! - **Conventions**: `None` taxon ids mean "no restriction"; the `[-1]`
//!   sentinel means "provably no taxa" and forces zero matches
//!
//! ## Key Features
//! - Underlying-taxa expansion with the Biota-as-unrestricted optimization
//! - Taxon-list membership combined by merge or filter operators
//! - Taxon-category filtering with materialization of the unrestricted set
//! - Geographic area expansion into geometries and per-type feature-id lists
//! - Extended-authorization resolution with protection-level floors
//!
//! Unknown taxon ids, list ids and area references are skipped rather than
//! rejected; filter inputs come from end users and missing lookups resolve
//! as "no contribution".

use crate::errors::Result;
use crate::geography::AreaManager;
use crate::taxonomy::TaxonManager;
use crate::{AreaType, TaxonId, BIOTA_TAXON_ID, NO_MATCH_TAXON_ID};
use geo_types::Geometry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How taxon-list membership combines with explicitly selected taxa
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaxonListOperator {
    /// Union of selected taxa and list members
    #[default]
    Merge,
    /// Intersection of selected taxa and list members
    Filter,
}

/// Taxonomic criteria of a search filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonFilter {
    pub ids: Vec<TaxonId>,
    /// Expand each id to itself plus all descendants
    pub include_underlying: bool,
    pub list_ids: Vec<i32>,
    pub list_operator: TaxonListOperator,
    pub category_ids: Vec<i32>,
    /// Represent "Biota with underlying" as no restriction instead of
    /// materializing every taxon id
    pub biota_as_unrestricted: bool,
}

/// Reference to an administrative area by type and feature id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaRef {
    pub area_type: AreaType,
    pub feature_id: String,
}

/// Geographic criteria of a search filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeographicsFilter {
    pub areas: Vec<AreaRef>,
    /// Caller-supplied raw geometries, passed through to the backend
    pub geometries: Vec<Geometry<f64>>,
}

/// Role-scoped access grant extending what the user may query beyond
/// public data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedAuthorization {
    pub identifier: String,
    pub areas: Vec<AreaRef>,
    pub taxon_ids: Vec<TaxonId>,
    /// Highest protection level this grant unlocks
    pub max_protection_level: i32,
}

/// A raw, request-scoped search filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub taxon: Option<TaxonFilter>,
    pub geographics: Option<GeographicsFilter>,
    pub extended_authorizations: Vec<ExtendedAuthorization>,
}

/// Geographic criteria after expansion
#[derive(Debug, Clone, Default)]
pub struct ResolvedGeographics {
    pub geometries: Vec<Geometry<f64>>,
    pub feature_ids_by_type: HashMap<AreaType, Vec<String>>,
}

/// An authorization grant after expansion
#[derive(Debug, Clone)]
pub struct ResolvedAuthorization {
    pub identifier: String,
    pub taxon_ids: Option<Vec<TaxonId>>,
    pub geographics: ResolvedGeographics,
    pub max_protection_level: i32,
}

/// A fully expanded, backend-ready filter
#[derive(Debug, Clone, Default)]
pub struct ResolvedSearchFilter {
    /// `None` means no taxonomic restriction; `[-1]` matches nothing
    pub taxon_ids: Option<Vec<TaxonId>>,
    pub geographics: Option<ResolvedGeographics>,
    pub extended_authorizations: Vec<ResolvedAuthorization>,
}

/// Resolves raw search filters against the taxonomy and area caches
pub struct FilterManager {
    taxon_manager: Arc<TaxonManager>,
    area_manager: Arc<AreaManager>,
}

impl FilterManager {
    pub fn new(taxon_manager: Arc<TaxonManager>, area_manager: Arc<AreaManager>) -> Self {
        Self {
            taxon_manager,
            area_manager,
        }
    }

    /// Resolve a raw filter into a new, fully expanded filter value.
    ///
    /// The input is never mutated; callers may reuse it across retries or
    /// parallel sub-queries.
    pub async fn resolve(&self, filter: &SearchFilter) -> Result<ResolvedSearchFilter> {
        let taxon_ids = match &filter.taxon {
            Some(taxon) => self.resolve_taxon_ids(taxon).await?,
            None => None,
        };

        let geographics = match &filter.geographics {
            Some(g) if !g.areas.is_empty() || !g.geometries.is_empty() => {
                Some(self.resolve_geographics(g).await?)
            }
            _ => None,
        };

        // Authorization blocks are independent; resolve them concurrently.
        let extended_authorizations = futures::future::try_join_all(
            filter
                .extended_authorizations
                .iter()
                .map(|auth| self.resolve_authorization(auth)),
        )
        .await?;

        Ok(ResolvedSearchFilter {
            taxon_ids,
            geographics,
            extended_authorizations,
        })
    }

    /// Resolve taxonomic criteria into an explicit id set.
    ///
    /// Returns `None` for "no restriction" and `[-1]` when the criteria
    /// provably exclude every taxon. Resolution order: underlying expansion,
    /// list combination, category filtering, final dedup.
    pub async fn resolve_taxon_ids(&self, filter: &TaxonFilter) -> Result<Option<Vec<TaxonId>>> {
        let tree = self.taxon_manager.get_taxon_tree().await?;

        // None = unrestricted; Some = restricted, possibly empty. Empty
        // degrades to the no-match sentinel only at the very end.
        let mut current: Option<Vec<TaxonId>> = None;

        // Step 1: underlying expansion.
        if !filter.ids.is_empty() {
            if filter.include_underlying {
                if filter.ids.contains(&BIOTA_TAXON_ID) {
                    current = if filter.biota_as_unrestricted {
                        None
                    } else {
                        Some(tree.all_underlying_biota_ids())
                    };
                } else {
                    current = Some(tree.underlying_taxon_ids(filter.ids.iter().copied(), true));
                }
            } else {
                let known: Vec<TaxonId> = filter
                    .ids
                    .iter()
                    .copied()
                    .filter(|id| {
                        let known = tree.contains(*id);
                        if !known {
                            tracing::debug!("Unknown taxon id {} in filter, skipping", id);
                        }
                        known
                    })
                    .collect();
                current = Some(known);
            }
        }

        // Step 2: taxon-list combination.
        if !filter.list_ids.is_empty() {
            let sets = self.taxon_manager.get_taxon_list_sets().await?;
            let mut list_members: HashSet<TaxonId> = HashSet::new();
            for list_id in &filter.list_ids {
                match sets.get(*list_id) {
                    Some(set) => {
                        if filter.include_underlying {
                            list_members.extend(&set.with_underlying);
                        } else {
                            list_members.extend(&set.taxa);
                        }
                    }
                    None => tracing::debug!("Unknown taxon list id {}, skipping", list_id),
                }
            }

            current = match current {
                None => Some(list_members.into_iter().collect()),
                Some(ids) => match filter.list_operator {
                    TaxonListOperator::Merge => {
                        let mut merged: HashSet<TaxonId> = ids.into_iter().collect();
                        merged.extend(list_members);
                        Some(merged.into_iter().collect())
                    }
                    TaxonListOperator::Filter => {
                        Some(ids.into_iter().filter(|id| list_members.contains(id)).collect())
                    }
                },
            };
        }

        // Step 3: taxon-category filtering. Categories cannot be applied to
        // an implicit unrestricted set, so materialize all taxa under Biota
        // first when nothing narrowed the selection yet.
        if !filter.category_ids.is_empty() {
            let categories: HashSet<i32> = filter.category_ids.iter().copied().collect();
            let candidates = match current {
                Some(ids) => ids,
                None => tree.all_underlying_biota_ids(),
            };
            let filtered: Vec<TaxonId> = candidates
                .into_iter()
                .filter(|id| match tree.get(*id) {
                    Some(node) => match node.attributes.taxon_category_id {
                        Some(category) => categories.contains(&category),
                        None => true,
                    },
                    None => false,
                })
                .collect();
            current = Some(filtered);
        }

        // Step 4: dedup, or degrade an empty restricted set to the sentinel.
        Ok(match current {
            None => None,
            Some(ids) if ids.is_empty() => Some(vec![NO_MATCH_TAXON_ID]),
            Some(mut ids) => {
                ids.sort_unstable();
                ids.dedup();
                Some(ids)
            }
        })
    }

    async fn resolve_geographics(&self, filter: &GeographicsFilter) -> Result<ResolvedGeographics> {
        let mut resolved = ResolvedGeographics {
            geometries: filter.geometries.clone(),
            feature_ids_by_type: HashMap::new(),
        };

        for area in &filter.areas {
            match self
                .area_manager
                .area_geometry(area.area_type, &area.feature_id)
                .await?
            {
                Some(geometry) => {
                    resolved.geometries.push(geometry);
                    resolved
                        .feature_ids_by_type
                        .entry(area.area_type)
                        .or_default()
                        .push(area.feature_id.clone());
                }
                None => tracing::debug!(
                    "Unknown area {} '{}' in filter, skipping",
                    area.area_type,
                    area.feature_id
                ),
            }
        }

        Ok(resolved)
    }

    async fn resolve_authorization(
        &self,
        auth: &ExtendedAuthorization,
    ) -> Result<ResolvedAuthorization> {
        let taxon_ids = if auth.taxon_ids.is_empty() {
            None
        } else {
            self.resolve_taxon_ids(&TaxonFilter {
                ids: auth.taxon_ids.clone(),
                include_underlying: true,
                biota_as_unrestricted: true,
                ..TaxonFilter::default()
            })
            .await?
        };

        let geographics = self
            .resolve_geographics(&GeographicsFilter {
                areas: auth.areas.clone(),
                geometries: Vec::new(),
            })
            .await?;

        Ok(ResolvedAuthorization {
            identifier: auth.identifier.clone(),
            taxon_ids,
            geographics,
            max_protection_level: auth.max_protection_level,
        })
    }
}

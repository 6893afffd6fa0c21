//! # Taxon List Sets Module
//!
//! ## Purpose
//! Precomputed membership sets for configured taxon lists: the exact members
//! and the members expanded with all underlying taxa. Derived from a tree
//! generation and recomputed whenever the tree is rebuilt.

use crate::repository::TaxonListDocument;
use crate::taxonomy::TaxonTree;
use crate::TaxonId;
use std::collections::{HashMap, HashSet};

/// Membership sets for a single taxon list
#[derive(Debug, Clone)]
pub struct TaxonListSet {
    pub list_id: i32,
    pub name: String,
    /// Exact list members present in the current tree
    pub taxa: HashSet<TaxonId>,
    /// Members plus all their descendants
    pub with_underlying: HashSet<TaxonId>,
}

/// All list sets for one tree generation, keyed by list id
#[derive(Debug, Default)]
pub struct TaxonListSetMap {
    sets: HashMap<i32, TaxonListSet>,
}

impl TaxonListSetMap {
    /// Compute membership sets for every configured list against a tree
    /// snapshot. List members unknown to the tree contribute nothing.
    pub fn build(lists: &[TaxonListDocument], tree: &TaxonTree) -> Self {
        let mut sets = HashMap::with_capacity(lists.len());

        for list in lists {
            let taxa: HashSet<TaxonId> = list
                .taxon_ids
                .iter()
                .copied()
                .filter(|id| {
                    let known = tree.contains(*id);
                    if !known {
                        tracing::debug!(
                            "Taxon list {} member {} missing from tree, skipping",
                            list.id,
                            id
                        );
                    }
                    known
                })
                .collect();

            let with_underlying: HashSet<TaxonId> = tree
                .underlying_taxon_ids(taxa.iter().copied(), true)
                .into_iter()
                .collect();

            sets.insert(
                list.id,
                TaxonListSet {
                    list_id: list.id,
                    name: list.name.clone(),
                    taxa,
                    with_underlying,
                },
            );
        }

        Self { sets }
    }

    pub fn get(&self, list_id: i32) -> Option<&TaxonListSet> {
        self.sets.get(&list_id)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::TaxonDocument;
    use crate::taxonomy::TaxonAttributes;

    fn doc(id: TaxonId, parent: Option<TaxonId>) -> TaxonDocument {
        TaxonDocument {
            id,
            scientific_name: format!("Taxon {}", id),
            parent_id: parent,
            secondary_parent_ids: vec![],
            attributes: TaxonAttributes::default(),
        }
    }

    fn list(id: i32, taxon_ids: Vec<TaxonId>) -> TaxonListDocument {
        TaxonListDocument {
            id,
            name: format!("List {}", id),
            taxon_ids,
        }
    }

    #[test]
    fn test_with_underlying_expands_descendants() {
        let tree = TaxonTree::from_documents(vec![
            doc(0, None),
            doc(1, Some(0)),
            doc(2, Some(1)),
            doc(3, Some(2)),
        ]);
        let map = TaxonListSetMap::build(&[list(10, vec![1])], &tree);

        let set = map.get(10).unwrap();
        assert_eq!(set.taxa, HashSet::from([1]));
        assert_eq!(set.with_underlying, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn test_unknown_members_are_skipped() {
        let tree = TaxonTree::from_documents(vec![doc(0, None), doc(1, Some(0))]);
        let map = TaxonListSetMap::build(&[list(10, vec![1, 999])], &tree);

        let set = map.get(10).unwrap();
        assert_eq!(set.taxa, HashSet::from([1]));
    }

    #[test]
    fn test_missing_list_lookup() {
        let tree = TaxonTree::from_documents(vec![doc(0, None)]);
        let map = TaxonListSetMap::build(&[], &tree);
        assert!(map.get(42).is_none());
        assert!(map.is_empty());
    }
}

//! # Taxon Tree Module
//!
//! ## Purpose
//! Immutable in-memory directed graph over all taxa, supporting ancestor and
//! descendant traversal with support for secondary (non-primary) parent edges.
//! Built once per refresh cycle from a storage snapshot, then shared read-only
//! across concurrent requests.
//!
//! ## Input/Output Specification
//! - **Input**: Snapshot of taxon documents (id, names, parent ids, attributes)
//! - **Output**: Membership queries, descendant closures, ancestor paths
//! - **Performance**: O(1) node lookup, O(reachable) descendant expansion
//!
//! ## Key Features
//! - Id-keyed node arena; edges are ids, no reference cycles to manage
//! - Two edge classes: primary tree edge and secondary synonymy edge
//! - Descendant closure as a worklist BFS over both edge classes, tolerant
//!   of cycles introduced by secondary edges
//! - Strongly-connected-components diagnostic for cycle reporting

use crate::repository::TaxonDocument;
use crate::{TaxonId, BIOTA_TAXON_ID};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Opaque taxon payload carried on every node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonAttributes {
    pub vernacular_name: Option<String>,
    pub taxon_category_id: Option<i32>,
    pub authorship: Option<String>,
}

/// A single taxon in the hierarchy
#[derive(Debug, Clone)]
pub struct TaxonNode {
    pub id: TaxonId,
    pub scientific_name: String,
    /// Primary parent; `None` only for the Biota root (or detached nodes
    /// whose recorded parent was absent from the snapshot)
    pub parent_id: Option<TaxonId>,
    pub secondary_parent_ids: Vec<TaxonId>,
    pub child_ids: Vec<TaxonId>,
    pub secondary_child_ids: Vec<TaxonId>,
    pub attributes: TaxonAttributes,
}

/// Immutable per-snapshot taxon hierarchy
#[derive(Debug)]
pub struct TaxonTree {
    nodes: HashMap<TaxonId, TaxonNode>,
    root_id: TaxonId,
}

impl TaxonTree {
    /// Build a tree from a snapshot of taxon documents.
    ///
    /// Upstream storage can contain duplicate taxon ids; the first occurrence
    /// wins. Edges whose endpoint is absent from the snapshot are dropped
    /// with a warning rather than failing the build.
    pub fn from_documents(documents: Vec<TaxonDocument>) -> Self {
        let timer = crate::utils::Timer::new("taxon_tree_build");

        let mut nodes: HashMap<TaxonId, TaxonNode> = HashMap::with_capacity(documents.len());
        let mut duplicates = 0usize;

        // Pass 1: create all nodes, first occurrence wins.
        for doc in documents {
            if nodes.contains_key(&doc.id) {
                duplicates += 1;
                continue;
            }
            nodes.insert(
                doc.id,
                TaxonNode {
                    id: doc.id,
                    scientific_name: doc.scientific_name,
                    parent_id: doc.parent_id,
                    secondary_parent_ids: doc.secondary_parent_ids,
                    child_ids: Vec::new(),
                    secondary_child_ids: Vec::new(),
                    attributes: doc.attributes,
                },
            );
        }
        if duplicates > 0 {
            tracing::warn!("Dropped {} duplicate taxon ids from snapshot", duplicates);
        }

        // Pass 2: wire primary parent-child edges.
        let ids: Vec<TaxonId> = nodes.keys().copied().collect();
        for id in &ids {
            let parent_id = nodes[id].parent_id;
            if let Some(parent_id) = parent_id {
                if nodes.contains_key(&parent_id) {
                    nodes.get_mut(&parent_id).unwrap().child_ids.push(*id);
                } else {
                    tracing::warn!(
                        "Taxon {} references missing primary parent {}, detaching",
                        id,
                        parent_id
                    );
                    nodes.get_mut(id).unwrap().parent_id = None;
                }
            }
        }

        // Pass 3: wire secondary edges.
        for id in &ids {
            let secondary: Vec<TaxonId> = nodes[id]
                .secondary_parent_ids
                .iter()
                .copied()
                .filter(|p| {
                    let present = nodes.contains_key(p);
                    if !present {
                        tracing::debug!("Taxon {} references missing secondary parent {}", id, p);
                    }
                    present
                })
                .collect();
            for parent_id in &secondary {
                nodes
                    .get_mut(parent_id)
                    .unwrap()
                    .secondary_child_ids
                    .push(*id);
            }
            nodes.get_mut(id).unwrap().secondary_parent_ids = secondary;
        }

        let tree = Self {
            nodes,
            root_id: BIOTA_TAXON_ID,
        };
        tracing::info!(
            "Built taxon tree with {} nodes in {}ms",
            tree.len(),
            timer.elapsed_ms()
        );
        tree
    }

    /// Look up a node by taxon id
    pub fn get(&self, id: TaxonId) -> Option<&TaxonNode> {
        self.nodes.get(&id)
    }

    /// The Biota root node, when present in the snapshot
    pub fn root(&self) -> Option<&TaxonNode> {
        self.nodes.get(&self.root_id)
    }

    pub fn contains(&self, id: TaxonId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Taxon-category id recorded on a node, if any
    pub fn taxon_category_id(&self, id: TaxonId) -> Option<i32> {
        self.nodes.get(&id).and_then(|n| n.attributes.taxon_category_id)
    }

    /// Expand a set of seed ids into the seeds plus all their descendants.
    ///
    /// The worklist crosses both primary and secondary child edges; a visited
    /// set makes the walk terminate even when secondary edges form cycles.
    /// Unknown seed ids contribute nothing. With `include_self` false the
    /// seeds themselves are excluded from the result but still expanded.
    pub fn underlying_taxon_ids<I>(&self, seed_ids: I, include_self: bool) -> Vec<TaxonId>
    where
        I: IntoIterator<Item = TaxonId>,
    {
        let mut visited: HashSet<TaxonId> = HashSet::new();
        let mut result: Vec<TaxonId> = Vec::new();
        let mut queue: VecDeque<TaxonId> = VecDeque::new();

        for id in seed_ids {
            if self.nodes.contains_key(&id) && visited.insert(id) {
                if include_self {
                    result.push(id);
                }
                queue.push_back(id);
            }
        }

        while let Some(current) = queue.pop_front() {
            let node = &self.nodes[&current];
            for &child in node.child_ids.iter().chain(node.secondary_child_ids.iter()) {
                if visited.insert(child) {
                    result.push(child);
                    queue.push_back(child);
                }
            }
        }

        result
    }

    /// All ids reachable from the Biota root, root included
    pub fn all_underlying_biota_ids(&self) -> Vec<TaxonId> {
        self.underlying_taxon_ids([self.root_id], true)
    }

    /// Walk the primary-parent chain from a node up to the root.
    ///
    /// Secondary parents never participate; the visited guard protects
    /// against malformed primary loops in the data.
    pub fn primary_ancestor_ids(&self, id: TaxonId) -> Vec<TaxonId> {
        let mut ancestors = Vec::new();
        let mut seen: HashSet<TaxonId> = HashSet::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent_id);

        while let Some(parent_id) = current {
            if !seen.insert(parent_id) {
                tracing::warn!("Primary parent loop detected at taxon {}", parent_id);
                break;
            }
            ancestors.push(parent_id);
            current = self.nodes.get(&parent_id).and_then(|n| n.parent_id);
        }

        ancestors
    }

    /// Strongly-connected-components diagnostic over both edge classes.
    ///
    /// Returns every component of size greater than one, plus single nodes
    /// carrying a self edge. An empty result means the graph is acyclic.
    /// This is a diagnostic utility; traversal never assumes acyclicity.
    pub fn find_cycles(&self) -> Vec<Vec<TaxonId>> {
        struct Frame {
            node: TaxonId,
            edge_index: usize,
        }

        let mut index_counter = 0usize;
        let mut indices: HashMap<TaxonId, usize> = HashMap::new();
        let mut lowlinks: HashMap<TaxonId, usize> = HashMap::new();
        let mut on_stack: HashSet<TaxonId> = HashSet::new();
        let mut component_stack: Vec<TaxonId> = Vec::new();
        let mut cycles: Vec<Vec<TaxonId>> = Vec::new();

        let out_edges = |id: TaxonId| -> Vec<TaxonId> {
            let node = &self.nodes[&id];
            node.child_ids
                .iter()
                .chain(node.secondary_child_ids.iter())
                .copied()
                .collect()
        };

        let mut roots: Vec<TaxonId> = self.nodes.keys().copied().collect();
        roots.sort_unstable();

        for start in roots {
            if indices.contains_key(&start) {
                continue;
            }

            let mut call_stack = vec![Frame {
                node: start,
                edge_index: 0,
            }];

            while !call_stack.is_empty() {
                let (v, edge_index) = {
                    let frame = call_stack.last().unwrap();
                    (frame.node, frame.edge_index)
                };

                if !indices.contains_key(&v) {
                    indices.insert(v, index_counter);
                    lowlinks.insert(v, index_counter);
                    index_counter += 1;
                    component_stack.push(v);
                    on_stack.insert(v);
                }

                let edges = out_edges(v);
                if edge_index < edges.len() {
                    call_stack.last_mut().unwrap().edge_index += 1;
                    let w = edges[edge_index];
                    if !indices.contains_key(&w) {
                        call_stack.push(Frame {
                            node: w,
                            edge_index: 0,
                        });
                    } else if on_stack.contains(&w) {
                        let w_index = indices[&w];
                        if w_index < lowlinks[&v] {
                            lowlinks.insert(v, w_index);
                        }
                    }
                } else {
                    call_stack.pop();
                    if let Some(parent) = call_stack.last() {
                        let v_low = lowlinks[&v];
                        if v_low < lowlinks[&parent.node] {
                            lowlinks.insert(parent.node, v_low);
                        }
                    }

                    if lowlinks[&v] == indices[&v] {
                        let mut component = Vec::new();
                        while let Some(w) = component_stack.pop() {
                            on_stack.remove(&w);
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        let self_loop = component.len() == 1 && out_edges(v).contains(&v);
                        if component.len() > 1 || self_loop {
                            component.sort_unstable();
                            cycles.push(component);
                        }
                    }
                }
            }
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: TaxonId, parent: Option<TaxonId>, secondary: Vec<TaxonId>) -> TaxonDocument {
        TaxonDocument {
            id,
            scientific_name: format!("Taxon {}", id),
            parent_id: parent,
            secondary_parent_ids: secondary,
            attributes: TaxonAttributes::default(),
        }
    }

    /// Biota(0) -> Animalia(1) -> Aves(2) -> {Parus major(3), Parus minor(4)}
    ///          -> Plantae(5)
    /// Secondary: 4 is also a child of 5.
    fn sample_documents() -> Vec<TaxonDocument> {
        vec![
            doc(0, None, vec![]),
            doc(1, Some(0), vec![]),
            doc(2, Some(1), vec![]),
            doc(3, Some(2), vec![]),
            doc(4, Some(2), vec![5]),
            doc(5, Some(0), vec![]),
        ]
    }

    #[test]
    fn test_build_wires_primary_edges() {
        let tree = TaxonTree::from_documents(sample_documents());
        assert_eq!(tree.len(), 6);
        let root = tree.root().unwrap();
        let mut children = root.child_ids.clone();
        children.sort_unstable();
        assert_eq!(children, vec![1, 5]);
        assert_eq!(tree.get(3).unwrap().parent_id, Some(2));
    }

    #[test]
    fn test_build_is_idempotent() {
        let a = TaxonTree::from_documents(sample_documents());
        let b = TaxonTree::from_documents(sample_documents());
        for id in 0..6 {
            let mut ua = a.underlying_taxon_ids([id], true);
            let mut ub = b.underlying_taxon_ids([id], true);
            ua.sort_unstable();
            ub.sort_unstable();
            assert_eq!(ua, ub, "descendant closure differs for taxon {}", id);
            assert_eq!(a.primary_ancestor_ids(id), b.primary_ancestor_ids(id));
        }
    }

    #[test]
    fn test_duplicate_ids_first_occurrence_wins() {
        let mut docs = sample_documents();
        docs.push(TaxonDocument {
            id: 3,
            scientific_name: "Impostor".to_string(),
            parent_id: Some(5),
            secondary_parent_ids: vec![],
            attributes: TaxonAttributes::default(),
        });
        let tree = TaxonTree::from_documents(docs);
        assert_eq!(tree.get(3).unwrap().scientific_name, "Taxon 3");
        assert_eq!(tree.get(3).unwrap().parent_id, Some(2));
    }

    #[test]
    fn test_underlying_includes_self_and_descendants() {
        let tree = TaxonTree::from_documents(sample_documents());
        let mut ids = tree.underlying_taxon_ids([2], true);
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_underlying_crosses_secondary_edges() {
        let tree = TaxonTree::from_documents(sample_documents());
        let mut ids = tree.underlying_taxon_ids([5], true);
        ids.sort_unstable();
        // 4 is reachable from Plantae only via its secondary parent edge.
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_underlying_excluding_self() {
        let tree = TaxonTree::from_documents(sample_documents());
        let mut ids = tree.underlying_taxon_ids([2], false);
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_underlying_superset_over_pruned_snapshot() {
        let full = TaxonTree::from_documents(sample_documents());
        // Pruned snapshot keeps taxon 2 and its primary descendants only.
        let pruned = TaxonTree::from_documents(vec![
            doc(2, None, vec![]),
            doc(3, Some(2), vec![]),
        ]);
        let full_ids: HashSet<TaxonId> = full.underlying_taxon_ids([2], true).into_iter().collect();
        let pruned_ids: HashSet<TaxonId> =
            pruned.underlying_taxon_ids([2], true).into_iter().collect();
        assert!(full_ids.contains(&2));
        assert!(pruned_ids.is_subset(&full_ids));
    }

    #[test]
    fn test_unknown_seed_contributes_nothing() {
        let tree = TaxonTree::from_documents(sample_documents());
        assert!(tree.underlying_taxon_ids([999], true).is_empty());
    }

    #[test]
    fn test_primary_ancestors_ignore_secondary_parents() {
        let tree = TaxonTree::from_documents(sample_documents());
        assert_eq!(tree.primary_ancestor_ids(4), vec![2, 1, 0]);
    }

    #[test]
    fn test_missing_primary_parent_detaches_node() {
        let tree = TaxonTree::from_documents(vec![doc(0, None, vec![]), doc(7, Some(42), vec![])]);
        assert_eq!(tree.get(7).unwrap().parent_id, None);
        assert!(tree.primary_ancestor_ids(7).is_empty());
    }

    #[test]
    fn test_acyclic_tree_reports_no_cycles() {
        let tree = TaxonTree::from_documents(sample_documents());
        assert!(tree.find_cycles().is_empty());
    }

    #[test]
    fn test_secondary_cycle_is_diagnosed() {
        // Primary chain 10 -> 11 -> 12; taxon 11 also lists 12 as a
        // secondary parent, closing the loop 11 <-> 12.
        let docs = vec![
            doc(0, None, vec![]),
            doc(10, Some(0), vec![]),
            doc(11, Some(10), vec![12]),
            doc(12, Some(11), vec![]),
        ];
        let tree = TaxonTree::from_documents(docs);
        let cycles = tree.find_cycles();
        assert_eq!(cycles, vec![vec![11, 12]]);

        // Traversal still terminates despite the cycle.
        let mut ids = tree.underlying_taxon_ids([10], true);
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 11, 12]);
    }
}

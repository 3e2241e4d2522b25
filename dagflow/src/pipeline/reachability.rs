//! Descendant sets for transitive skips.

use super::Dag;
use std::collections::{HashMap, HashSet};

/// Lazily computed descendant sets plus a topological index.
///
/// The engine uses it under the skip-downstream strategy: a failed node's
/// descendants are visited in topological order so that each one can be
/// checked against its predecessors' fates before it is doomed.
#[derive(Debug, Clone)]
pub struct SuccessorClosure {
    successors: HashMap<String, Vec<String>>,
    topo_index: HashMap<String, usize>,
    cache: HashMap<String, HashSet<String>>,
}

impl SuccessorClosure {
    pub(crate) fn new(dag: &Dag, order: Vec<String>) -> Self {
        let successors = dag
            .node_ids()
            .iter()
            .map(|id| (id.clone(), dag.successors(id).to_vec()))
            .collect();
        let topo_index = order.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
        Self {
            successors,
            topo_index,
            cache: HashMap::new(),
        }
    }

    /// All nodes reachable from `id`, excluding `id`.
    pub fn descendants(&mut self, id: &str) -> &HashSet<String> {
        if !self.cache.contains_key(id) {
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = self
                .successors
                .get(id)
                .map(|s| s.iter().map(String::as_str).collect())
                .unwrap_or_default();
            while let Some(next) = stack.pop() {
                if seen.insert(next.to_string()) {
                    if let Some(more) = self.successors.get(next) {
                        stack.extend(more.iter().map(String::as_str));
                    }
                }
            }
            self.cache.insert(id.to_string(), seen);
        }
        &self.cache[id]
    }

    /// Descendants of `id` in topological order.
    pub fn descendants_in_order(&mut self, id: &str) -> Vec<String> {
        let mut out: Vec<String> = self.descendants(id).iter().cloned().collect();
        out.sort_by_key(|n| self.topo_index.get(n).copied().unwrap_or(usize::MAX));
        out
    }

    /// Position of a node in the topological order.
    #[must_use]
    pub fn topo_position(&self, id: &str) -> Option<usize> {
        self.topo_index.get(id).copied()
    }
}

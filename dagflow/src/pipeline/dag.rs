//! The pipeline graph: nodes, edges, validation and structural queries.

use super::{DagEdge, DagNode, SuccessorClosure};
use crate::errors::{
    BuildError, CyclicGraphError, DisconnectedHandleError, DuplicateNodeError, UnknownNodeError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A directed graph of nodes, acyclic once [`validate`](Self::validate)
/// has passed.
///
/// Nodes keep insertion order, which is also the tie-break order for
/// [`topological_order`](Self::topological_order) and for the engine's
/// initial ready queue.
#[derive(Debug, Clone)]
pub struct Dag {
    name: String,
    nodes: HashMap<String, Arc<DagNode>>,
    node_order: Vec<String>,
    edges: Vec<DagEdge>,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    successors: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
}

impl Dag {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: Vec::new(),
            incoming: HashMap::new(),
            outgoing: HashMap::new(),
            successors: HashMap::new(),
            predecessors: HashMap::new(),
        }
    }

    /// The graph's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateNodeError` if the id is taken.
    pub fn add_node(&mut self, node: DagNode) -> Result<(), DuplicateNodeError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DuplicateNodeError::new(&node.id));
        }
        self.node_order.push(node.id.clone());
        self.successors.insert(node.id.clone(), Vec::new());
        self.predecessors.insert(node.id.clone(), Vec::new());
        self.nodes.insert(node.id.clone(), Arc::new(node));
        Ok(())
    }

    /// Adds an edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNodeError` if either endpoint is missing.
    pub fn add_edge(&mut self, edge: DagEdge) -> Result<(), UnknownNodeError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(UnknownNodeError::new(endpoint, &edge.source, &edge.target));
            }
        }

        if let Some(succ) = self.successors.get_mut(&edge.source) {
            if !succ.contains(&edge.target) {
                succ.push(edge.target.clone());
            }
        }
        if let Some(pred) = self.predecessors.get_mut(&edge.target) {
            if !pred.contains(&edge.source) {
                pred.push(edge.source.clone());
            }
        }
        let index = self.edges.len();
        self.outgoing.entry(edge.source.clone()).or_default().push(index);
        self.incoming.entry(edge.target.clone()).or_default().push(index);
        self.edges.push(edge);
        Ok(())
    }

    /// Checks that the graph is acyclic and every declared input handle is fed.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::CyclicGraph` naming one cycle, or
    /// `BuildError::DisconnectedHandle` for the first unfed handle.
    pub fn validate(&self) -> Result<(), BuildError> {
        self.detect_cycle()?;

        for id in &self.node_order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            for handle in node.step.required_input_handles() {
                let fed = self
                    .incoming_edges(id)
                    .any(|edge| &edge.target_handle == handle);
                if !fed {
                    return Err(DisconnectedHandleError::new(id, handle).into());
                }
            }
        }
        Ok(())
    }

    /// Three-colour DFS with an explicit stack of `(node, next successor)`
    /// frames; the frames double as the current path.
    fn detect_cycle(&self) -> Result<(), CyclicGraphError> {
        let mut colors: HashMap<&str, Color> =
            self.node_order.iter().map(|id| (id.as_str(), Color::White)).collect();
        let mut stack: Vec<(&str, usize)> = Vec::new();

        for root in &self.node_order {
            if colors.get(root.as_str()) != Some(&Color::White) {
                continue;
            }
            colors.insert(root, Color::Gray);
            stack.push((root.as_str(), 0));

            while let Some(frame) = stack.last_mut() {
                let (node, cursor) = *frame;
                let Some(next) = self.successors(node).get(cursor) else {
                    colors.insert(node, Color::Black);
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                match colors.get(next.as_str()).copied().unwrap_or(Color::White) {
                    Color::White => {
                        colors.insert(next, Color::Gray);
                        stack.push((next.as_str(), 0));
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|(n, _)| *n == next.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(n, _)| (*n).to_string()).collect();
                        cycle.push(next.clone());
                        return Err(CyclicGraphError::new(cycle));
                    }
                    Color::Black => {}
                }
            }
        }
        Ok(())
    }

    /// One valid linearisation (Kahn's algorithm, ties broken by insertion
    /// order).
    ///
    /// # Errors
    ///
    /// Returns `CyclicGraphError` if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, CyclicGraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .node_order
            .iter()
            .map(|id| (id.as_str(), self.predecessors(id).len()))
            .collect();
        let mut queue: VecDeque<&str> = self
            .node_order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.node_order.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for next in self.successors(id) {
                if let Some(degree) = in_degree.get_mut(next.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if order.len() == self.node_order.len() {
            Ok(order)
        } else {
            self.detect_cycle()?;
            Err(CyclicGraphError::new(Vec::new()))
        }
    }

    /// Groups of nodes that could run together: level `n` holds the nodes
    /// whose longest path from a root has `n` edges.
    ///
    /// # Errors
    ///
    /// Returns `CyclicGraphError` if the graph has a cycle.
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>, CyclicGraphError> {
        let order = self.topological_order()?;
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for id in &order {
            let level = self
                .predecessors(id)
                .iter()
                .filter_map(|p| depth.get(p.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id.clone());
        }
        Ok(levels)
    }

    /// Reachability over successors, for transitive skips.
    ///
    /// # Errors
    ///
    /// Returns `CyclicGraphError` if the graph has a cycle.
    pub fn successor_closure(&self) -> Result<SuccessorClosure, CyclicGraphError> {
        Ok(SuccessorClosure::new(self, self.topological_order()?))
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Arc<DagNode>> {
        self.nodes.get(id)
    }

    /// Whether the node exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<DagNode>> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Node ids in insertion order.
    #[must_use]
    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    /// All edges in declaration order.
    #[must_use]
    pub fn edges(&self) -> &[DagEdge] {
        &self.edges
    }

    /// Edges ending at `id`, in declaration order.
    pub fn incoming_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a DagEdge> + 'a {
        self.edge_indices(&self.incoming, id)
    }

    /// Edges starting at `id`, in declaration order.
    pub fn outgoing_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a DagEdge> + 'a {
        self.edge_indices(&self.outgoing, id)
    }

    fn edge_indices<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        id: &str,
    ) -> impl Iterator<Item = &'a DagEdge> + 'a {
        index
            .get(id)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .filter_map(|i| self.edges.get(*i))
    }

    /// Distinct direct successors.
    #[must_use]
    pub fn successors(&self, id: &str) -> &[String] {
        self.successors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Distinct direct predecessors.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.predecessors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Number of incoming edges.
    #[must_use]
    pub fn in_degree(&self, id: &str) -> usize {
        self.incoming.get(id).map_or(0, Vec::len)
    }

    /// Nodes without successors, in insertion order.
    #[must_use]
    pub fn terminal_nodes(&self) -> Vec<String> {
        self.node_order
            .iter()
            .filter(|id| self.successors(id).is_empty())
            .cloned()
            .collect()
    }

    /// Nodes without predecessors, in insertion order.
    #[must_use]
    pub fn root_nodes(&self) -> Vec<String> {
        self.node_order
            .iter()
            .filter(|id| self.predecessors(id).is_empty())
            .cloned()
            .collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{FanInStep, MergeStrategy};
    use crate::testing::EchoStep;
    use pretty_assertions::assert_eq;

    fn node(id: &str) -> DagNode {
        DagNode::new(id, Arc::new(EchoStep::new()))
    }

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> Dag {
        let mut dag = Dag::new("test");
        for id in ids {
            dag.add_node(node(id)).unwrap();
        }
        for (s, t) in edges {
            dag.add_edge(DagEdge::new(*s, *t)).unwrap();
        }
        dag
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut dag = graph(&["a"], &[]);
        let err = dag.add_node(node("a")).unwrap_err();
        assert_eq!(err.node_id, "a");
        assert_eq!(dag.node_count(), 1);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut dag = graph(&["a"], &[]);
        let err = dag.add_edge(DagEdge::new("a", "ghost")).unwrap_err();
        assert_eq!(err.missing, "ghost");
        assert_eq!(dag.edge_count(), 0);
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let dag = graph(
            &["d", "c", "b", "a", "e"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("e", "d")],
        );
        let order = dag.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();

        assert_eq!(order.len(), 5);
        for edge in dag.edges() {
            assert!(pos(&edge.source) < pos(&edge.target), "{edge:?}");
        }
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let dag = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let err = dag.validate().unwrap_err();
        match err {
            BuildError::CyclicGraph(cycle) => {
                assert_eq!(cycle.cycle_path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(dag.topological_order().is_err());
    }

    #[test]
    fn test_long_chain_validates_without_recursion() {
        let ids: Vec<String> = (0..10_000).map(|i| format!("n{i}")).collect();
        let mut dag = Dag::new("long");
        for id in &ids {
            dag.add_node(node(id)).unwrap();
        }
        for pair in ids.windows(2) {
            dag.add_edge(DagEdge::new(&pair[0], &pair[1])).unwrap();
        }
        assert!(dag.validate().is_ok());

        dag.add_edge(DagEdge::new("n9999", "n9997")).unwrap();
        match dag.validate().unwrap_err() {
            BuildError::CyclicGraph(cycle) => {
                assert_eq!(cycle.cycle_path, vec!["n9997", "n9998", "n9999", "n9997"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let dag = graph(&["a"], &[("a", "a")]);
        assert!(matches!(dag.validate(), Err(BuildError::CyclicGraph(_))));
    }

    #[test]
    fn test_disconnected_fan_in_handle() {
        let mut dag = graph(&["a", "b"], &[]);
        dag.add_node(DagNode::new(
            "merge",
            Arc::new(FanInStep::with_branches(2, MergeStrategy::Collect)),
        ))
        .unwrap();
        dag.add_edge(DagEdge::new("a", "merge").with_target_handle("in-1")).unwrap();

        let err = dag.validate().unwrap_err();
        assert_eq!(
            err,
            BuildError::DisconnectedHandle(DisconnectedHandleError::new("merge", "in-2"))
        );

        dag.add_edge(DagEdge::new("b", "merge").with_target_handle("in-2")).unwrap();
        assert!(dag.validate().is_ok());
    }

    #[test]
    fn test_structural_queries() {
        let dag = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        assert_eq!(dag.root_nodes(), vec!["a"]);
        assert_eq!(dag.terminal_nodes(), vec!["d"]);
        assert_eq!(dag.predecessors("d"), ["b".to_string(), "c".to_string()]);
        assert_eq!(dag.in_degree("d"), 2);
        assert_eq!(dag.outgoing_edges("a").count(), 2);
        assert_eq!(
            dag.execution_levels().unwrap(),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn test_parallel_edges_count_towards_in_degree() {
        let mut dag = graph(&["a", "b"], &[("a", "b")]);
        dag.add_edge(DagEdge::new("a", "b").with_target_handle("extra")).unwrap();

        assert_eq!(dag.in_degree("b"), 2);
        assert_eq!(dag.incoming_edges("b").count(), 2);
        assert_eq!(
            dag.outgoing_edges("a").map(|e| e.target_handle.as_str()).collect::<Vec<_>>(),
            vec![crate::context::DEFAULT_INPUT_HANDLE, "extra"]
        );
        assert_eq!(dag.incoming_edges("a").count(), 0);
        assert_eq!(dag.successors("a"), ["b".to_string()]);
        assert_eq!(dag.topological_order().unwrap(), vec!["a", "b"]);
    }
}

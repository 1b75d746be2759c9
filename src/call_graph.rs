//! Caller → callee graph built from recorded call relationships
//!
//! Nodes live in an arena indexed by [`NodeIndex`]; node 0 is the sentinel
//! root standing for "outside the program". Each node borrows its
//! [`FunctionStats`] from the table it was built from, so the graph is a
//! read-only view that cannot outlive the statistics.
//!
//! ```text
//!   <root>
//!   └─ main
//!      └─ OnStart
//!         ├─ print
//!         └─ helper
//! ```
//!
//! # Example
//!
//! ```
//! use vmprof::call_graph::CallGraph;
//! use vmprof::function::FunctionId;
//! use vmprof::function_profiler::CallRecord;
//! use vmprof::stats::StatsTable;
//!
//! let main = FunctionId::MAIN;
//! let print = FunctionId::Native(0);
//! let mut stats = StatsTable::new();
//! stats.record_entry(main);
//! stats.record_entry(print);
//!
//! let calls = [
//!     CallRecord { caller: None, callee: main },
//!     CallRecord { caller: Some(main), callee: print },
//! ];
//! let graph = CallGraph::build(&calls, &stats).unwrap();
//! assert_eq!(graph.node_count(), 3); // root, main, print
//! assert_eq!(graph.edge_count(), 2);
//! ```

use crate::error::{ProfilerError, Result};
use crate::function::FunctionId;
use crate::function_profiler::CallRecord;
use crate::stats::{FunctionStats, StatsTable};
use std::collections::BTreeMap;

/// Position of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One function in the call graph, or the root sentinel
#[derive(Debug, Clone)]
pub struct CallGraphNode<'a> {
    index: NodeIndex,
    function: Option<FunctionId>,
    stats: Option<&'a FunctionStats>,
    /// Distinct callees in the order they were first observed
    callees: Vec<NodeIndex>,
}

impl<'a> CallGraphNode<'a> {
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// `None` for the root sentinel
    pub fn function(&self) -> Option<FunctionId> {
        self.function
    }

    /// `None` for the root sentinel
    pub fn stats(&self) -> Option<&'a FunctionStats> {
        self.stats
    }

    pub fn callees(&self) -> &[NodeIndex] {
        &self.callees
    }

    pub fn is_root(&self) -> bool {
        self.function.is_none()
    }
}

/// Deduplicated caller → callee graph
#[derive(Debug, Clone)]
pub struct CallGraph<'a> {
    nodes: Vec<CallGraphNode<'a>>,
    lookup: BTreeMap<FunctionId, NodeIndex>,
    stats: &'a StatsTable,
}

impl<'a> CallGraph<'a> {
    /// Index of the root sentinel
    pub const ROOT: NodeIndex = NodeIndex(0);

    /// Empty graph holding only the root sentinel
    pub fn new(stats: &'a StatsTable) -> Self {
        Self {
            nodes: vec![CallGraphNode {
                index: Self::ROOT,
                function: None,
                stats: None,
                callees: Vec::new(),
            }],
            lookup: BTreeMap::new(),
            stats,
        }
    }

    /// Build the graph from call records in observation order
    ///
    /// Fails with [`ProfilerError::UnknownFunction`] if a record names a
    /// function the statistics table never saw.
    pub fn build(calls: &[CallRecord], stats: &'a StatsTable) -> Result<Self> {
        let mut graph = Self::new(stats);
        for record in calls {
            graph.add_call(record.caller, record.callee)?;
        }
        Ok(graph)
    }

    /// Add a caller → callee edge; repeating an edge is a no-op
    pub fn add_call(&mut self, caller: Option<FunctionId>, callee: FunctionId) -> Result<()> {
        let from = match caller {
            Some(function) => self.node_for(function)?,
            None => Self::ROOT,
        };
        let to = self.node_for(callee)?;

        let callees = &mut self.nodes[from.0].callees;
        if !callees.contains(&to) {
            callees.push(to);
        }
        Ok(())
    }

    fn node_for(&mut self, function: FunctionId) -> Result<NodeIndex> {
        if let Some(&index) = self.lookup.get(&function) {
            return Ok(index);
        }

        let stats = self
            .stats
            .get(function)
            .ok_or(ProfilerError::UnknownFunction(function))?;
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(CallGraphNode {
            index,
            function: Some(function),
            stats: Some(stats),
            callees: Vec::new(),
        });
        self.lookup.insert(function, index);
        Ok(index)
    }

    pub fn root(&self) -> &CallGraphNode<'a> {
        &self.nodes[Self::ROOT.0]
    }

    pub fn node(&self, index: NodeIndex) -> Option<&CallGraphNode<'a>> {
        self.nodes.get(index.0)
    }

    /// Node for `function`, if it was ever called
    pub fn get(&self, function: FunctionId) -> Option<&CallGraphNode<'a>> {
        self.lookup.get(&function).map(|index| &self.nodes[index.0])
    }

    /// Function → node map, in identity order
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &CallGraphNode<'a>)> + '_ {
        self.lookup
            .iter()
            .map(move |(function, index)| (*function, &self.nodes[index.0]))
    }

    pub fn callees_of<'g>(
        &'g self,
        node: &'g CallGraphNode<'a>,
    ) -> impl Iterator<Item = &'g CallGraphNode<'a>> + 'g {
        node.callees.iter().map(move |index| &self.nodes[index.0])
    }

    /// Number of nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.callees.len()).sum()
    }

    /// Pre-order walk from the root, callees in first-observed order
    ///
    /// Every reachable node is visited exactly once, even when it has
    /// several callers or sits on a recursive cycle.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(&CallGraphNode<'a>),
    {
        let mut visited = vec![false; self.nodes.len()];
        let mut pending = vec![Self::ROOT];

        while let Some(index) = pending.pop() {
            if visited[index.0] {
                continue;
            }
            visited[index.0] = true;

            let node = &self.nodes[index.0];
            visitor(node);

            pending.extend(
                node.callees
                    .iter()
                    .rev()
                    .filter(|callee| !visited[callee.0])
                    .copied(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(caller: Option<FunctionId>, callee: FunctionId) -> CallRecord {
        CallRecord { caller, callee }
    }

    fn table(functions: &[FunctionId]) -> StatsTable {
        let mut stats = StatsTable::new();
        for &function in functions {
            stats.record_entry(function);
        }
        stats
    }

    fn visit_order(graph: &CallGraph<'_>) -> Vec<Option<FunctionId>> {
        let mut order = Vec::new();
        graph.traverse(|node| order.push(node.function()));
        order
    }

    #[test]
    fn test_empty_graph_has_only_root() {
        let stats = StatsTable::new();
        let graph = CallGraph::build(&[], &stats).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.root().is_root());
        assert_eq!(visit_order(&graph), vec![None]);
    }

    #[test]
    fn test_repeated_edges_are_deduplicated() {
        let a = FunctionId::Normal(0x10);
        let b = FunctionId::Normal(0x20);
        let c = FunctionId::Normal(0x30);
        let stats = table(&[a, b, c]);
        let calls = [
            record(None, a),
            record(Some(a), b),
            record(Some(a), b),
            record(Some(a), c),
        ];

        let graph = CallGraph::build(&calls, &stats).unwrap();
        let node_a = graph.get(a).unwrap();
        let callees: Vec<_> = graph
            .callees_of(node_a)
            .map(|node| node.function().unwrap())
            .collect();
        assert_eq!(callees, vec![b, c]);
        assert_eq!(visit_order(&graph), vec![None, Some(a), Some(b), Some(c)]);
    }

    #[test]
    fn test_shared_callee_visited_once() {
        let a = FunctionId::Public(0);
        let b = FunctionId::Public(1);
        let shared = FunctionId::Native(3);
        let stats = table(&[a, b, shared]);
        let calls = [
            record(None, a),
            record(Some(a), shared),
            record(None, b),
            record(Some(b), shared),
        ];

        let graph = CallGraph::build(&calls, &stats).unwrap();
        assert_eq!(visit_order(&graph), vec![None, Some(a), Some(shared), Some(b)]);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_recursive_cycle_terminates() {
        let a = FunctionId::Normal(0x10);
        let b = FunctionId::Normal(0x20);
        let stats = table(&[a, b]);
        let calls = [
            record(None, a),
            record(Some(a), a),
            record(Some(a), b),
            record(Some(b), a),
        ];

        let graph = CallGraph::build(&calls, &stats).unwrap();
        assert_eq!(visit_order(&graph), vec![None, Some(a), Some(b)]);
    }

    #[test]
    fn test_unknown_function_is_rejected() {
        let stats = table(&[FunctionId::MAIN]);
        let calls = [record(Some(FunctionId::MAIN), FunctionId::Native(9))];
        let err = CallGraph::build(&calls, &stats).unwrap_err();
        assert!(matches!(err, ProfilerError::UnknownFunction(FunctionId::Native(9))));
    }

    #[test]
    fn test_nodes_reference_statistics() {
        let main = FunctionId::MAIN;
        let stats = table(&[main]);
        let graph = CallGraph::build(&[record(None, main)], &stats).unwrap();

        let node = graph.get(main).unwrap();
        assert_eq!(node.stats().unwrap().calls, 1);
        assert!(graph.root().stats().is_none());
        assert_eq!(graph.functions().count(), 1);
        assert_eq!(graph.node(node.index()).unwrap().function(), Some(main));
    }
}

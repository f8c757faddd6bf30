//! Captured dependency graphs and their executable form.

use std::fmt;

use conflux_core::error::{Result, StreamError};
use conflux_core::hal::Task;

/// Identifier of a node within one captured graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Index of this node in the graph's node table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Payload of a captured node.
#[derive(Clone)]
pub enum GraphNodeKind {
    /// An opaque work submission.
    Task(Task),
    /// A recorded ordering barrier (event record, cross-stream join).
    Marker,
    /// A structural node with no work.
    Empty,
}

impl fmt::Debug for GraphNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphNodeKind::Task(_) => f.write_str("Task"),
            GraphNodeKind::Marker => f.write_str("Marker"),
            GraphNodeKind::Empty => f.write_str("Empty"),
        }
    }
}

/// One recorded node: payload plus the nodes that must complete first.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Node identity.
    pub id: NodeId,
    /// Payload.
    pub kind: GraphNodeKind,
    /// Dependencies within the same graph.
    pub deps: Vec<NodeId>,
}

/// A dependency graph recorded by a capture session.
///
/// Nodes accumulate from every stream participating in the session;
/// cross-stream joins appear as dependency edges between the streams'
/// node chains.
#[derive(Debug, Default, Clone)]
pub struct CaptureGraph {
    nodes: Vec<GraphNode>,
}

impl CaptureGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node depending on `deps`.
    pub(crate) fn add_node(&mut self, kind: GraphNodeKind, deps: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode { id, kind, deps });
        id
    }

    /// Number of recorded nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recorded nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Validates the graph and fixes one dependency-respecting execution
    /// order, producing a replayable executable.
    pub fn instantiate(&self) -> Result<GraphExec> {
        let n = self.nodes.len();
        let mut pending: Vec<usize> = vec![0; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for node in &self.nodes {
            for dep in &node.deps {
                if dep.index() >= n {
                    return Err(StreamError::InvalidValue("graph references unknown node"));
                }
                pending[node.id.index()] += 1;
                dependents[dep.index()].push(node.id.index());
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
        let mut schedule = Vec::with_capacity(n);
        while let Some(index) = ready.pop() {
            schedule.push(self.nodes[index].kind.clone());
            for &next in &dependents[index] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(next);
                }
            }
        }

        if schedule.len() != n {
            return Err(StreamError::InvalidValue("graph contains a dependency cycle"));
        }
        Ok(GraphExec { schedule })
    }
}

/// Executable form of a captured graph.
///
/// The schedule is fixed at instantiation; launching replays it through
/// ordinary stream submission, so an in-order queue preserves every
/// recorded dependency.
#[derive(Debug)]
pub struct GraphExec {
    schedule: Vec<GraphNodeKind>,
}

impl GraphExec {
    /// Number of schedulable nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.schedule.len()
    }

    /// Nodes in execution order.
    pub(crate) fn schedule(&self) -> &[GraphNodeKind] {
        &self.schedule
    }
}

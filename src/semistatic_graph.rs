use crate::binding::{CompressedFn, CreateFn, NodeIndex};
use crate::semistatic_map::SemistaticMap;
use crate::type_info::TypeId;
use std::cell::Cell;

#[derive(Clone, Copy)]
pub(crate) enum CreateKind {
    Plain(CreateFn),
    /// Interface node that absorbed its implementation's binding. `class`
    /// is the implementation's original create; the node's edges are the
    /// implementation's dependencies.
    Compressed { via: CompressedFn, class: CreateFn },
}

#[derive(Clone, Copy)]
pub(crate) enum NodeState {
    /// Referenced by an edge or requirement, but not bound here. An injector
    /// may only be built once no node is left in this state.
    Missing,
    Pending(CreateKind),
    /// Construction in flight on this thread; observing it means a
    /// construction cycle reached through a provider.
    Creating,
    /// Terminal: the object exists and `cell` points at its typed cell.
    Ready(*const ()),
}

pub(crate) struct Node {
    pub key: TypeId,
    /// Range into the flat edge array; hard dependencies in declaration
    /// order. Ignored once the node is terminal.
    pub edges: (u32, u32),
    pub state: Cell<NodeState>,
}

impl Node {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self.state.get(), NodeState::Ready(_))
    }

    pub(crate) fn set_terminal(&self, cell: *const ()) {
        self.state.set(NodeState::Ready(cell));
    }
}

/// The injector-side dependency graph: a semistatic map from type id to node
/// index, a flat node array, and a flat edge array of node indices. The
/// arrays are fixed at construction; only node states change afterwards.
pub(crate) struct SemistaticGraph {
    pub map: SemistaticMap<TypeId, NodeIndex>,
    pub nodes: Vec<Node>,
    pub edges: Vec<NodeIndex>,
}

impl SemistaticGraph {
    pub(crate) fn node_index(&self, id: TypeId) -> Option<NodeIndex> {
        self.map.find(id)
    }

    pub(crate) fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index as usize]
    }

    pub(crate) fn edge_cursor(&self, index: NodeIndex) -> EdgeCursor<'_> {
        let (begin, end) = self.node(index).edges;
        EdgeCursor {
            edges: &self.edges[begin as usize..end as usize],
            pos: 0,
        }
    }
}

/// Cursor over a node's outgoing edges. Dependency fetch code advances it
/// one edge per hard dependency, in declaration order.
pub struct EdgeCursor<'a> {
    edges: &'a [NodeIndex],
    pos: usize,
}

impl<'a> EdgeCursor<'a> {
    pub(crate) fn new(edges: &'a [NodeIndex]) -> Self {
        EdgeCursor { edges, pos: 0 }
    }

    pub(crate) fn next(&mut self) -> NodeIndex {
        debug_assert!(self.remaining() > 0, "edge cursor walked past the binding's dependencies");
        let index = self.edges[self.pos];
        self.pos += 1;
        index
    }

    /// Equivalent to `n` calls of `next`, discarding the results.
    #[allow(dead_code)]
    pub(crate) fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    pub(crate) fn remaining(&self) -> usize {
        self.edges.len() - self.pos
    }
}

//! Typed annotation side tables.
//!
//! Annotations are never stored on AST nodes; they live here, keyed by
//! [`NodeId`]. Deep copies allocate fresh ids, so annotations do not carry
//! over to copies of a node.

use ahash::AHashMap;
use indexmap::IndexSet;

use crate::ast::NodeId;
use crate::qual_names::QualName;

#[derive(Debug, Default)]
pub struct Annotations {
    /// Enclosing entities (function defs and lambdas, outermost first) of
    /// each visited node. Maintained by the transformer framework.
    entity_stack: AHashMap<NodeId, Vec<NodeId>>,
    /// Per control-flow construct: the set of qualified names any of its
    /// blocks writes. Populated by the activity analysis.
    writes: AHashMap<NodeId, IndexSet<QualName>>,
}

impl Annotations {
    pub fn set_entity_stack(&mut self, node: NodeId, stack: Vec<NodeId>) {
        self.entity_stack.insert(node, stack);
    }

    pub fn entity_stack(&self, node: NodeId) -> Option<&[NodeId]> {
        self.entity_stack.get(&node).map(Vec::as_slice)
    }

    pub fn set_writes(&mut self, node: NodeId, writes: IndexSet<QualName>) {
        self.writes.insert(node, writes);
    }

    pub fn writes(&self, node: NodeId) -> Option<&IndexSet<QualName>> {
        self.writes.get(&node)
    }

    pub fn take_writes(&mut self, node: NodeId) -> IndexSet<QualName> {
        self.writes.remove(&node).unwrap_or_default()
    }
}

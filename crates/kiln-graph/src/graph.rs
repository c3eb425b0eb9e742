//! The build graph and its dependency-level schedule.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};

/// A set of content-addressed nodes. Adding an identical node twice yields
/// the same id and stores it once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildGraph {
    nodes: BTreeMap<NodeId, Node>,
}

/// Dependency levels of a node's closure.
///
/// Level 0 holds nodes without inputs; every node sits one level above its
/// deepest input, so the nodes inside one level are independent.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub levels: Vec<Vec<NodeId>>,
}

impl Schedule {
    /// Longest chain of dependent steps.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Largest number of steps that may run at once.
    pub fn max_parallelism(&self) -> usize {
        self.levels.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.levels.iter().any(|level| level.contains(id))
    }
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and return its id.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.entry(id).or_insert(node);
        id
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Look a node up, failing when it is not part of the graph.
    pub fn node(&self, id: &NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(GraphError::UnknownNode(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Copy every node of `other` into this graph.
    pub fn absorb(&mut self, other: &BuildGraph) {
        for (id, node) in &other.nodes {
            self.nodes.entry(*id).or_insert_with(|| node.clone());
        }
    }

    /// Whether `ancestor` is in the dependency closure of `node`.
    pub fn depends_on(&self, node: &NodeId, ancestor: &NodeId) -> Result<bool> {
        Ok(self.schedule(node)?.contains(ancestor))
    }

    /// Compute the dependency levels of `root`'s closure.
    pub fn schedule(&self, root: &NodeId) -> Result<Schedule> {
        let mut levels: HashMap<NodeId, usize> = HashMap::new();
        let mut order: Vec<NodeId> = Vec::new();
        self.visit(root, &mut levels, &mut Vec::new(), &mut order)?;

        let max_level = levels.values().copied().max().unwrap_or(0);
        let mut grouped: Vec<Vec<NodeId>> = vec![Vec::new(); max_level + 1];
        for id in order {
            grouped[levels[&id]].push(id);
        }
        grouped.retain(|level| !level.is_empty());

        Ok(Schedule { levels: grouped })
    }

    /// Post-order DFS assigning each node `1 + max(level of inputs)`.
    fn visit(
        &self,
        id: &NodeId,
        levels: &mut HashMap<NodeId, usize>,
        stack: &mut Vec<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> Result<usize> {
        if let Some(&level) = levels.get(id) {
            return Ok(level);
        }
        if stack.contains(id) {
            return Err(GraphError::Cycle(*id));
        }

        let node = self.node(id)?;
        stack.push(*id);
        let mut level = 0;
        for input in node.inputs() {
            level = level.max(self.visit(&input, levels, stack, order)? + 1);
        }
        stack.pop();

        levels.insert(*id, level);
        order.push(*id);
        Ok(level)
    }
}

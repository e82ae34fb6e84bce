//! Call graph accumulated from traced stacks
//!
//! Stacks parsed by [`crate::stack_parser`] are merged here: node and edge
//! call counts add up, and each traced call's parameters are kept per edge.
//! Two thresholds (yellow, red) classify how hot a function is.

use crate::stack_parser::{EdgeKey, FunctionNode, NodeId, Stack};
use serde::Serialize;
use std::collections::HashMap;

/// Merged caller → called relation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallEdge {
    /// One entry per traced call that captured parameters
    pub params: Vec<Vec<String>>,
    pub call_count: u64,
}

/// Call-count classification against the graph's color thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Heat {
    /// Context frame only, never hit by a probe
    Untraced,
    Cold,
    Warm,
    Hot,
}

#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: HashMap<NodeId, FunctionNode>,
    edges: HashMap<EdgeKey, CallEdge>,
    yellow: u64,
    red: u64,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the nodes of a parsed stack
    pub fn load_nodes(&mut self, stack: &Stack) {
        for (id, node) in &stack.nodes {
            self.nodes
                .entry(id.clone())
                .and_modify(|existing| existing.call_count += node.call_count)
                .or_insert_with(|| node.clone());
        }
    }

    /// Merge the edges of a parsed stack
    pub fn load_edges(&mut self, stack: &Stack) {
        for (key, edge) in &stack.edges {
            let merged = self.edges.entry(key.clone()).or_default();
            merged.call_count += edge.call_count;
            if !edge.param.is_empty() {
                merged.params.push(edge.param.clone());
            }
        }
    }

    /// Merge a whole parsed stack
    pub fn load_stack(&mut self, stack: &Stack) {
        self.load_edges(stack);
        self.load_nodes(stack);
    }

    pub fn nodes(&self) -> &HashMap<NodeId, FunctionNode> {
        &self.nodes
    }

    pub fn edges(&self) -> &HashMap<EdgeKey, CallEdge> {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop all nodes and edges and reset the thresholds
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.yellow = 0;
        self.red = 0;
    }

    pub fn set_colors(&mut self, yellow: u64, red: u64) {
        self.yellow = yellow;
        self.red = red;
    }

    /// Lowest call count shown as warm
    pub fn yellow(&self) -> u64 {
        self.yellow
    }

    /// Lowest call count shown as hot
    pub fn red(&self) -> u64 {
        self.red
    }

    /// Highest node call count, 0 for an empty graph
    pub fn max_count(&self) -> u64 {
        self.nodes
            .values()
            .map(|node| node.call_count)
            .max()
            .unwrap_or(0)
    }

    /// Derive thresholds from the current maximum: yellow at a third, red at two thirds
    pub fn init_colors(&mut self) {
        let yellow = (self.max_count() as f64 / 3.0).round() as u64;
        self.set_colors(yellow, yellow * 2);
    }

    pub fn heat(&self, call_count: u64) -> Heat {
        if call_count >= self.red {
            Heat::Hot
        } else if call_count >= self.yellow {
            Heat::Warm
        } else if call_count > 0 {
            Heat::Cold
        } else {
            Heat::Untraced
        }
    }

    /// Every node with the given function name, ordered by source
    pub fn nodes_by_name(&self, name: &str) -> Vec<(&NodeId, &FunctionNode)> {
        let mut nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.name == name)
            .collect();
        nodes.sort_by(|a, b| a.1.source.cmp(&b.1.source));
        nodes
    }

    /// Node with the given function name, from the first source in order
    pub fn node_by_name(&self, name: &str) -> Option<(&NodeId, &FunctionNode)> {
        self.nodes_by_name(name).into_iter().next()
    }

    /// Edges ending at `called`, as `(caller, edge)`
    pub fn edges_into<'a>(
        &'a self,
        called: &'a NodeId,
    ) -> impl Iterator<Item = (&'a NodeId, &'a CallEdge)> + 'a {
        self.edges
            .iter()
            .filter(move |((_, to), _)| to == called)
            .map(|((from, _), edge)| (from, edge))
    }

    /// Every function that can reach `called` through recorded edges
    pub fn ancestors(&self, called: &NodeId) -> Vec<&NodeId> {
        let mut seen: Vec<&NodeId> = Vec::new();
        let mut frontier = vec![called.clone()];

        while let Some(current) = frontier.pop() {
            for (caller, to) in self.edges.keys() {
                if *to == current && caller != called && !seen.contains(&caller) {
                    seen.push(caller);
                    frontier.push(caller.clone());
                }
            }
        }
        seen
    }
}

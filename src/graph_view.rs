//! Presentation records for a call graph
//!
//! Flattens a [`CallGraph`] into node and edge records with display labels,
//! then renders them as JSON or as a text table.

use crate::call_graph::{CallGraph, CallEdge, Heat};
use crate::stack_parser::NodeId;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub source: String,
    pub count: u64,
    pub heat: Heat,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeView {
    /// Caller id
    pub source: NodeId,
    /// Called id
    pub target: NodeId,
    /// Short parameter label
    pub params: String,
    pub call_count: u64,
    pub caller_name: String,
    pub called_name: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Colors {
    pub yellow: u64,
    pub red: u64,
}

/// Display-ready snapshot of a call graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphView {
    pub colors: Colors,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

/// Label for an edge: nothing, the single parameter list, or `...` for several
pub fn param_label(params: &[Vec<String>]) -> String {
    match params {
        [] => String::new(),
        [only] => only.join(", "),
        _ => "...".to_string(),
    }
}

fn params_suffix(params: &[&Vec<String>]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = params.iter().map(|param| param.join(", ")).collect();
    format!("\nWith parameters:\n{}", lines.join("\n"))
}

fn edge_info(edge: &CallEdge) -> String {
    let params: Vec<&Vec<String>> = edge.params.iter().collect();
    format!("Call made {} times{}", edge.call_count, params_suffix(&params))
}

impl GraphView {
    pub fn from_graph(graph: &CallGraph) -> Self {
        let mut nodes: Vec<NodeView> = graph
            .nodes()
            .iter()
            .map(|(id, node)| {
                let mut incoming: Vec<(&NodeId, &CallEdge)> = graph.edges_into(id).collect();
                incoming.sort_by(|a, b| a.0.cmp(b.0));
                let params: Vec<&Vec<String>> = incoming
                    .iter()
                    .flat_map(|(_, edge)| edge.params.iter())
                    .collect();

                NodeView {
                    id: id.clone(),
                    name: node.name.clone(),
                    source: node.source.clone(),
                    count: node.call_count,
                    heat: graph.heat(node.call_count),
                    info: format!(
                        "{}\nSource: {}\nCalled {} times{}",
                        node.name,
                        node.source,
                        node.call_count,
                        params_suffix(&params)
                    ),
                }
            })
            .collect();
        nodes.sort_by(|a, b| (&a.name, &a.source).cmp(&(&b.name, &b.source)));

        let name_of = |id: &NodeId| {
            graph
                .nodes()
                .get(id)
                .map(|node| node.name.clone())
                .unwrap_or_default()
        };
        let mut edges: Vec<EdgeView> = graph
            .edges()
            .iter()
            .map(|((caller, called), edge)| EdgeView {
                source: caller.clone(),
                target: called.clone(),
                params: param_label(&edge.params),
                call_count: edge.call_count,
                caller_name: name_of(caller),
                called_name: name_of(called),
                info: edge_info(edge),
            })
            .collect();
        edges.sort_by(|a, b| {
            (&a.called_name, &a.caller_name, &a.target, &a.source).cmp(&(
                &b.called_name,
                &b.caller_name,
                &b.target,
                &b.source,
            ))
        });

        Self {
            colors: Colors {
                yellow: graph.yellow(),
                red: graph.red(),
            },
            nodes,
            edges,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Functions ({} nodes, warm >= {}, hot >= {})",
            self.nodes.len(),
            self.colors.yellow,
            self.colors.red
        );
        let _ = writeln!(out, "{:<32} {:<28} {:>8}  {}", "Function", "Source", "Calls", "Heat");
        let _ = writeln!(out, "{}", "─".repeat(78));
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "{:<32} {:<28} {:>8}  {:?}",
                node.name, node.source, node.count, node.heat
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Calls ({} edges)", self.edges.len());
        let _ = writeln!(out, "{:<32} {:<32} {:>8}  {}", "Caller", "Called", "Calls", "Params");
        let _ = writeln!(out, "{}", "─".repeat(88));
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "{:<32} {:<32} {:>8}  {}",
                edge.caller_name, edge.called_name, edge.call_count, edge.params
            );
        }
        out
    }
}

//! bcc `trace` stack parsing
//!
//! Parses one event block of `trace -UK` output into the nodes and edges it
//! contributes to a call graph. A block looks like:
//!
//! ```text
//! PID     TID     COMM             FUNC             -
//! 19059   19059   test_application func1            b'param1' b'param2'
//!         -14
//!         b'func1+0x0 [test_application]'
//!         b'func6+0x26 [test_application]'
//!         b'main+0x17 [test_application]'
//!         b'[unknown]'
//! ```
//!
//! The header is optional. The event line carries the captured parameters.
//! Frames are listed callee first, so each pair of neighbouring frames is a
//! `(called, caller)` relation. Only the first frame, the traced function,
//! counts as a call; the rest only give it context.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    // b'func1+0x0 [test_application]'
    static ref FUNCTION_PATTERN: Regex = Regex::new(r"([a-zA-Z0-9_]+)\+.*\s\[(.+)\]").unwrap();
    // PID TID COMM FUNC followed by the captured parameters
    static ref PARAMS_PATTERN: Regex = Regex::new(r"^\d+\s+\d+\s+\S+\s+\S+\s+(.+)").unwrap();
    static ref HEADER_PATTERN: Regex = Regex::new(r"^PID\s+TID\s+COMM\s+FUNC").unwrap();
}

/// Identity of a function in a call graph: SHA-256 of name and source, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: &str, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A function seen in a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionNode {
    pub name: String,
    /// Binary or library the function lives in
    pub source: String,
    pub call_count: u64,
}

/// A caller → called relation seen in a single stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEdge {
    /// Parameters captured for this call (empty when none were traced)
    pub param: Vec<String>,
    pub call_count: u64,
}

/// Edge key: `(caller, called)`
pub type EdgeKey = (NodeId, NodeId);

/// Nodes and edges contributed by one stack block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    pub nodes: HashMap<NodeId, FunctionNode>,
    pub edges: HashMap<EdgeKey, StackEdge>,
}

impl Stack {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Parse `name+offset [source]` out of a frame line
pub fn parse_frame(line: &str) -> Option<(&str, &str)> {
    let caps = FUNCTION_PATTERN.captures(line)?;
    let name = caps.get(1)?.as_str();
    let source = caps.get(2)?.as_str();
    Some((name, source))
}

/// Extract captured parameters from the event line
///
/// bcc prints byte strings as `b'value'`; the `b` prefix and quotes are
/// stripped. Returns `None` when the line carries no parameter column.
pub fn parse_params(event_line: &str) -> Option<Vec<String>> {
    let caps = PARAMS_PATTERN.captures(event_line)?;
    let raw = caps.get(1)?.as_str().trim_end_matches('\r');

    Some(
        raw.split(' ')
            .filter(|token| !token.is_empty())
            .map(|token| token.trim_start_matches('b').trim_matches('\'').to_string())
            .collect(),
    )
}

/// Parse a single stack block into its nodes and edges
pub fn parse_stack<S: AsRef<str>>(lines: &[S]) -> Stack {
    let mut lines = lines.iter().map(AsRef::as_ref).peekable();

    if lines
        .peek()
        .is_some_and(|first| HEADER_PATTERN.is_match(first))
    {
        lines.next();
    }

    let Some(event_line) = lines.next() else {
        return Stack::default();
    };
    let mut params = parse_params(event_line);

    let mut stack = Stack::default();
    let mut called: Option<NodeId> = None;
    let mut traced = true;

    for line in lines {
        let Some((name, source)) = parse_frame(line) else {
            continue;
        };
        let caller = NodeId::new(name, source);

        let node = stack
            .nodes
            .entry(caller.clone())
            .or_insert_with(|| FunctionNode {
                name: name.to_string(),
                source: source.to_string(),
                call_count: 0,
            });
        // Only the top frame was actually hit by the probe
        if called.is_none() {
            node.call_count += 1;
        }

        if let Some(called) = called.take() {
            let edge = stack
                .edges
                .entry((caller.clone(), called))
                .or_insert_with(|| StackEdge {
                    param: params.take().unwrap_or_default(),
                    call_count: 0,
                });
            if traced {
                edge.call_count += 1;
            }
            params = None;
            traced = false;
        }

        called = Some(caller);
    }

    tracing::trace!(
        nodes = stack.nodes.len(),
        edges = stack.edges.len(),
        "parsed stack"
    );
    stack
}

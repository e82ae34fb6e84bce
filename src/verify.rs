//! Checking an observed call graph against the fixture's known shape
//!
//! Tracing `func1` (two `%s` args), `func2` (one `%d` arg) and `func3` on the
//! `test_application` fixture must yield:
//!
//! | function | calls | parameters                            |
//! |----------|-------|---------------------------------------|
//! | func1    | 2     | `param1, param2` and `param3, param4` |
//! | func2    | 1     | `3`                                   |
//! | func3    | 5     | none                                  |
//! | func6    | 0     | root, ancestor of every leaf          |
//!
//! Entry probes fire before the leaf's frame is set up, so the frame of the
//! direct caller (`func4` or `func5`) is often missing from the stack and the
//! leaf appears to be called from `func6`. Ancestry is therefore checked
//! by reachability rather than by direct edges.

use crate::call_graph::CallGraph;
use crate::fixture::{FUNC2_ARG, FUNC3_REPEAT, FUNC5_ARGS};
use crate::trace_setup::{SetupError, TraceSetup};
use std::fmt;

/// Expected observations for one traced function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFunction {
    pub name: String,
    pub call_count: u64,
    /// Parameter lists captured on calls into this function, in call order
    pub params: Vec<Vec<String>>,
}

/// What a trace of the fixture must contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureExpectation {
    pub root: String,
    pub leaves: Vec<ExpectedFunction>,
}

impl Default for FixtureExpectation {
    fn default() -> Self {
        let func1_params = FUNC5_ARGS
            .iter()
            .map(|pair| {
                pair.iter()
                    .map(|param| param.to_string_lossy().into_owned())
                    .collect()
            })
            .collect();

        Self {
            root: "func6".to_string(),
            leaves: vec![
                ExpectedFunction {
                    name: "func1".to_string(),
                    call_count: FUNC5_ARGS.len() as u64,
                    params: func1_params,
                },
                ExpectedFunction {
                    name: "func2".to_string(),
                    call_count: 1,
                    params: vec![vec![FUNC2_ARG.to_string()]],
                },
                ExpectedFunction {
                    name: "func3".to_string(),
                    call_count: FUNC3_REPEAT as u64,
                    params: vec![],
                },
            ],
        }
    }
}

/// One way an observed graph differs from the expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    MissingFunction(String),
    CallCount {
        function: String,
        expected: u64,
        found: u64,
    },
    Params {
        function: String,
        expected: Vec<Vec<String>>,
        found: Vec<Vec<String>>,
    },
    RootCalled { root: String, found: u64 },
    NotReachableFromRoot { function: String, root: String },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::MissingFunction(name) => write!(f, "{} was never observed", name),
            Mismatch::CallCount {
                function,
                expected,
                found,
            } => write!(
                f,
                "{} called {} times, expected {}",
                function, found, expected
            ),
            Mismatch::Params {
                function,
                expected,
                found,
            } => write!(
                f,
                "{} captured parameters {:?}, expected {:?}",
                function, found, expected
            ),
            Mismatch::RootCalled { root, found } => write!(
                f,
                "{} is not traced but shows {} calls",
                root, found
            ),
            Mismatch::NotReachableFromRoot { function, root } => {
                write!(f, "{} is not reachable from {}", function, root)
            }
        }
    }
}

/// Result of comparing a graph with a [`FixtureExpectation`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Generate human-readable report
    pub fn to_report_string(&self) -> String {
        let mut report = String::new();

        if self.passed() {
            report.push_str("✅ CALL GRAPH MATCHES FIXTURE\n\n");
        } else {
            report.push_str("❌ CALL GRAPH DOES NOT MATCH FIXTURE\n\n");
        }
        report.push_str(&format!("Functions checked: {}\n", self.checked));
        report.push_str(&format!("Mismatches: {}\n", self.mismatches.len()));
        for mismatch in &self.mismatches {
            report.push_str(&format!("  - {}\n", mismatch));
        }
        report
    }
}

fn sorted(mut params: Vec<Vec<String>>) -> Vec<Vec<String>> {
    params.sort();
    params
}

/// Compare `graph` with `expectation`, collecting every difference
///
/// A function observed in several sources is checked as one: counts and
/// parameters are summed over all of its nodes, and each of them must be
/// reachable from a root node.
pub fn verify_graph(graph: &CallGraph, expectation: &FixtureExpectation) -> Verification {
    let mut verification = Verification::default();

    let roots = graph.nodes_by_name(&expectation.root);
    verification.checked += 1;
    let root_calls: u64 = roots.iter().map(|(_, node)| node.call_count).sum();
    if roots.is_empty() {
        verification
            .mismatches
            .push(Mismatch::MissingFunction(expectation.root.clone()));
    } else if root_calls != 0 {
        verification.mismatches.push(Mismatch::RootCalled {
            root: expectation.root.clone(),
            found: root_calls,
        });
    }

    for leaf in &expectation.leaves {
        verification.checked += 1;
        let nodes = graph.nodes_by_name(&leaf.name);
        if nodes.is_empty() {
            verification
                .mismatches
                .push(Mismatch::MissingFunction(leaf.name.clone()));
            continue;
        }

        let call_count: u64 = nodes.iter().map(|(_, node)| node.call_count).sum();
        if call_count != leaf.call_count {
            verification.mismatches.push(Mismatch::CallCount {
                function: leaf.name.clone(),
                expected: leaf.call_count,
                found: call_count,
            });
        }

        // Order across different callers is not meaningful
        let found: Vec<Vec<String>> = nodes
            .iter()
            .flat_map(|(id, _)| graph.edges_into(id))
            .flat_map(|(_, edge)| edge.params.iter().cloned())
            .collect();
        if sorted(found.clone()) != sorted(leaf.params.clone()) {
            verification.mismatches.push(Mismatch::Params {
                function: leaf.name.clone(),
                expected: leaf.params.clone(),
                found,
            });
        }

        if !roots.is_empty() {
            let reachable = nodes.iter().all(|(id, _)| {
                graph
                    .ancestors(id)
                    .iter()
                    .any(|ancestor| roots.iter().any(|(root, _)| root == ancestor))
            });
            if !reachable {
                verification.mismatches.push(Mismatch::NotReachableFromRoot {
                    function: leaf.name.clone(),
                    root: expectation.root.clone(),
                });
            }
        }
    }

    tracing::debug!(
        checked = verification.checked,
        mismatches = verification.mismatches.len(),
        "verified call graph"
    );
    verification
}

/// Setup that traces the fixture binary at `binary` the way [`FixtureExpectation`] assumes
pub fn fixture_setup(binary: &str) -> Result<TraceSetup, SetupError> {
    let mut setup = TraceSetup::new();
    setup.initialize_binary(binary)?;
    for function in ["func1", "func2", "func3"] {
        setup.trace_function(binary, function)?;
    }
    setup.add_parameter(binary, "func1", 1, "%s")?;
    setup.add_parameter(binary, "func1", 2, "%s")?;
    setup.add_parameter(binary, "func2", 1, "%d")?;
    Ok(setup)
}

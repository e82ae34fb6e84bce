//! calltree - deterministic call-tree fixture and bcc call-graph validation
//!
//! The `test_application` binary runs a fixed call tree ([`fixture`]) whose
//! leaves each perform one 100ms monotonic sleep ([`timed_wait`]). The
//! `calltree` binary turns bcc `trace -UK` output into a call graph
//! ([`stack_parser`], [`call_graph`], [`trace_output`]), renders it
//! ([`graph_view`]), builds probe arguments ([`trace_setup`]), traces live
//! ([`trace_runner`]) and checks the result against the fixture ([`verify`]).

pub mod call_graph;
pub mod cli;
pub mod config;
pub mod fixture;
pub mod graph_view;
pub mod stack_parser;
pub mod timed_wait;
pub mod trace_output;
pub mod trace_runner;
pub mod trace_setup;
pub mod verify;

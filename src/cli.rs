//! CLI argument parsing for calltree

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for call graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "calltree")]
#[command(version)]
#[command(about = "Build and verify call graphs from bcc trace output", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// TOML configuration file (bcc command, trace flags, colors)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load saved trace output ("-" for stdin) and print its call graph
    Load {
        /// File holding `trace -UK` output
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Print the bcc trace probe arguments for a setup file
    Args {
        /// TOML setup file mapping binaries to functions and parameter formats
        #[arg(value_name = "SETUP")]
        setup: PathBuf,
    },

    /// Print the bcc trace probe arguments for the test_application fixture
    FixtureArgs {
        /// Path to the fixture binary
        #[arg(value_name = "BINARY")]
        binary: PathBuf,
    },

    /// Run bcc trace live for a while, then print the call graph
    Trace {
        /// TOML setup file mapping binaries to functions and parameter formats
        #[arg(value_name = "SETUP")]
        setup: PathBuf,

        /// How long to trace
        #[arg(long, value_name = "SECS", default_value = "10")]
        duration: u64,

        #[command(flatten)]
        render: RenderArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Check the graph against the fixture's expected call graph (exit 1 on mismatch)
    #[arg(long)]
    pub verify: bool,

    /// Call count from which functions are shown as warm
    #[arg(long, value_name = "COUNT", requires = "red")]
    pub yellow: Option<u64>,

    /// Call count from which functions are shown as hot
    #[arg(long, value_name = "COUNT", requires = "yellow")]
    pub red: Option<u64>,
}

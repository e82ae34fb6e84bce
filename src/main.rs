use anyhow::{Context, Result};
use calltree::call_graph::CallGraph;
use calltree::cli::{Cli, Command, OutputFormat, RenderArgs};
use calltree::config::CalltreeConfig;
use calltree::graph_view::GraphView;
use calltree::trace_output;
use calltree::trace_runner::TraceRunner;
use calltree::trace_setup::TraceSetup;
use calltree::verify::{fixture_setup, verify_graph, FixtureExpectation};
use clap::Parser;
use std::io::{self, BufReader};
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_setup(path: &Path) -> Result<TraceSetup> {
    let mut setup = TraceSetup::new();
    if let Some(warning) = setup
        .load_from_file(path)
        .with_context(|| format!("Failed to load setup {}", path.display()))?
    {
        eprintln!("warning: {}", warning);
    }
    Ok(setup)
}

/// Print the graph and, if asked, whether it matches the fixture
fn render(graph: &mut CallGraph, config: &CalltreeConfig, args: &RenderArgs) -> Result<bool> {
    if let Some(colors) = config.colors {
        graph.set_colors(colors.yellow, colors.red);
    }
    if let (Some(yellow), Some(red)) = (args.yellow, args.red) {
        graph.set_colors(yellow, red);
    }

    let view = GraphView::from_graph(graph);
    match args.format {
        OutputFormat::Text => print!("{}", view.to_text()),
        OutputFormat::Json => println!("{}", view.to_json()?),
    }

    if !args.verify {
        return Ok(true);
    }
    let verification = verify_graph(graph, &FixtureExpectation::default());
    eprint!("{}", verification.to_report_string());
    Ok(verification.passed())
}

fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => CalltreeConfig::load(path)?,
        None => CalltreeConfig::default(),
    };

    match cli.command {
        Command::Load { input, render: args } => {
            let mut graph = CallGraph::new();
            let blocks = if input.as_os_str() == "-" {
                trace_output::load_from_reader(BufReader::new(io::stdin().lock()), &mut graph)?
            } else {
                trace_output::load_from_file(&input, &mut graph)?
            };
            tracing::debug!(blocks, "trace output loaded");
            render(&mut graph, &config, &args)
        }
        Command::Args { setup } => {
            for argument in load_setup(&setup)?.bcc_args() {
                println!("{}", argument);
            }
            Ok(true)
        }
        Command::FixtureArgs { binary } => {
            let binary = binary.to_string_lossy();
            let setup = fixture_setup(&binary)
                .with_context(|| format!("Failed to set up fixture {}", binary))?;
            for argument in setup.bcc_args() {
                println!("{}", argument);
            }
            Ok(true)
        }
        Command::Trace {
            setup,
            duration,
            render: args,
        } => {
            let functions = load_setup(&setup)?.bcc_args();
            let graph = Arc::new(Mutex::new(CallGraph::new()));

            let mut runner = TraceRunner::start(&config, &functions, Arc::clone(&graph))?;
            eprintln!("Tracing {} functions for {}s...", functions.len(), duration);
            thread::sleep(Duration::from_secs(duration));
            runner.stop()?;
            if let Some(error) = runner.error() {
                anyhow::bail!(error);
            }

            let mut graph = graph
                .lock()
                .map_err(|_| anyhow::anyhow!("Call graph lock poisoned"))?;
            render(&mut graph, &config, &args)
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(cli.debug);

    if run(cli)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

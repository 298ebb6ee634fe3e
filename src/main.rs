use std::process::ExitCode;

use clap::Parser;
use snafu::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod builder;
mod cmd;
mod config;
mod extension;
mod invalidation;
mod log_tail;
mod parser;
mod persistence;
mod preprocess;
mod processor;
mod registry;
pub mod report;
mod resource;
mod scheduler;
mod signature;
pub mod output;
mod workflow;

use cmd::{RunArgs, ValidateArgs, VisualizeArgs, handle_run, handle_validate, handle_visualize};
use config::TuttleConfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Run error: {source}"))]
    Run { source: cmd::run::Error },

    #[snafu(display("Validate error: {source}"))]
    Validate { source: cmd::validate::Error },

    #[snafu(display("Visualization error: {source}"))]
    Visualize { source: cmd::visualize::Error },
}

#[derive(Parser, Debug)]
#[command(name = "tuttle")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A make-like, dependency-tracking workflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Run a workflow, rebuilding only what changed
    Run(RunArgs),
    /// Check a workflow's structure without running it
    Validate(ValidateArgs),
    /// Render a workflow's resource graph
    Visualize(VisualizeArgs),
}

/// Initialize tracing/logging with indicatif integration
fn init_tracing(verbose: bool) {
    let indicatif_layer = tracing_indicatif::IndicatifLayer::new();

    let filter_layer = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(indicatif_layer)
        .init();
}

/// Exit code for a parse/structural error or a process failure. `run` and
/// `validate` both use it: `validate` surfaces the same parse/structural
/// error kinds as `run`, just without ever scheduling a process.
const STRUCTURAL_ERROR_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from file, env vars, and defaults
    let global_config = TuttleConfig::load().unwrap_or_default();

    let result: Result<(), (Error, u8)> = match cli.command {
        Commands::Run(args) => {
            let config = args.merge_with_config(global_config);
            init_tracing(config.verbose);
            handle_run(args, config)
                .await
                .context(RunSnafu)
                .map_err(|e| (e, STRUCTURAL_ERROR_EXIT))
        }
        Commands::Validate(args) => {
            let config = args.merge_with_config(global_config);
            init_tracing(config.verbose);
            handle_validate(args, config)
                .await
                .context(ValidateSnafu)
                .map_err(|e| (e, STRUCTURAL_ERROR_EXIT))
        }
        Commands::Visualize(args) => {
            let config = args.merge_with_config(global_config);
            init_tracing(false);
            handle_visualize(args, config).await.context(VisualizeSnafu).map_err(|e| (e, 1))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err((err, code)) => {
            eprintln!("tuttle: {err}");
            ExitCode::from(code)
        }
    }
}

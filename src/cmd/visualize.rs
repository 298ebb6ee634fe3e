//! Renders a workflow's resource graph without running anything: `dot`
//! for Graphviz consumers, `html` for the same status table `run --report`
//! produces.

use std::path::PathBuf;

use clap::Parser;
use snafu::prelude::*;

use crate::builder::RegistryBuilder;
use crate::config::{self, TuttleConfig};
use crate::preprocess;
use crate::report;
use crate::workflow::Workflow;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid format '{format}'. Valid formats: dot, html"))]
    InvalidFormat { format: String },

    #[snafu(display("Failed to read workflow file {}: {source}", path.display()))]
    ReadWorkflow { path: PathBuf, source: std::io::Error },

    #[snafu(display("Preprocessing error: {source}"))]
    Preprocess { source: preprocess::Error },

    #[snafu(display("Workflow error: {source}"))]
    Workflow { source: crate::workflow::Error },

    #[snafu(display("Report error: {source}"))]
    Report { source: report::Error },

    #[snafu(display("Failed to write {}: {source}", path.display()))]
    WriteOutput { path: PathBuf, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramFormat {
    Dot,
    Html,
}

fn parse_diagram_format(format: &str) -> Result<DiagramFormat> {
    match format.to_lowercase().as_str() {
        "dot" => Ok(DiagramFormat::Dot),
        "html" => Ok(DiagramFormat::Html),
        _ => InvalidFormatSnafu { format: format.to_string() }.fail(),
    }
}

#[derive(Parser, Debug)]
pub struct VisualizeArgs {
    /// Workflow file to visualize
    #[arg(required = true, value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    /// State/log/extension directory
    #[arg(short = 'd', long, value_name = "DIR")]
    pub tuttle_dir: Option<PathBuf>,

    /// Output format (dot, html)
    #[arg(short = 'f', long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Output path (defaults to stdout)
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl VisualizeArgs {
    pub fn merge_with_config(&self, global: TuttleConfig) -> config::VisualizeConfig {
        let mut visualize = global.visualize;
        if let Some(format) = &self.format {
            visualize.format = format.clone();
        }
        visualize
    }
}

fn resolve_tuttle_dir(workflow_path: &std::path::Path, configured: Option<&PathBuf>) -> PathBuf {
    let configured = configured.cloned().unwrap_or_else(|| PathBuf::from(".tuttle"));
    if configured.is_absolute() {
        return configured;
    }
    workflow_path.parent().unwrap_or_else(|| std::path::Path::new(".")).join(configured)
}

pub async fn handle_visualize(args: VisualizeArgs, config: config::VisualizeConfig) -> Result<()> {
    let format = parse_diagram_format(&config.format)?;
    let tuttle_dir = resolve_tuttle_dir(&args.workflow, args.tuttle_dir.as_ref());

    let text = std::fs::read_to_string(&args.workflow).with_context(|_| ReadWorkflowSnafu {
        path: args.workflow.clone(),
    })?;
    let sections = preprocess::expand(&text, &tuttle_dir).await.context(PreprocessSnafu)?;

    let _registry = RegistryBuilder::new().build();
    let workflow = Workflow::from_sections(sections, &tuttle_dir).context(WorkflowSnafu)?;

    let rendered = match format {
        DiagramFormat::Dot => report::dot_export(&workflow),
        DiagramFormat::Html => report::render_html_report(&workflow).context(ReportSnafu)?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|_| WriteOutputSnafu { path: path.clone() })?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

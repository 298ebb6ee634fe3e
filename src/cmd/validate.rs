//! Structural validation without running anything: parses the workflow,
//! expands preprocess sections, and checks the two invariants the
//! scheduler depends on — no missing primary inputs, and acyclic.

use std::path::PathBuf;

use clap::Parser;
use console::style;
use snafu::prelude::*;

use crate::builder::RegistryBuilder;
use crate::config::{self, TuttleConfig};
use crate::preprocess;
use crate::workflow::Workflow;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read workflow file {}: {source}", path.display()))]
    ReadWorkflow { path: PathBuf, source: std::io::Error },

    #[snafu(display("Preprocessing error: {source}"))]
    Preprocess { source: preprocess::Error },

    #[snafu(display("Workflow error: {source}"))]
    Workflow { source: crate::workflow::Error },

    #[snafu(display("{count} issue(s) found"))]
    ValidationFailed { count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Workflow file to validate
    #[arg(required = true, value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    /// State/log/extension directory
    #[arg(short = 'd', long, value_name = "DIR")]
    pub tuttle_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl ValidateArgs {
    pub fn merge_with_config(&self, global: TuttleConfig) -> config::ValidateConfig {
        let mut validate = global.validate;
        validate.verbose = validate.verbose || self.verbose;
        validate
    }
}

fn resolve_tuttle_dir(workflow_path: &std::path::Path, configured: Option<&PathBuf>) -> PathBuf {
    let configured = configured.cloned().unwrap_or_else(|| PathBuf::from(".tuttle"));
    if configured.is_absolute() {
        return configured;
    }
    workflow_path.parent().unwrap_or_else(|| std::path::Path::new(".")).join(configured)
}

pub async fn handle_validate(args: ValidateArgs, _config: config::ValidateConfig) -> Result<()> {
    println!("{}", "─".repeat(80));
    println!("{} {}", style("▶ validating:").bold(), style(args.workflow.display().to_string()).cyan());

    let tuttle_dir = resolve_tuttle_dir(&args.workflow, args.tuttle_dir.as_ref());
    let text = std::fs::read_to_string(&args.workflow).with_context(|_| ReadWorkflowSnafu {
        path: args.workflow.clone(),
    })?;
    let sections = preprocess::expand(&text, &tuttle_dir).await.context(PreprocessSnafu)?;

    let registry = RegistryBuilder::new().build();
    let workflow = Workflow::from_sections(sections, &tuttle_dir).context(WorkflowSnafu)?;

    let mut issue_count = 0;

    let missing = workflow.missing_inputs(&registry).await;
    for url in &missing {
        println!("  {} missing primary input: {url}", style("✗").red().bold());
        issue_count += 1;
    }

    let cycle = workflow.circular_references();
    if !cycle.is_empty() {
        println!("  {} cycle through: {}", style("✗").red().bold(), cycle.join(", "));
        issue_count += cycle.len();
    }

    if issue_count == 0 {
        println!(
            "{} {} process(es), {} resource(s), no issues found",
            style("✓").green().bold(),
            workflow.iter_processes().count(),
            workflow.resources.len()
        );
        Ok(())
    } else {
        ValidationFailedSnafu { count: issue_count }.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_tuttle_dir_defaults_to_dot_tuttle_next_to_workflow() {
        let resolved = resolve_tuttle_dir(std::path::Path::new("/workspace/build.tuttle"), None);
        assert_eq!(resolved, PathBuf::from("/workspace/.tuttle"));
    }

    #[tokio::test]
    async fn handle_validate_reports_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let workflow_path = dir.path().join("build.tuttle");
        std::fs::write(&workflow_path, "file://B <- file://A\n    true\n").unwrap();

        let args = ValidateArgs {
            workflow: workflow_path,
            tuttle_dir: None,
            verbose: false,
        };
        let err = handle_validate(args, config::ValidateConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn handle_validate_passes_for_a_satisfiable_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("A");
        std::fs::write(&a, "hi").unwrap();
        let workflow_path = dir.path().join("build.tuttle");
        std::fs::write(&workflow_path, format!("file://B <- file://{}\n    true\n", a.display())).unwrap();

        let args = ValidateArgs {
            workflow: workflow_path,
            tuttle_dir: None,
            verbose: false,
        };
        handle_validate(args, config::ValidateConfig::default()).await.unwrap();
    }
}

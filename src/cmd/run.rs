use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use snafu::prelude::*;

use crate::builder::RegistryBuilder;
use crate::config::{self, TuttleConfig};
use crate::invalidation::{self, OwnershipPolicy};
use crate::output;
use crate::persistence::{FileWorkflowPersistence, PersistenceProvider};
use crate::preprocess;
use crate::report;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::workflow::Workflow;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read workflow file {}: {source}", path.display()))]
    ReadWorkflow { path: PathBuf, source: std::io::Error },

    #[snafu(display("Preprocessing error: {source}"))]
    Preprocess { source: preprocess::Error },

    #[snafu(display("Workflow error: {source}"))]
    Workflow { source: crate::workflow::Error },

    #[snafu(display("Persistence error: {source}"))]
    Persistence { source: crate::persistence::Error },

    #[snafu(display("Report error: {source}"))]
    Report { source: report::Error },

    #[snafu(display("{count} process(es) failed"))]
    RunFailed { count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Workflow file to run
    #[arg(required = true, value_name = "WORKFLOW")]
    pub workflow: PathBuf,

    /// State/log/extension directory
    #[arg(short = 'd', long, value_name = "DIR")]
    pub tuttle_dir: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Keep running independent branches after a failure
    #[arg(short = 'k', long)]
    pub keep_going: bool,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Treat resources with no recorded creator as invalidated, not just a warning
    #[arg(long)]
    pub strict_ownership: bool,

    /// Write an HTML status report to this path after the run
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl RunArgs {
    pub fn merge_with_config(&self, global: TuttleConfig) -> config::RunConfig {
        let mut run = global.run;
        if let Some(dir) = &self.tuttle_dir {
            run.tuttle_dir = dir.clone();
        }
        if let Some(jobs) = self.jobs {
            run.jobs = Some(jobs);
        }
        run.keep_going = run.keep_going || self.keep_going;
        run.verbose = run.verbose || self.verbose;
        run.strict_ownership = run.strict_ownership || self.strict_ownership;
        if let Some(report) = &self.report {
            run.report = Some(report.clone());
        }
        run
    }
}

fn resolve_tuttle_dir(workflow_path: &std::path::Path, configured: &std::path::Path) -> PathBuf {
    if configured.is_absolute() {
        return configured.to_path_buf();
    }
    workflow_path.parent().unwrap_or_else(|| std::path::Path::new(".")).join(configured)
}

pub async fn handle_run(args: RunArgs, config: config::RunConfig) -> Result<()> {
    let tuttle_dir = resolve_tuttle_dir(&args.workflow, &config.tuttle_dir);
    let jobs = crate::scheduler::worker_count(config.jobs);

    output::format_run_start(&args.workflow.display().to_string(), jobs);

    let text = std::fs::read_to_string(&args.workflow).with_context(|_| ReadWorkflowSnafu {
        path: args.workflow.clone(),
    })?;

    let sections = preprocess::expand(&text, &tuttle_dir).await.context(PreprocessSnafu)?;

    let registry = RegistryBuilder::new().build();
    let mut workflow = Workflow::from_sections(sections, &tuttle_dir).context(WorkflowSnafu)?;
    workflow.validate(&registry).await.context(WorkflowSnafu)?;

    let persistence = FileWorkflowPersistence::new(&tuttle_dir);
    let previous = persistence.load().await.context(PersistenceSnafu)?;

    let policy = if config.strict_ownership {
        OwnershipPolicy::Strict
    } else {
        OwnershipPolicy::WarnOnly
    };
    let inval_report = invalidation::invalidate(&mut workflow, previous.as_ref(), &registry, policy).await;
    output::format_invalidation_summary(&inval_report);
    persistence.save(&workflow).await.context(PersistenceSnafu)?;

    let scheduler = Scheduler::new(
        Arc::new(registry),
        &persistence,
        SchedulerConfig {
            jobs,
            keep_going: config.keep_going,
        },
        tuttle_dir.clone(),
    );
    let run_report = scheduler.run(&mut workflow).await;
    output::format_run_summary(&run_report);

    if let Some(report_path) = &config.report {
        report::write_html_report(&workflow, report_path).context(ReportSnafu)?;
        println!("report written to {}", report_path.display());
    }

    if !run_report.failure.is_empty() {
        return RunFailedSnafu {
            count: run_report.failure.len(),
        }
        .fail();
    }
    Ok(())
}

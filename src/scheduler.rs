//! Component F: the bounded worker pool that runs runnable processes to
//! completion, tails their logs, checks post-conditions, records
//! signatures, and persists state after every transition.
//!
//! The original runner is a single-threaded cooperative loop driving an OS
//! process pool through an async completion callback. Here the loop is a
//! single async task; OS-process isolation is preserved because every
//! process still runs as a real child process (`tokio::process::Command`
//! inside the processor), and in-flight concurrency is capped at `N` via
//! a [`tokio::sync::Semaphore`] rather than a thread/process pool size.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::log_tail::LogTailer;
use crate::persistence::PersistenceProvider;
use crate::registry::Registry;
use crate::workflow::{Process, Workflow};

const IDLE_SLEEP: Duration = Duration::from_millis(100);
/// Matches the original runner's `FAILLURE_IN_PROCESS` template, spelling
/// preserved.
const FAILLURE_IN_PROCESS: &str = "Process {process_id} ({processor_name} processor) has failled :\n{error_detail}";
const ERROR_IN_PROCESS: &str =
    "An unexpected error have happen in tuttle processor {processor_name} : \n{stacktrace}\nProcess {process_id} will not complete.";
const MISSING_OUTPUT: &str = "After execution of process {process_id} : these resources should have been created : \n{missing_outputs} ";
const ERROR_IN_SIGNATURE: &str =
    "An unexpected error have happen in tuttle while retrieving signature after process {process_id} has run: \n{stacktrace}\nProcess cannot be considered complete.";
const ABORTED_MESSAGE: &str = "This process was aborted";

fn render(template: &str, fields: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in fields {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// `N = max(1, (cpu_count+1)/2)` when unspecified, else the user-supplied
/// value.
pub fn worker_count(explicit: Option<usize>) -> usize {
    match explicit {
        Some(n) => n.max(1),
        None => {
            let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            ((cpus + 1) / 2).max(1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub jobs: usize,
    pub keep_going: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub success: Vec<String>,
    pub failure: Vec<(String, String)>,
}

enum Outcome {
    Success(Vec<(String, String)>),
    Failure(String),
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

async fn run_single_process(registry: Arc<Registry>, mut process: Process) -> (Process, Outcome) {
    let processor = match registry.processor(&process.processor_name) {
        Ok(p) => p,
        Err(e) => return (process, Outcome::Failure(e.to_string())),
    };

    if let Err(e) = std::fs::create_dir_all(&process.reserved_dir) {
        return (process, Outcome::Failure(format!("could not create reserved directory: {e}")));
    }
    for log_path in [process.log_stdout.clone(), process.log_stderr.clone()] {
        if let Some(parent) = log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return (process, Outcome::Failure(format!("could not create log directory: {e}")));
            }
        }
    }

    if let Err(e) = processor.pre_check(&process.inputs, &process.outputs) {
        let msg = render(
            FAILLURE_IN_PROCESS,
            &[
                ("process_id", &process.id),
                ("processor_name", processor.name()),
                ("error_detail", &e.to_string()),
            ],
        );
        return (process, Outcome::Failure(msg));
    }

    let job = crate::processor::Job {
        code: &process.code,
        inputs: &process.inputs,
        outputs: &process.outputs,
        reserved_dir: &process.reserved_dir,
        stdout_path: &process.log_stdout,
        stderr_path: &process.log_stderr,
    };

    if let Err(e) = processor.run(job).await {
        let msg = render(
            FAILLURE_IN_PROCESS,
            &[
                ("process_id", &process.id),
                ("processor_name", processor.name()),
                ("error_detail", &e.to_string()),
            ],
        );
        return (process, Outcome::Failure(msg));
    }

    let mut missing = Vec::new();
    for output in &process.outputs {
        let exists = match registry.construct_resource(output) {
            Ok(resource) => resource.exists().await.unwrap_or(false),
            Err(_) => false,
        };
        if !exists {
            missing.push(format!("* {output}"));
        }
    }
    if !missing.is_empty() {
        let msg = render(
            MISSING_OUTPUT,
            &[("process_id", &process.id), ("missing_outputs", &missing.join("\n"))],
        );
        process.error_message = Some(msg.clone());
        return (process, Outcome::Failure(msg));
    }

    let mut signatures = Vec::new();
    for output in &process.outputs {
        let signature = match registry.construct_resource(output) {
            Ok(resource) => resource.signature().await,
            Err(e) => Err(crate::resource::Error::Database {
                url: output.clone(),
                message: e.to_string(),
            }),
        };
        match signature {
            Ok(sig) => signatures.push((output.clone(), sig)),
            Err(e) => {
                let msg = render(
                    ERROR_IN_SIGNATURE,
                    &[("process_id", &process.id), ("stacktrace", &e.to_string())],
                );
                return (process, Outcome::Failure(msg));
            }
        }
    }

    (process, Outcome::Success(signatures))
}

pub struct Scheduler<'a> {
    registry: Arc<Registry>,
    persistence: &'a dyn PersistenceProvider,
    config: SchedulerConfig,
    tail_dir: PathBuf,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: Arc<Registry>, persistence: &'a dyn PersistenceProvider, config: SchedulerConfig, tuttle_dir: PathBuf) -> Self {
        Self {
            registry,
            persistence,
            config,
            tail_dir: tuttle_dir,
        }
    }

    /// Runs the scheduler loop to completion (including the drain phase),
    /// persisting the workflow after every state transition.
    pub async fn run(&self, workflow: &mut Workflow) -> RunReport {
        let semaphore = Arc::new(Semaphore::new(self.config.jobs));
        let mut join_set: JoinSet<(Process, Outcome)> = JoinSet::new();
        let mut report = RunReport::default();
        let tailer = LogTailer::new();

        let mut runnables: Vec<String> = workflow.runnable_processes().into_iter().map(|p| p.id.clone()).collect();

        loop {
            let keep_running = (self.config.keep_going || report.failure.is_empty())
                && (join_set.len() > 0 || !runnables.is_empty());
            if !keep_running {
                break;
            }

            let mut progressed = false;

            while !runnables.is_empty() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                let id = runnables.remove(0);
                let Some(process) = workflow.process_mut(&id) else { continue };
                process.start = Some(now_secs());
                let process = process.clone();
                tailer.follow(&process.id, &process.log_stdout, &process.log_stderr);
                let registry = Arc::clone(&self.registry);
                join_set.spawn(async move {
                    let _permit = permit;
                    run_single_process(registry, process).await
                });
                progressed = true;
            }

            while let Some(result) = join_set.try_join_next() {
                progressed = true;
                self.handle_completion(workflow, &mut runnables, &mut report, result, &tailer).await;
            }

            if progressed {
                let _ = self.persistence.save(workflow).await;
            } else {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }

        // Drain phase: let everything already started finish cleanly.
        while let Some(result) = join_set.join_next().await {
            self.handle_completion(workflow, &mut runnables, &mut report, result, &tailer).await;
            let _ = self.persistence.save(workflow).await;
        }

        mark_unfinished_as_aborted(workflow);
        let _ = self.persistence.save(workflow).await;
        tailer.stop_all();
        report
    }

    async fn handle_completion(
        &self,
        workflow: &mut Workflow,
        runnables: &mut Vec<String>,
        report: &mut RunReport,
        result: std::result::Result<(Process, Outcome), tokio::task::JoinError>,
        tailer: &LogTailer,
    ) {
        let (process, outcome) = match result {
            Ok(pair) => pair,
            Err(join_error) => {
                // An unexpected panic inside the worker task, not a typed
                // processor error.
                tracing::error!(error = %join_error, "worker task panicked");
                return;
            }
        };
        let id = process.id.clone();
        tailer.finish(&id).await;
        match outcome {
            Outcome::Success(signatures) => {
                if let Some(stored) = workflow.process_mut(&id) {
                    stored.end = Some(now_secs());
                    stored.success = Some(true);
                }
                for (url, sig) in signatures {
                    workflow.signatures.record(url, sig, Some(id.clone()));
                }
                report.success.push(id.clone());
                let downstream: Vec<String> = workflow.discover_runnable_processes(&id).into_iter().map(|p| p.id.clone()).collect();
                for d in downstream {
                    if !runnables.contains(&d) {
                        runnables.push(d);
                    }
                }
            }
            Outcome::Failure(message) => {
                if let Some(stored) = workflow.process_mut(&id) {
                    stored.end = Some(now_secs());
                    stored.success = Some(false);
                    stored.error_message = Some(message.clone());
                }
                report.failure.push((id, message));
            }
        }
    }
}

/// Cleanup step 3: any process whose `start` is set but `end` is not is
/// marked `(success=false, error="This process was aborted")`.
pub fn mark_unfinished_as_aborted(workflow: &mut Workflow) {
    for process in &mut workflow.processes {
        if process.start.is_some() && process.end.is_none() {
            process.end = Some(now_secs());
            process.success = Some(false);
            process.error_message = Some(ABORTED_MESSAGE.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_respects_explicit_value() {
        assert_eq!(worker_count(Some(4)), 4);
        assert_eq!(worker_count(Some(0)), 1);
    }

    #[test]
    fn worker_count_derives_from_cpus_when_unspecified() {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(worker_count(None), ((cpus + 1) / 2).max(1));
    }

    #[test]
    fn render_substitutes_named_fields() {
        let msg = render(FAILLURE_IN_PROCESS, &[("process_id", "p1"), ("processor_name", "shell"), ("error_detail", "boom")]);
        assert_eq!(msg, "Process p1 (shell processor) has failled :\nboom");
    }

    #[tokio::test]
    async fn scheduler_runs_trivial_workflow_to_success() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("A");
        std::fs::write(&a, "hello").unwrap();
        let b = dir.path().join("B");

        let registry = Arc::new(Registry::new());
        let mut workflow = Workflow::new();
        let code = format!("cat {} > {}", a.display(), b.display());
        workflow
            .add_process(Process::new(
                "shell",
                code,
                vec![format!("file://{}", a.display())],
                vec![format!("file://{}", b.display())],
                false,
                0,
                dir.path(),
            ))
            .unwrap();

        let persistence = crate::persistence::InMemoryWorkflowPersistence::new();
        let scheduler = Scheduler::new(
            registry,
            &persistence,
            SchedulerConfig { jobs: 2, keep_going: false },
            dir.path().to_path_buf(),
        );
        let report = scheduler.run(&mut workflow).await;
        assert_eq!(report.failure.len(), 0);
        assert_eq!(report.success.len(), 1);
        assert!(b.exists());
    }

    #[tokio::test]
    async fn failing_process_blocks_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new());
        let mut workflow = Workflow::new();
        let a_url = "file:///tmp/tuttle-scheduler-a-does-not-exist".to_string();
        let b_url = format!("file://{}", dir.path().join("B").display());
        workflow
            .add_process(Process::new("shell", "exit 1", vec![], vec![a_url.clone()], false, 0, dir.path()))
            .unwrap();
        workflow
            .add_process(Process::new("shell", "true", vec![a_url], vec![b_url], false, 1, dir.path()))
            .unwrap();

        let persistence = crate::persistence::InMemoryWorkflowPersistence::new();
        let scheduler = Scheduler::new(
            registry,
            &persistence,
            SchedulerConfig { jobs: 2, keep_going: false },
            dir.path().to_path_buf(),
        );
        let report = scheduler.run(&mut workflow).await;
        assert_eq!(report.failure.len(), 1);
        assert_eq!(report.success.len(), 0);
    }
}

//! End-to-end scenarios driving the full run pipeline (preprocess ->
//! workflow construction -> validation -> invalidation -> scheduling ->
//! persistence) the way `tuttle run` wires them together.

use std::sync::Arc;

use tuttle::invalidation::{self, OwnershipPolicy};
use tuttle::persistence::{FileWorkflowPersistence, PersistenceProvider};
use tuttle::preprocess;
use tuttle::registry::Registry;
use tuttle::scheduler::{Scheduler, SchedulerConfig};
use tuttle::workflow::Workflow;

async fn run_text(dir: &std::path::Path, text: &str) -> (Workflow, tuttle::scheduler::RunReport) {
    let sections = preprocess::expand(text, dir).await.unwrap();
    let mut workflow = Workflow::from_sections(sections, dir).unwrap();
    let registry = Registry::default();
    workflow.validate(&registry).await.unwrap();

    let persistence = FileWorkflowPersistence::new(dir);
    let previous = persistence.load().await.unwrap();
    invalidation::invalidate(&mut workflow, previous.as_ref(), &registry, OwnershipPolicy::WarnOnly).await;
    persistence.save(&workflow).await.unwrap();

    let scheduler = Scheduler::new(
        Arc::new(registry),
        &persistence,
        SchedulerConfig { jobs: 2, keep_going: false },
        dir.to_path_buf(),
    );
    let report = scheduler.run(&mut workflow).await;
    persistence.save(&workflow).await.unwrap();
    (workflow, report)
}

#[tokio::test]
async fn trivial_build_succeeds_and_is_idempotent_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("A");
    std::fs::write(&a, "hello").unwrap();
    let b = dir.path().join("B");
    let tuttle_dir = dir.path().join(".tuttle");

    let text = format!("file://{} <- file://{}\n    echo A produces B > {}\n", b.display(), a.display(), b.display());

    let (_workflow, report) = run_text(&tuttle_dir, &text).await;
    assert_eq!(report.failure.len(), 0);
    assert_eq!(report.success.len(), 1);
    assert!(b.exists());

    // Second run, nothing changed: nothing should be rebuilt.
    let (_workflow2, report2) = run_text(&tuttle_dir, &text).await;
    assert_eq!(report2.success.len(), 0);
    assert_eq!(report2.failure.len(), 0);
}

#[tokio::test]
async fn upstream_change_rebuilds_downstream_resource() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("A");
    std::fs::write(&a, "hello").unwrap();
    let b = dir.path().join("B");
    let tuttle_dir = dir.path().join(".tuttle");

    let text = format!("file://{} <- file://{}\n    cp {} {}\n", b.display(), a.display(), a.display(), b.display());

    run_text(&tuttle_dir, &text).await;
    std::fs::write(&a, "world").unwrap();

    let sections = preprocess::expand(&text, &tuttle_dir).await.unwrap();
    let mut workflow = Workflow::from_sections(sections, &tuttle_dir).unwrap();
    let registry = Registry::default();
    let persistence = FileWorkflowPersistence::new(&tuttle_dir);
    let previous = persistence.load().await.unwrap();
    let report = invalidation::invalidate(&mut workflow, previous.as_ref(), &registry, OwnershipPolicy::WarnOnly).await;

    let b_url = format!("file://{}", b.display());
    assert!(report.invalidated.iter().any(|e| e.resource == b_url));
}

#[tokio::test]
async fn failing_process_blocks_downstream_and_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let tuttle_dir = dir.path().join(".tuttle");
    let a = dir.path().join("A");
    let b = dir.path().join("B");

    let text = format!(
        "file://{} <-\n    exit 7\nfile://{} <- file://{}\n    true\n",
        a.display(),
        b.display(),
        a.display()
    );

    let (workflow, report) = run_text(&tuttle_dir, &text).await;
    assert_eq!(report.failure.len(), 1);
    assert!(!b.exists());

    let a_url = format!("file://{}", a.display());
    let creator_id = workflow.creator_of(&a_url).unwrap().to_string();
    let process = workflow.process(&creator_id).unwrap();
    assert_eq!(process.success, Some(false));
    assert!(process.error_message.as_deref().unwrap_or_default().contains("has failled"));
}

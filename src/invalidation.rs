//! Component D: diffs the current workflow against the previously
//! persisted one and decides which derived resources to rebuild.
//!
//! Reasons are checked in the fixed order from the design: the first one
//! that applies to a resource wins; everything downstream of an
//! invalidated resource is invalidated too, with reason
//! [`Reason::UpstreamInvalidated`].

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::registry::Registry;
use crate::workflow::Workflow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    NotProducedAnymore,
    ProcessCodeChanged,
    DependenciesChanged,
    InputChanged(String),
    PreviousRunIncomplete,
    ModifiedOutsideTuttle,
    UpstreamInvalidated,
}

impl Reason {
    pub fn message(&self) -> String {
        match self {
            Reason::NotProducedAnymore => "resource not produced anymore".to_string(),
            Reason::ProcessCodeChanged => "process code changed".to_string(),
            Reason::DependenciesChanged => "dependencies changed".to_string(),
            Reason::InputChanged(url) => format!("input `{url}` changed"),
            Reason::PreviousRunIncomplete => "producing process did not succeed last run".to_string(),
            Reason::ModifiedOutsideTuttle => "resource was modified outside of tuttle".to_string(),
            Reason::UpstreamInvalidated => "upstream invalidated".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationEntry {
    pub resource: String,
    pub reason: Reason,
}

#[derive(Debug, Clone, Default)]
pub struct InvalidationReport {
    pub invalidated: Vec<InvalidationEntry>,
    /// Resources that exist but carry no creation record from the
    /// previous run — reported even under [`OwnershipPolicy::WarnOnly`].
    pub not_created_by_tuttle: Vec<String>,
}

/// Policy for resources that exist but carry no prior creation record.
/// Default is warn-only; `StrictOwnership` escalates to invalidation
/// (treated like "modified outside of tuttle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipPolicy {
    #[default]
    WarnOnly,
    Strict,
}

/// Runs the invalidation algorithm, mutating `current` in place: removing
/// side effects of invalidated resources, dropping their signatures, and
/// copying forward the process state (timings, success, signature) of
/// resources found still valid so the scheduler treats them as already
/// satisfied.
pub async fn invalidate(
    current: &mut Workflow,
    previous: Option<&Workflow>,
    registry: &Registry,
    policy: OwnershipPolicy,
) -> InvalidationReport {
    let Some(previous) = previous else {
        return InvalidationReport::default();
    };

    let mut reasons: IndexMap<String, Reason> = IndexMap::new();
    let mut not_created_by_tuttle: Vec<String> = Vec::new();

    // Resources the previous run produced that the current workflow no
    // longer declares anywhere: dropped from the graph entirely, as
    // opposed to a resource whose producing process merely vanished from
    // `previous` (which `add_process`'s duplicate-producer check rules
    // out while a workflow is in memory).
    for (url, prev_entry) in &previous.resources {
        if prev_entry.creator_process_id.is_some() && !current.resources.contains_key(url) {
            reasons.insert(url.clone(), Reason::NotProducedAnymore);
        }
    }

    let derived: Vec<(String, String)> = current
        .resources
        .iter()
        .filter_map(|(url, entry)| entry.creator_process_id.clone().map(|pid| (url.clone(), pid)))
        .collect();

    for (url, creator_id) in &derived {
        match classify(current, previous, registry, url, creator_id, policy, &mut not_created_by_tuttle).await {
            Classification::Valid => {
                current.carried_over_valid.insert(url.clone());
            }
            // Brand new this run: no previous record to compare against
            // or carry forward, so it's simply left for the scheduler to
            // build like any never-before-seen process output.
            Classification::New => {}
            Classification::Invalidate(reason) => {
                reasons.insert(url.clone(), reason);
            }
        }
    }

    // Closure under descendants: repeat until no new resource is marked.
    loop {
        let mut changed = false;
        for process in &current.processes {
            let any_input_invalidated = process.inputs.iter().any(|i| reasons.contains_key(i));
            if !any_input_invalidated {
                continue;
            }
            for output in &process.outputs {
                if !reasons.contains_key(output) {
                    reasons.insert(output.clone(), Reason::UpstreamInvalidated);
                    changed = true;
                }
                current.carried_over_valid.remove(output);
            }
        }
        if !changed {
            break;
        }
    }

    // Best-effort removal of invalidated resources' side effects.
    for url in reasons.keys() {
        if let Ok(resource) = registry.construct_resource(url) {
            let _ = resource.remove().await;
        }
        current.signatures.remove(url);
        current.carried_over_valid.remove(url);
    }

    // Carry forward process state + signature for everything still valid.
    let carried: Vec<String> = current.carried_over_valid.iter().cloned().collect();
    for url in carried {
        carry_forward(current, previous, &url);
    }

    InvalidationReport {
        invalidated: reasons
            .into_iter()
            .map(|(resource, reason)| InvalidationEntry { resource, reason })
            .collect(),
        not_created_by_tuttle,
    }
}

/// The outcome of comparing one derived resource against the previous run.
enum Classification {
    /// No previous record at all: build fresh, do not carry over.
    New,
    /// Previously valid and unchanged: carry forward process state and
    /// signature.
    Valid,
    Invalidate(Reason),
}

async fn classify(
    current: &Workflow,
    previous: &Workflow,
    registry: &Registry,
    url: &str,
    creator_id: &str,
    policy: OwnershipPolicy,
    not_created_by_tuttle: &mut Vec<String>,
) -> Classification {
    let Some(current_process) = current.process(creator_id) else {
        return Classification::New;
    };
    let Some(prev_entry) = previous.resources.get(url) else {
        return Classification::New;
    };
    let Some(prev_creator_id) = prev_entry.creator_process_id.as_ref() else {
        return Classification::New;
    };
    let Some(prev_process) = previous.process(prev_creator_id) else {
        // Defensive: `add_process`'s duplicate-producer check means a
        // resource's `creator_process_id` always names a process that
        // exists in the same workflow, so this should be unreachable.
        return Classification::Invalidate(Reason::NotProducedAnymore);
    };

    if prev_process.code != current_process.code {
        return Classification::Invalidate(Reason::ProcessCodeChanged);
    }

    let prev_inputs: HashSet<&String> = prev_process.inputs.iter().collect();
    let cur_inputs: HashSet<&String> = current_process.inputs.iter().collect();
    if prev_inputs != cur_inputs {
        return Classification::Invalidate(Reason::DependenciesChanged);
    }

    for input in &current_process.inputs {
        if !current.is_primary(input) {
            continue;
        }
        if let Some(prev_sig) = previous.signatures.signature_of(input) {
            let current_sig = current_signature(registry, input).await;
            if current_sig.as_deref() != Some(prev_sig) {
                return Classification::Invalidate(Reason::InputChanged(input.clone()));
            }
        }
    }

    if prev_process.success != Some(true) {
        return Classification::Invalidate(Reason::PreviousRunIncomplete);
    }

    match previous.signatures.signature_of(url) {
        Some(prev_sig) => {
            let current_sig = current_signature(registry, url).await;
            if current_sig.as_deref() != Some(prev_sig) {
                return Classification::Invalidate(Reason::ModifiedOutsideTuttle);
            }
        }
        None => {
            if current_signature_exists(registry, url).await {
                not_created_by_tuttle.push(url.to_string());
                if policy == OwnershipPolicy::Strict {
                    return Classification::Invalidate(Reason::ModifiedOutsideTuttle);
                }
            }
        }
    }

    Classification::Valid
}

async fn current_signature(registry: &Registry, url: &str) -> Option<String> {
    registry.construct_resource(url).ok()?.signature().await.ok()
}

async fn current_signature_exists(registry: &Registry, url: &str) -> bool {
    match registry.construct_resource(url) {
        Ok(resource) => resource.exists().await.unwrap_or(false),
        Err(_) => false,
    }
}

fn carry_forward(current: &mut Workflow, previous: &Workflow, url: &str) {
    let Some(creator_id) = current.creator_of(url).map(str::to_string) else {
        return;
    };
    if let Some(prev_entry) = previous.resources.get(url) {
        if let Some(prev_creator_id) = &prev_entry.creator_process_id {
            if let Some(prev_process) = previous.process(prev_creator_id) {
                let (start, end, success) = (prev_process.start, prev_process.end, prev_process.success);
                if let Some(process) = current.process_mut(&creator_id) {
                    process.start = start;
                    process.end = end;
                    process.success = success;
                }
            }
        }
    }
    if let Some(record) = previous.signatures.get(url) {
        current
            .signatures
            .record(url.to_string(), record.signature.clone(), record.producing_process_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Process;
    use std::path::Path;

    fn process(inputs: Vec<&str>, outputs: Vec<&str>, code: &str) -> Process {
        Process::new(
            "shell",
            code,
            inputs.into_iter().map(String::from).collect(),
            outputs.into_iter().map(String::from).collect(),
            false,
            0,
            Path::new("/tmp/.tuttle-inval"),
        )
    }

    #[tokio::test]
    async fn first_run_invalidates_nothing() {
        let mut current = Workflow::new();
        current.add_process(process(vec![], vec!["file:///a"], "true")).unwrap();
        let registry = Registry::new();
        let report = invalidate(&mut current, None, &registry, OwnershipPolicy::WarnOnly).await;
        assert!(report.invalidated.is_empty());
    }

    #[tokio::test]
    async fn unchanged_process_is_carried_over_as_valid() {
        let registry = Registry::new();
        let mut previous = Workflow::new();
        previous.add_process(process(vec![], vec!["file:///a"], "true")).unwrap();
        previous.process_mut("file:///a").unwrap().success = Some(true);
        previous.process_mut("file:///a").unwrap().start = Some(1);
        previous.process_mut("file:///a").unwrap().end = Some(2);
        previous.signatures.record("file:///a", "sig-1", Some("file:///a".to_string()));

        let mut current = Workflow::new();
        current.add_process(process(vec![], vec!["file:///a"], "true")).unwrap();

        let report = invalidate(&mut current, Some(&previous), &registry, OwnershipPolicy::WarnOnly).await;
        assert!(report.invalidated.is_empty());
        assert!(current.carried_over_valid.contains("file:///a"));
        assert_eq!(current.process("file:///a").unwrap().success, Some(true));
    }

    #[tokio::test]
    async fn code_change_invalidates_resource() {
        let registry = Registry::new();
        let mut previous = Workflow::new();
        previous.add_process(process(vec![], vec!["file:///a"], "echo old")).unwrap();
        previous.process_mut("file:///a").unwrap().success = Some(true);
        previous.signatures.record("file:///a", "sig-1", Some("file:///a".to_string()));

        let mut current = Workflow::new();
        current.add_process(process(vec![], vec!["file:///a"], "echo new")).unwrap();

        let report = invalidate(&mut current, Some(&previous), &registry, OwnershipPolicy::WarnOnly).await;
        assert_eq!(report.invalidated.len(), 1);
        assert_eq!(report.invalidated[0].resource, "file:///a");
        assert!(matches!(report.invalidated[0].reason, Reason::ProcessCodeChanged));
    }

    #[tokio::test]
    async fn invalidation_closure_propagates_downstream() {
        let registry = Registry::new();
        let mut previous = Workflow::new();
        previous.add_process(process(vec![], vec!["file:///a"], "echo old")).unwrap();
        previous.add_process(process(vec!["file:///a"], vec!["file:///b"], "cp a b")).unwrap();
        previous.process_mut("file:///a").unwrap().success = Some(true);
        previous.process_mut("file:///b").unwrap().success = Some(true);
        previous.signatures.record("file:///a", "sig-1", Some("file:///a".to_string()));
        previous.signatures.record("file:///b", "sig-2", Some("file:///b".to_string()));

        let mut current = Workflow::new();
        current.add_process(process(vec![], vec!["file:///a"], "echo new")).unwrap();
        current.add_process(process(vec!["file:///a"], vec!["file:///b"], "cp a b")).unwrap();

        let report = invalidate(&mut current, Some(&previous), &registry, OwnershipPolicy::WarnOnly).await;
        let invalidated: HashSet<String> = report.invalidated.iter().map(|e| e.resource.clone()).collect();
        assert!(invalidated.contains("file:///a"));
        assert!(invalidated.contains("file:///b"));
        let b_reason = report.invalidated.iter().find(|e| e.resource == "file:///b").unwrap();
        assert!(matches!(b_reason.reason, Reason::UpstreamInvalidated));
    }

    #[tokio::test]
    async fn new_resource_is_not_carried_over() {
        let registry = Registry::new();
        let mut previous = Workflow::new();
        previous.add_process(process(vec![], vec!["file:///a"], "true")).unwrap();
        previous.process_mut("file:///a").unwrap().success = Some(true);
        previous.signatures.record("file:///a", "sig-1", Some("file:///a".to_string()));

        let mut current = Workflow::new();
        current.add_process(process(vec![], vec!["file:///a"], "true")).unwrap();
        current.add_process(process(vec!["file:///a"], vec!["file:///b"], "cp a b")).unwrap();

        let report = invalidate(&mut current, Some(&previous), &registry, OwnershipPolicy::WarnOnly).await;
        // file:///b never appeared in `previous` at all: it must not be
        // treated as already-satisfied, or its consumer would dispatch
        // without waiting for its creator to actually run.
        assert!(!current.carried_over_valid.contains("file:///b"));
        assert!(report.invalidated.iter().all(|e| e.resource != "file:///b"));
        assert!(current.carried_over_valid.contains("file:///a"));
    }

    #[tokio::test]
    async fn dropped_resource_is_invalidated_and_signature_removed() {
        let registry = Registry::new();
        let mut previous = Workflow::new();
        previous.add_process(process(vec![], vec!["file:///a"], "true")).unwrap();
        previous.process_mut("file:///a").unwrap().success = Some(true);
        previous.signatures.record("file:///a", "sig-1", Some("file:///a".to_string()));

        // `current` no longer declares file:///a anywhere.
        let mut current = Workflow::new();
        current.add_process(process(vec![], vec!["file:///other"], "true")).unwrap();
        current.signatures.record("file:///a", "sig-1", Some("file:///a".to_string()));

        let report = invalidate(&mut current, Some(&previous), &registry, OwnershipPolicy::WarnOnly).await;
        assert!(report
            .invalidated
            .iter()
            .any(|e| e.resource == "file:///a" && matches!(e.reason, Reason::NotProducedAnymore)));
        assert!(current.signatures.signature_of("file:///a").is_none());
    }
}

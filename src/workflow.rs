//! Component B: the in-memory DAG of processes and resources.
//!
//! Back-references (`resource -> creator process`) are logical relations
//! resolved through the `url -> creator` table below, never an ownership
//! edge or a pointer — this is what makes the whole graph trivially
//! serializable (see [`crate::persistence`]).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::parser::SectionDict;
use crate::registry::Registry;
use crate::signature::SignatureStore;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Duplicate producer for resource '{url}'"))]
    DuplicateProducer { url: String },

    #[snafu(display("Workflow has missing inputs: {}", urls.join(", ")))]
    MissingInputs { urls: Vec<String> },

    #[snafu(display("Workflow contains a cycle through: {}", urls.join(", ")))]
    Cycle { urls: Vec<String> },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A unit of work: reads input resources, writes output resources, running
/// `code` under `processor_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub processor_name: String,
    pub code: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub is_preprocess: bool,
    pub reserved_dir: PathBuf,
    pub log_stdout: PathBuf,
    pub log_stderr: PathBuf,
    pub start: Option<i64>,
    pub end: Option<i64>,
    /// Tri-state: `None` = unknown/not yet run, `Some(true)`/`Some(false)`.
    pub success: Option<bool>,
    pub error_message: Option<String>,
}

impl Process {
    /// The stable identifier is derived from the process's first declared
    /// output, falling back to its position in the file for preprocesses
    /// with no declared outputs.
    pub fn derive_id(outputs: &[String], position: usize) -> String {
        outputs
            .first()
            .cloned()
            .unwrap_or_else(|| format!("__preprocess_{position}"))
    }

    pub fn new(
        processor_name: impl Into<String>,
        code: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        is_preprocess: bool,
        position: usize,
        tuttle_dir: &std::path::Path,
    ) -> Self {
        let id = Self::derive_id(&outputs, position);
        let reserved_dir = tuttle_dir.join("processes").join(sanitize(&id));
        let log_stdout = tuttle_dir.join("processes/logs").join(format!("{}_stdout", sanitize(&id)));
        let log_stderr = tuttle_dir.join("processes/logs").join(format!("{}_err", sanitize(&id)));
        Self {
            id,
            processor_name: processor_name.into(),
            code: code.into(),
            inputs,
            outputs,
            is_preprocess,
            reserved_dir,
            log_stdout,
            log_stderr,
            start: None,
            end: None,
            success: None,
            error_message: None,
        }
    }
}

/// Filesystem-safe stand-in for a resource URL used as a directory/file
/// name component.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// The resource table entry: just the logical creator relation, not the
/// [`crate::resource::Resource`] trait object itself (those are
/// constructed on demand through the [`Registry`]).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceEntry {
    pub creator_process_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub resources: IndexMap<String, ResourceEntry>,
    pub processes: Vec<Process>,
    pub signatures: SignatureStore,
    /// Resources carried over from the previous run that invalidation
    /// found still valid — treated as already-satisfied inputs without
    /// re-running their (absent, in this run) creator.
    pub carried_over_valid: HashSet<String>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            resources: IndexMap::new(),
            processes: Vec::new(),
            signatures: SignatureStore::new(),
            carried_over_valid: HashSet::new(),
        }
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a workflow from the already-expanded section list (see
    /// [`crate::preprocess::expand`]), deriving each process's id from its
    /// position so two sections with no outputs don't collide.
    pub fn from_sections(sections: Vec<SectionDict>, tuttle_dir: &std::path::Path) -> Result<Self> {
        let mut workflow = Self::new();
        for (position, section) in sections.into_iter().enumerate() {
            let process = Process::new(
                section.processor.unwrap_or_else(|| "shell".to_string()),
                section.process_code,
                section.inputs,
                section.outputs,
                section.is_preprocess,
                position,
                tuttle_dir,
            );
            workflow.add_process(process)?;
        }
        Ok(workflow)
    }

    fn touch_resource(&mut self, url: &str) {
        self.resources.entry(url.to_string()).or_default();
    }

    /// Adds `process`, failing if any of its outputs already has a
    /// creator.
    pub fn add_process(&mut self, process: Process) -> Result<()> {
        for output in &process.outputs {
            if let Some(entry) = self.resources.get(output) {
                if entry.creator_process_id.is_some() {
                    return DuplicateProducerSnafu { url: output.clone() }.fail();
                }
            }
        }
        for input in &process.inputs {
            self.touch_resource(input);
        }
        for output in &process.outputs {
            self.touch_resource(output);
            self.resources.get_mut(output).expect("just touched").creator_process_id = Some(process.id.clone());
        }
        self.processes.push(process);
        Ok(())
    }

    pub fn process(&self, id: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.id == id)
    }

    pub fn process_mut(&mut self, id: &str) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.id == id)
    }

    pub fn creator_of(&self, url: &str) -> Option<&str> {
        self.resources
            .get(url)
            .and_then(|e| e.creator_process_id.as_deref())
    }

    pub fn is_primary(&self, url: &str) -> bool {
        self.creator_of(url).is_none()
    }

    /// Primary resources that do not currently `exist()`.
    pub async fn missing_inputs(&self, registry: &Registry) -> Vec<String> {
        let mut missing = Vec::new();
        for url in self.resources.keys() {
            if !self.is_primary(url) {
                continue;
            }
            let exists = match registry.construct_resource(url) {
                Ok(resource) => resource.exists().await.unwrap_or(false),
                Err(_) => false,
            };
            if !exists {
                missing.push(url.clone());
            }
        }
        missing
    }

    /// Resources participating in a dependency cycle, found by DFS over
    /// the input-resource -> output-resource adjacency with white/gray/
    /// black colouring.
    pub fn circular_references(&self) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for process in &self.processes {
            for input in &process.inputs {
                for output in &process.outputs {
                    adjacency.entry(input.as_str()).or_default().push(output.as_str());
                }
            }
        }

        let mut color: HashMap<&str, Color> = self.resources.keys().map(|u| (u.as_str(), Color::White)).collect();
        let mut in_cycle: HashSet<String> = HashSet::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            color: &mut HashMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
            in_cycle: &mut HashSet<String>,
        ) {
            color.insert(node, Color::Gray);
            stack.push(node);
            if let Some(successors) = adjacency.get(node) {
                for &successor in successors {
                    match color.get(successor).copied().unwrap_or(Color::White) {
                        Color::White => visit(successor, adjacency, color, stack, in_cycle),
                        Color::Gray => {
                            if let Some(pos) = stack.iter().position(|&n| n == successor) {
                                for &n in &stack[pos..] {
                                    in_cycle.insert(n.to_string());
                                }
                            }
                        }
                        Color::Black => {}
                    }
                }
            }
            stack.pop();
            color.insert(node, Color::Black);
        }

        let nodes: Vec<&str> = self.resources.keys().map(|s| s.as_str()).collect();
        for node in nodes {
            if color.get(node).copied().unwrap_or(Color::White) == Color::White {
                visit(node, &adjacency, &mut color, &mut Vec::new(), &mut in_cycle);
            }
        }
        in_cycle.into_iter().collect()
    }

    fn inputs_satisfied(&self, process: &Process) -> bool {
        process.inputs.iter().all(|input| {
            if self.carried_over_valid.contains(input) {
                return true;
            }
            match self.creator_of(input) {
                None => true, // primary; missing_inputs() already validated existence
                Some(creator_id) => self
                    .process(creator_id)
                    .map(|p| p.success == Some(true))
                    .unwrap_or(false),
            }
        })
    }

    /// Processes whose `start` is unset and all of whose inputs are
    /// satisfied.
    pub fn runnable_processes(&self) -> Vec<&Process> {
        self.processes
            .iter()
            .filter(|p| p.start.is_none() && self.inputs_satisfied(p))
            .collect()
    }

    /// Downstream processes that became runnable as a consequence of
    /// `just_finished` completing successfully.
    pub fn discover_runnable_processes(&self, just_finished: &str) -> Vec<&Process> {
        let Some(finished) = self.process(just_finished) else {
            return Vec::new();
        };
        let outputs: HashSet<&str> = finished.outputs.iter().map(|s| s.as_str()).collect();
        self.processes
            .iter()
            .filter(|p| p.start.is_none())
            .filter(|p| p.inputs.iter().any(|i| outputs.contains(i.as_str())))
            .filter(|p| self.inputs_satisfied(p))
            .collect()
    }

    pub fn iter_processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn iter_outputs<'a>(&self, process: &'a Process) -> impl Iterator<Item = &'a String> {
        process.outputs.iter()
    }

    pub fn iter_inputs<'a>(&self, process: &'a Process) -> impl Iterator<Item = &'a String> {
        process.inputs.iter()
    }

    /// Validates the two structural invariants that must hold before the
    /// scheduler may run: no missing primary inputs, and acyclic.
    pub async fn validate(&self, registry: &Registry) -> Result<()> {
        let missing = self.missing_inputs(registry).await;
        if !missing.is_empty() {
            return MissingInputsSnafu { urls: missing }.fail();
        }
        let cycle = self.circular_references();
        if !cycle.is_empty() {
            return CycleSnafu { urls: cycle }.fail();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn process(id_hint: &str, inputs: Vec<&str>, outputs: Vec<&str>) -> Process {
        Process::new(
            "shell",
            "true",
            inputs.into_iter().map(String::from).collect(),
            outputs.into_iter().map(String::from).collect(),
            false,
            0,
            Path::new(&format!("/tmp/.tuttle-{id_hint}")),
        )
    }

    #[test]
    fn add_process_rejects_duplicate_producer() {
        let mut wf = Workflow::new();
        wf.add_process(process("a", vec![], vec!["file:///b"])).unwrap();
        let err = wf.add_process(process("b", vec![], vec!["file:///b"])).unwrap_err();
        assert!(matches!(err, Error::DuplicateProducer { .. }));
    }

    #[test]
    fn runnable_processes_requires_satisfied_inputs() {
        let mut wf = Workflow::new();
        wf.add_process(process("a", vec!["file:///a"], vec!["file:///b"])).unwrap();
        // primary input file:///a has no creator, so is considered satisfied
        let runnable = wf.runnable_processes();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].outputs[0], "file:///b");
    }

    #[test]
    fn discover_runnable_processes_after_success() {
        let mut wf = Workflow::new();
        wf.add_process(process("a", vec![], vec!["file:///a"])).unwrap();
        wf.add_process(process("b", vec!["file:///a"], vec!["file:///b"])).unwrap();
        wf.process_mut("file:///a").unwrap().success = Some(true);
        wf.process_mut("file:///a").unwrap().start = Some(1);
        let downstream = wf.discover_runnable_processes("file:///a");
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].id, "file:///b");
    }

    #[test]
    fn circular_references_detects_cycle() {
        let mut wf = Workflow::new();
        wf.add_process(process("a", vec!["file:///x"], vec!["file:///y"])).unwrap();
        wf.add_process(process("b", vec!["file:///y"], vec!["file:///x"])).unwrap();
        let cycle = wf.circular_references();
        assert!(cycle.contains(&"file:///x".to_string()));
        assert!(cycle.contains(&"file:///y".to_string()));
    }

    #[test]
    fn acyclic_workflow_has_no_circular_references() {
        let mut wf = Workflow::new();
        wf.add_process(process("a", vec![], vec!["file:///a"])).unwrap();
        wf.add_process(process("b", vec!["file:///a"], vec!["file:///b"])).unwrap();
        assert!(wf.circular_references().is_empty());
    }

    #[test]
    fn from_sections_builds_a_workflow() {
        let sections = crate::parser::parse("file://B <- file://A\n    cp A B\n").unwrap();
        let wf = Workflow::from_sections(sections, Path::new("/tmp/.tuttle-from-sections")).unwrap();
        assert_eq!(wf.processes.len(), 1);
        assert_eq!(wf.processes[0].outputs, vec!["file://B".to_string()]);
    }
}

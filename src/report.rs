//! Shapes a [`Workflow`] into an HTML status report and a Graphviz DOT
//! export, for the `tuttle run --report` and `tuttle visualize`
//! surfaces. Grounded on the original HTML/DOT reporters; re-expressed with
//! `minijinja` (already pulled in for [`crate::extension`]) instead of a
//! bespoke template file, and `petgraph`'s own DOT writer instead of a
//! hand-rolled one.

use std::path::Path;

use minijinja::{context, Environment};
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use snafu::prelude::*;

use crate::workflow::Workflow;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to render report: {source}"))]
    Render { source: minijinja::Error },

    #[snafu(display("Failed to write {path}: {source}"))]
    Io { path: String, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

const REPORT_TEMPLATE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>tuttle report</title></head>
<body>
<h1>Workflow report</h1>
<table border="1" cellspacing="0" cellpadding="4">
<tr><th>process</th><th>processor</th><th>start</th><th>end</th><th>duration (s)</th><th>success</th></tr>
{% for p in processes %}
<tr>
  <td>{{ p.id }}</td>
  <td>{{ p.processor }}</td>
  <td>{{ p.start }}</td>
  <td>{{ p.end }}</td>
  <td>{{ p.duration }}</td>
  <td>{{ p.success }}</td>
</tr>
{% endfor %}
</table>
<pre>{{ dot_src }}</pre>
</body>
</html>
"#;

fn nice_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < 1000 {
        format!("{bytes} B")
    } else if bytes < 1_000_000 {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < 1_000_000_000 {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

fn nice_file_size(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => "empty".to_string(),
        Ok(meta) => nice_size(meta.len()),
        Err(_) => "empty".to_string(),
    }
}

fn format_process(workflow: &Workflow, process: &crate::workflow::Process) -> minijinja::Value {
    let duration = match (process.start, process.end) {
        (Some(start), Some(end)) => (end - start).to_string(),
        _ => String::new(),
    };
    context! {
        id => process.id.clone(),
        processor => process.processor_name.clone(),
        start => process.start.map(|s| s.to_string()).unwrap_or_default(),
        end => process.end.map(|s| s.to_string()).unwrap_or_default(),
        duration => duration,
        log_stdout => process.log_stdout.display().to_string(),
        log_stdout_size => nice_file_size(&process.log_stdout),
        log_stderr => process.log_stderr.display().to_string(),
        log_stderr_size => nice_file_size(&process.log_stderr),
        success => process.success,
        code => process.code.clone(),
        inputs => process.inputs.clone(),
        outputs => process.outputs.clone(),
        error_message => process.error_message.clone().unwrap_or_default(),
    }
}

/// Builds the resource-level dependency graph: one node per resource URL,
/// one edge per input -> output relation through a process.
pub fn build_graph(workflow: &Workflow) -> DiGraph<String, ()> {
    let mut graph = DiGraph::new();
    let mut nodes = std::collections::HashMap::new();
    for url in workflow.resources.keys() {
        nodes.insert(url.clone(), graph.add_node(url.clone()));
    }
    for process in workflow.iter_processes() {
        for input in &process.inputs {
            for output in &process.outputs {
                if let (Some(&from), Some(&to)) = (nodes.get(input), nodes.get(output)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
    }
    graph
}

pub fn dot_export(workflow: &Workflow) -> String {
    let graph = build_graph(workflow);
    format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
}

pub fn render_html_report(workflow: &Workflow) -> Result<String> {
    let processes: Vec<minijinja::Value> = workflow.iter_processes().map(|p| format_process(workflow, p)).collect();
    let mut env = Environment::new();
    env.add_template("report", REPORT_TEMPLATE).context(RenderSnafu)?;
    let template = env.get_template("report").context(RenderSnafu)?;
    template
        .render(context! { processes => processes, dot_src => dot_export(workflow) })
        .context(RenderSnafu)
}

pub fn write_html_report(workflow: &Workflow, dest: &Path) -> Result<()> {
    let html = render_html_report(workflow)?;
    std::fs::write(dest, html).with_context(|_| IoSnafu { path: dest.display().to_string() })
}

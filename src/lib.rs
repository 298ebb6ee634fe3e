//! # Tuttle
//!
//! Tuttle is a make-like workflow runner: a workflow is a set of
//! *processes*, each declaring the *resources* it reads and the
//! resources it produces. Tuttle builds the dependency graph between
//! them, figures out which outputs are stale relative to the last run,
//! and re-executes only what changed — in parallel, where the graph
//! allows it.
//!
//! ## Core Modules
//!
//! - [`workflow`] - the in-memory process/resource DAG
//! - [`resource`] and [`processor`] - the pluggable kinds of things a
//!   workflow can depend on and the pluggable ways of producing them
//! - [`registry`] and [`builder`] - wiring resource schemes and
//!   processors together, and a fluent way to extend the defaults
//! - [`invalidation`] - diffing a run against the previous one to decide
//!   what needs to be rebuilt
//! - [`scheduler`] - the bounded worker pool that runs the DAG
//! - [`persistence`] - atomic on-disk state between runs
//! - [`parser`] and [`extension`] - the workflow-file grammar and its
//!   code-generation/templating mechanism
//! - [`report`] - HTML and Graphviz DOT views of a workflow
//!
//! ## Command-Line Interface
//!
//! ```bash
//! # Run a workflow, rebuilding only what's stale
//! tuttle run build.tuttle
//!
//! # Check a workflow's structure without running it
//! tuttle validate build.tuttle
//!
//! # Render a workflow's resource graph
//! tuttle visualize build.tuttle -f dot -o graph.dot
//! ```
//!
//! ## Configuration
//!
//! Tuttle can be configured via:
//! - Configuration file (`tuttle.yaml`)
//! - Environment variables (prefix: `TUTTLE__`)
//! - Command-line arguments
//!
//! See [`config::TuttleConfig`] for available options.

pub mod builder;
pub mod cmd;
pub mod config;
pub mod extension;
pub mod invalidation;
pub mod log_tail;
pub mod output;
pub mod parser;
pub mod persistence;
pub mod preprocess;
pub mod processor;
pub mod registry;
pub mod report;
pub mod resource;
pub mod scheduler;
pub mod signature;
pub mod workflow;

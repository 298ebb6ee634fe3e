//! Runs `#! preprocess` sections ahead of the main DAG. Each preprocess
//! section's code is executed directly — typically invoking
//! `tuttle-extend-workflow` — and writes a fragment under
//! `.tuttle/extensions/`; once every preprocess section has run, those
//! fragments are concatenated back onto the workflow text and the whole
//! thing is re-parsed so the real DAG sees the expanded sections.

use std::path::Path;

use snafu::prelude::*;

use crate::extension;
use crate::parser::{self, SectionDict};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to parse workflow text: {source}"))]
    Parse { source: parser::Error },

    #[snafu(display("Preprocess section for {outputs:?} failed to start: {source}"))]
    Spawn { outputs: Vec<String>, source: std::io::Error },

    #[snafu(display("Preprocess section for {outputs:?} exited with status {status}"))]
    NonZeroExit { outputs: Vec<String>, status: String },

    #[snafu(display("Failed to concatenate extension fragments: {source}"))]
    Concatenate { source: std::io::Error },

    #[snafu(display("Failed to reparse workflow text with extensions: {source}"))]
    Reparse { source: parser::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs every preprocess section in `text`, then returns the real,
/// non-preprocess sections of `text` plus whatever the preprocess sections
/// produced under `tuttle_dir/extensions`.
pub async fn expand(text: &str, tuttle_dir: &Path) -> Result<Vec<SectionDict>> {
    let sections = parser::parse(text).context(ParseSnafu)?;

    for section in &sections {
        if !section.is_preprocess {
            continue;
        }
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&section.process_code)
            .env("TUTTLE_ENV", tuttle_dir)
            .status()
            .await
            .with_context(|_| SpawnSnafu {
                outputs: section.outputs.clone(),
            })?;
        if !status.success() {
            return NonZeroExitSnafu {
                outputs: section.outputs.clone(),
                status: status.to_string(),
            }
            .fail();
        }
    }

    let extensions_dir = tuttle_dir.join("extensions");
    let combined = extension::concatenate_with_extensions(text, &extensions_dir).context(ConcatenateSnafu)?;
    let combined_sections = parser::parse(&combined).context(ReparseSnafu)?;
    Ok(combined_sections.into_iter().filter(|s| !s.is_preprocess).collect())
}

//! Processor kinds: the runtime that executes a process's code. Like
//! [`crate::resource`], modelled as a tagged union rather than dynamic
//! dispatch so the registry can hold plain trait objects without reflection.

use async_trait::async_trait;
use snafu::prelude::*;
use std::path::Path;
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::resource::extract_scheme;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{processor} processor: {message}"))]
    PreCheck { processor: String, message: String },

    #[snafu(display("{processor} processor: {message}"))]
    StaticCheck { processor: String, message: String },

    #[snafu(display("Failed to spawn process: {source}"))]
    Spawn { source: std::io::Error },

    #[snafu(display("Failed to open log file {path}: {source}"))]
    LogFile { path: String, source: std::io::Error },

    #[snafu(display("Process exited with status {status}"))]
    NonZeroExit { status: String },

    #[snafu(display("{message}: {source}"))]
    Download { message: String, source: reqwest::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single unit of work to hand to a [`Processor`]: the textual code plus
/// the resource URLs it reads and writes. Deliberately decoupled from
/// [`crate::workflow::Process`] so processors don't need to know about the
/// workflow graph.
pub struct Job<'a> {
    pub code: &'a str,
    pub inputs: &'a [String],
    pub outputs: &'a [String],
    pub reserved_dir: &'a Path,
    pub stdout_path: &'a Path,
    pub stderr_path: &'a Path,
}

#[async_trait]
pub trait Processor: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// True for processors whose processes run in the preprocess phase
    /// (e.g. because the process itself was declared `#! preprocess`, or
    /// because the processor always runs ahead of the main DAG).
    fn is_preprocess(&self, declared_preprocess: bool) -> bool {
        declared_preprocess
    }

    /// Pre-parse-time validity of code and resource schemes.
    fn static_check(&self, code: &str, inputs: &[String], outputs: &[String]) -> Result<()>;

    /// Pre-run validity, e.g. "download processor requires one http(s)
    /// input and one file output".
    fn pre_check(&self, inputs: &[String], outputs: &[String]) -> Result<()>;

    async fn run(&self, job: Job<'_>) -> Result<()>;
}

/// The always-resolving default processor: runs `code` as a POSIX shell
/// script with `cwd` set to the process's reserved directory.
#[derive(Debug, Default)]
pub struct ShellProcessor;

impl ShellProcessor {
    pub const NAME: &'static str = "shell";
}

#[async_trait]
impl Processor for ShellProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn static_check(&self, _code: &str, _inputs: &[String], _outputs: &[String]) -> Result<()> {
        Ok(())
    }

    fn pre_check(&self, _inputs: &[String], _outputs: &[String]) -> Result<()> {
        Ok(())
    }

    async fn run(&self, job: Job<'_>) -> Result<()> {
        let stdout_file = File::create(job.stdout_path)
            .await
            .with_context(|_| LogFileSnafu {
                path: job.stdout_path.display().to_string(),
            })?;
        let stderr_file = File::create(job.stderr_path)
            .await
            .with_context(|_| LogFileSnafu {
                path: job.stderr_path.display().to_string(),
            })?;

        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(job.code)
            .current_dir(job.reserved_dir)
            .stdout(stdout_file.into_std().await)
            .stderr(stderr_file.into_std().await)
            .stdin(Stdio::null())
            .status()
            .await
            .context(SpawnSnafu)?;

        if !status.success() {
            return NonZeroExitSnafu {
                status: status.to_string(),
            }
            .fail();
        }
        Ok(())
    }
}

/// Downloads a single `http(s)://` input to a single `file://` output.
#[derive(Debug, Default)]
pub struct DownloadProcessor;

impl DownloadProcessor {
    pub const NAME: &'static str = "download";
}

#[async_trait]
impl Processor for DownloadProcessor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_preprocess(&self, _declared_preprocess: bool) -> bool {
        false
    }

    fn static_check(&self, _code: &str, inputs: &[String], outputs: &[String]) -> Result<()> {
        self.pre_check(inputs, outputs)
    }

    fn pre_check(&self, inputs: &[String], outputs: &[String]) -> Result<()> {
        let http_inputs = inputs
            .iter()
            .filter(|u| matches!(extract_scheme(u), Some("http") | Some("https")))
            .count();
        let file_outputs = outputs
            .iter()
            .filter(|u| matches!(extract_scheme(u), Some("file")))
            .count();
        if http_inputs != 1 || outputs.len() != 1 || file_outputs != 1 {
            return PreCheckSnafu {
                processor: "Download".to_string(),
                message: "requires exactly one http(s):// input and one file:// output".to_string(),
            }
            .fail();
        }
        Ok(())
    }

    async fn run(&self, job: Job<'_>) -> Result<()> {
        let input_url = &job.inputs[0];
        let output_url = &job.outputs[0];
        let path = output_url
            .strip_prefix("file://")
            .unwrap_or(output_url.as_str());

        let mut stdout = File::create(job.stdout_path)
            .await
            .with_context(|_| LogFileSnafu {
                path: job.stdout_path.display().to_string(),
            })?;

        let client = reqwest::Client::new();
        let mut resp = client
            .get(input_url)
            .send()
            .await
            .map_err(|source| Error::Download {
                message: format!("GET {input_url} failed"),
                source,
            })?;

        let mut file = File::create(path).await.with_context(|_| LogFileSnafu {
            path: path.to_string(),
        })?;
        let mut received: u64 = 0;
        while let Some(chunk) = resp.chunk().await.map_err(|source| Error::Download {
            message: format!("reading body of {input_url} failed"),
            source,
        })? {
            file.write_all(&chunk)
                .await
                .with_context(|_| LogFileSnafu { path: path.to_string() })?;
            received += chunk.len() as u64;
            if received % (256 * 1024) < chunk.len() as u64 {
                let _ = stdout.write_all(b"...\n").await;
            }
        }
        let _ = stdout.write_all(b"done.\n").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_pre_check_rejects_missing_http_input() {
        let p = DownloadProcessor;
        let err = p
            .pre_check(&[], &["http://www.google.com/".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("Download processor"));
    }

    #[test]
    fn download_pre_check_accepts_http_in_file_out() {
        let p = DownloadProcessor;
        p.pre_check(
            &["http://example.com/a".to_string()],
            &["file:///tmp/a".to_string()],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn shell_processor_runs_and_fails_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let stdout = dir.path().join("out");
        let stderr = dir.path().join("err");
        let p = ShellProcessor;
        let job = Job {
            code: "exit 3",
            inputs: &[],
            outputs: &[],
            reserved_dir: dir.path(),
            stdout_path: &stdout,
            stderr_path: &stderr,
        };
        let err = p.run(job).await.unwrap_err();
        assert!(matches!(err, Error::NonZeroExit { .. }));
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global configuration for tuttle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TuttleConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub validate: ValidateConfig,
    #[serde(default)]
    pub visualize: VisualizeConfig,
}

/// Configuration for the `run` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// State/log/extension directory, relative to the workflow file unless absolute.
    pub tuttle_dir: PathBuf,

    /// Number of concurrent workers. `None` derives `max(1, (cpus+1)/2)`.
    pub jobs: Option<usize>,

    /// Keep running independent branches after a failure instead of
    /// stopping as soon as one is seen.
    #[serde(default)]
    pub keep_going: bool,

    /// Enable verbose/debug logging.
    #[serde(default)]
    pub verbose: bool,

    /// Escalate resources with no creation record from the previous run
    /// (`ModifiedOutsideTuttle`) to invalidation instead of only warning.
    #[serde(default)]
    pub strict_ownership: bool,

    /// Write an HTML status report to this path after the run.
    pub report: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tuttle_dir: PathBuf::from(".tuttle"),
            jobs: None,
            keep_going: false,
            verbose: false,
            strict_ownership: false,
            report: None,
        }
    }
}

/// Configuration for the `validate` command.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidateConfig {
    #[serde(default)]
    pub verbose: bool,
}

/// Configuration for the `visualize` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizeConfig {
    pub format: String,
}

impl Default for VisualizeConfig {
    fn default() -> Self {
        Self { format: "dot".to_string() }
    }
}

impl TuttleConfig {
    /// Loads configuration with precedence (lowest to highest): built-in
    /// defaults, `tuttle.yaml` in the current directory, `TUTTLE__*`
    /// environment variables. Command-line flags are merged on top by each
    /// subcommand's `merge_with_config`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_builder = config::Config::builder()
            .add_source(config::Config::try_from(&TuttleConfig::default())?)
            .add_source(
                config::File::with_name("tuttle")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("TUTTLE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = config_builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_run_config_derives_worker_count() {
        let config = RunConfig::default();
        assert_eq!(config.tuttle_dir, PathBuf::from(".tuttle"));
        assert!(config.jobs.is_none());
    }
}

//! exv.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{MAX_DURATION, parse_bounded};
use crate::types::{ExperimentDefinition, ServiceKind, ValueOverride};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentsConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub experiments: Vec<ExperimentDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub service_kind: ServiceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Release name passed to `helm install`.
    pub release: String,
    /// Chart directory; `helm install` runs inside it.
    pub chart_dir: PathBuf,
    /// Values file relative to `chart_dir`.
    pub values_file: String,
    pub helm_bin: String,
    /// Literal marker that must appear in the installer's output.
    pub success_marker: String,
    /// Services that must report a ready replica before the workload starts.
    pub required_services: Vec<String>,
    pub readiness_timeout: String,
    pub poll_interval: String,
    /// Delay between readiness and workload start. None means no delay.
    pub warmup: Option<String>,
    /// Overrides applied to every experiment before its own.
    pub base_overrides: Vec<ValueOverride>,
    pub autoscaling_target_percent: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            release: "app".to_string(),
            chart_dir: PathBuf::from("chart"),
            values_file: "values.yaml".to_string(),
            helm_bin: "helm".to_string(),
            success_marker: "STATUS: deployed".to_string(),
            required_services: Vec::new(),
            readiness_timeout: "180s".to_string(),
            poll_interval: "1s".to_string(),
            warmup: None,
            base_overrides: Vec::new(),
            autoscaling_target_percent: 80,
        }
    }
}

impl DeployConfig {
    pub fn readiness_timeout(&self) -> Duration {
        parse_bounded(&self.readiness_timeout).unwrap_or(Duration::from_secs(180))
    }

    pub fn poll_interval(&self) -> Duration {
        parse_bounded(&self.poll_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn warmup(&self) -> Option<Duration> {
        self.warmup
            .as_deref()
            .and_then(parse_bounded)
            .filter(|d| !d.is_zero())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub image: String,
    pub max_daily_users: u32,
    pub stage_duration: String,
    pub locustfile: String,
    /// Locust file used by ramp-up variants. Falls back to `locustfile`.
    pub rampup_locustfile: Option<String>,
    /// Base URL of the system under test, as seen from the workload.
    pub host: String,
    pub endpoint_name: String,
    pub use_current_time: bool,
    /// Extra environment applied before experiment overrides.
    pub env: BTreeMap<String, String>,
    pub label_key: String,
    pub label_value: String,
    /// Node label the workload must not be scheduled next to.
    pub avoid_node_label: Option<String>,
    pub working_dir: String,
    pub command: Vec<String>,
    pub timeout_multiplier: u32,
    pub timeout_margin: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: "loadgenerator".to_string(),
            max_daily_users: 1000,
            stage_duration: "60s".to_string(),
            locustfile: "locustfile.py".to_string(),
            rampup_locustfile: None,
            host: "http://webui".to_string(),
            endpoint_name: "Vanilla".to_string(),
            use_current_time: false,
            env: BTreeMap::new(),
            label_key: "app".to_string(),
            label_value: "loadgenerator".to_string(),
            avoid_node_label: Some("scaphandre".to_string()),
            working_dir: "/loadgenerator".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "locust --csv results --csv-full-history --headless --only-summary \
                 1>/dev/null 2>errors.log; \
                 tar zcf - results_stats.csv results_failures.csv results_stats_history.csv errors.log \
                 | base64 -w 0"
                    .to_string(),
            ],
            timeout_multiplier: 8,
            timeout_margin: "60s".to_string(),
        }
    }
}

impl WorkloadConfig {
    pub fn stage_duration(&self) -> Duration {
        parse_bounded(&self.stage_duration).unwrap_or(Duration::from_secs(60))
    }

    /// How long to wait for the workload to reach a terminal state:
    /// `stage_duration * timeout_multiplier + timeout_margin`.
    pub fn completion_timeout(&self) -> Duration {
        let margin = parse_bounded(&self.timeout_margin).unwrap_or(Duration::from_secs(60));
        self.stage_duration()
            .saturating_mul(self.timeout_multiplier)
            .saturating_add(margin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub steps: Vec<BuildStep>,
    pub local_platform: String,
    pub remote_platform: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            local_platform: "linux/amd64".to_string(),
            remote_platform: "linux/arm64".to_string(),
        }
    }
}

/// One external build command. `{branch}` and `{platform}` are substituted
/// in the arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// When set, the step's output must contain this marker.
    pub success_marker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub iterations: u32,
    pub output_root: PathBuf,
    /// Duplicate every experiment with the ramp-up workload profile.
    pub ramp_up_variants: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            output_root: PathBuf::from("data"),
            ramp_up_variants: false,
        }
    }
}

impl ExperimentsConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ExperimentsConfig = content.parse()?;
        tracing::debug!(?path, experiments = config.experiments.len(), "config loaded");
        Ok(config)
    }

    /// All experiments to run, including ramp-up variants when enabled.
    pub fn planned_experiments(&self) -> Vec<ExperimentDefinition> {
        let mut planned = self.experiments.clone();
        if self.batch.ramp_up_variants {
            planned.extend(self.experiments.iter().map(|e| e.ramp_up_variant()));
        }
        planned
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("deploy.readiness_timeout", Some(&self.deploy.readiness_timeout)),
            ("deploy.poll_interval", Some(&self.deploy.poll_interval)),
            ("deploy.warmup", self.deploy.warmup.as_ref()),
            ("workload.stage_duration", Some(&self.workload.stage_duration)),
            ("workload.timeout_margin", Some(&self.workload.timeout_margin)),
        ];
        for (key, value) in durations {
            if let Some(value) = value {
                if parse_bounded(value).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{key}: bad duration {value:?} (at most {}s)",
                        MAX_DURATION.as_secs()
                    )));
                }
            }
        }

        if self.deploy.required_services.is_empty() {
            return Err(ConfigError::Invalid(
                "deploy.required_services must not be empty".to_string(),
            ));
        }
        if self.deploy.readiness_timeout().is_zero() || self.deploy.poll_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "readiness timeout and poll interval must be positive".to_string(),
            ));
        }
        if self.batch.iterations == 0 {
            return Err(ConfigError::Invalid("batch.iterations must be at least 1".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for exp in self.planned_experiments() {
            if exp.namespace.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "experiment {} has no namespace",
                    exp.name
                )));
            }
            if !seen.insert(exp.id()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate experiment id {}",
                    exp.id()
                )));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ExperimentsConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ExperimentsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

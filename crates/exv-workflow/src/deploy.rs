//! Deployment collaborator.
//!
//! [`HelmDeployer`] patches the chart's values file, keeps a copy of the
//! exact values next to the iteration's observations, and installs the
//! release with `helm`. Every experiment is patched from the chart's
//! untouched values, saved once as `<values_file>.orig`. Success is recognised only by the literal marker
//! in the installer's output, whatever the exit code.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use exv_core::config::DeployConfig;
use exv_core::{AutoscalingMode, ExperimentDefinition, ValueOverride};

use crate::error::DeployError;
use crate::patch;
use crate::process;

/// Name of the values copy written into every observation directory.
pub const VALUES_SNAPSHOT: &str = "values.yaml";

const AUTOSCALING_ENABLED: &str = "autoscaling.enabled";
const CPU_TARGET: &str = "autoscaling.targetCPUUtilizationPercentage";
const MEMORY_TARGET: &str = "autoscaling.targetMemoryUtilizationPercentage";

/// Installs and removes the release under test.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Install the release for `experiment`, persisting the values used
    /// into `observations`.
    async fn deploy(
        &self,
        experiment: &ExperimentDefinition,
        observations: &Path,
    ) -> Result<(), DeployError>;

    /// Remove the release. A release that is not installed is not an error.
    async fn teardown(&self, experiment: &ExperimentDefinition) -> Result<(), DeployError>;
}

/// Value overrides implied by an autoscaling mode.
pub fn autoscaling_overrides(mode: AutoscalingMode, target_percent: u32) -> Vec<ValueOverride> {
    match mode {
        AutoscalingMode::Off => vec![ValueOverride::set(AUTOSCALING_ENABLED, false)],
        AutoscalingMode::Cpu => vec![
            ValueOverride::set(AUTOSCALING_ENABLED, true),
            ValueOverride::set(CPU_TARGET, target_percent),
        ],
        AutoscalingMode::Memory => vec![
            ValueOverride::set(AUTOSCALING_ENABLED, true),
            ValueOverride::remove(CPU_TARGET),
            ValueOverride::set(MEMORY_TARGET, target_percent),
        ],
        AutoscalingMode::Both => vec![
            ValueOverride::set(AUTOSCALING_ENABLED, true),
            ValueOverride::set(CPU_TARGET, target_percent),
            ValueOverride::set(MEMORY_TARGET, target_percent),
        ],
    }
}

/// Deploys with the `helm` CLI from a local chart directory.
#[derive(Debug, Clone)]
pub struct HelmDeployer {
    config: DeployConfig,
}

impl HelmDeployer {
    pub fn new(config: DeployConfig) -> Self {
        Self { config }
    }

    fn values_path(&self) -> PathBuf {
        self.config.chart_dir.join(&self.config.values_file)
    }

    fn pristine_path(&self) -> PathBuf {
        self.config
            .chart_dir
            .join(format!("{}.orig", self.config.values_file))
    }

    /// The chart's values as shipped. The first call saves them aside so
    /// later experiments never start from a patched file.
    async fn base_values(&self) -> Result<String, DeployError> {
        let pristine = self.pristine_path();
        let from = if tokio::fs::try_exists(&pristine).await.unwrap_or(false) {
            pristine.clone()
        } else {
            self.values_path()
        };
        let text = tokio::fs::read_to_string(&from)
            .await
            .map_err(|source| DeployError::ReadValues { path: from.clone(), source })?;
        if from != pristine {
            self.write_values(&pristine, &text).await?;
            debug!(path = %pristine.display(), "saved pristine values");
        }
        Ok(text)
    }

    /// Base overrides, then the autoscaling mode, then the experiment's own.
    pub fn overrides_for(&self, experiment: &ExperimentDefinition) -> Vec<ValueOverride> {
        let mut all = self.config.base_overrides.clone();
        all.extend(autoscaling_overrides(
            experiment.autoscaling,
            self.config.autoscaling_target_percent,
        ));
        all.extend(experiment.overrides.iter().cloned());
        all
    }

    async fn write_values(&self, path: &Path, values: &str) -> Result<(), DeployError> {
        tokio::fs::write(path, values)
            .await
            .map_err(|source| DeployError::WriteValues {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl Deployer for HelmDeployer {
    async fn deploy(
        &self,
        experiment: &ExperimentDefinition,
        observations: &Path,
    ) -> Result<(), DeployError> {
        let values_path = self.values_path();
        let original = self.base_values().await?;

        let overrides = self.overrides_for(experiment);
        let values = patch::patch_document(&original, &overrides)?;
        debug!(
            path = %values_path.display(),
            overrides = overrides.len(),
            "values patched"
        );

        self.write_values(&values_path, &values).await?;
        self.write_values(&observations.join(VALUES_SNAPSHOT), &values)
            .await?;

        let args = vec![
            "install".to_string(),
            self.config.release.clone(),
            "-n".to_string(),
            experiment.namespace.clone(),
            ".".to_string(),
        ];
        info!(
            release = %self.config.release,
            namespace = %experiment.namespace,
            branch = %experiment.target_branch,
            "installing release"
        );
        let output =
            process::run(&self.config.helm_bin, &args, Some(&self.config.chart_dir)).await?;

        if !output.contains(&self.config.success_marker) {
            return Err(DeployError::MissingMarker {
                marker: self.config.success_marker.clone(),
                output: output.combined(),
            });
        }
        if !output.success() {
            warn!(code = ?output.code, "installer reported success with a non-zero exit");
        }
        info!(release = %self.config.release, namespace = %experiment.namespace, "release deployed");
        Ok(())
    }

    async fn teardown(&self, experiment: &ExperimentDefinition) -> Result<(), DeployError> {
        let args = vec![
            "uninstall".to_string(),
            self.config.release.clone(),
            "-n".to_string(),
            experiment.namespace.clone(),
        ];
        let output =
            process::run(&self.config.helm_bin, &args, Some(&self.config.chart_dir)).await?;
        if output.success() {
            info!(release = %self.config.release, namespace = %experiment.namespace, "release removed");
            return Ok(());
        }
        if output.contains("not found") {
            debug!(release = %self.config.release, "release already removed");
            return Ok(());
        }
        Err(DeployError::Teardown {
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exv_core::WorkloadProfile;
    use std::collections::BTreeMap;

    fn experiment(mode: AutoscalingMode) -> ExperimentDefinition {
        ExperimentDefinition {
            name: "scaling".to_string(),
            target_branch: "main".to_string(),
            namespace: "exp".to_string(),
            autoscaling: mode,
            overrides: vec![ValueOverride::set("webui.replicas", 2)],
            workload_env: BTreeMap::new(),
            tags: Vec::new(),
            colocated_workload: false,
            profile: WorkloadProfile::Standard,
        }
    }

    #[test]
    fn autoscaling_off_disables_explicitly() {
        assert_eq!(
            autoscaling_overrides(AutoscalingMode::Off, 80),
            vec![ValueOverride::set(AUTOSCALING_ENABLED, false)]
        );
    }

    #[test]
    fn memory_mode_drops_cpu_target() {
        let ops = autoscaling_overrides(AutoscalingMode::Memory, 70);
        assert!(ops.contains(&ValueOverride::remove(CPU_TARGET)));
        assert!(ops.contains(&ValueOverride::set(MEMORY_TARGET, 70)));
        assert!(ops.contains(&ValueOverride::set(AUTOSCALING_ENABLED, true)));
    }

    #[test]
    fn both_mode_sets_both_targets() {
        let ops = autoscaling_overrides(AutoscalingMode::Both, 80);
        assert!(ops.contains(&ValueOverride::set(CPU_TARGET, 80)));
        assert!(ops.contains(&ValueOverride::set(MEMORY_TARGET, 80)));
    }

    #[test]
    fn experiment_overrides_apply_last() {
        let deployer = HelmDeployer::new(DeployConfig {
            base_overrides: vec![ValueOverride::set("webui.replicas", 1)],
            ..Default::default()
        });
        let ops = deployer.overrides_for(&experiment(AutoscalingMode::Cpu));
        assert_eq!(ops.first(), Some(&ValueOverride::set("webui.replicas", 1)));
        assert_eq!(ops.last(), Some(&ValueOverride::set("webui.replicas", 2)));
        assert_eq!(ops.len(), 4);
    }

    #[cfg(unix)]
    mod helm {
        use super::*;

        /// Chart dir with a values file. The installer is `sh`, so
        /// `sh install ...` and `sh uninstall ...` run the scripts below,
        /// which record their arguments and print `reply`.
        fn fixture(reply: &str, exit: i32) -> (tempfile::TempDir, DeployConfig) {
            let dir = tempfile::tempdir().unwrap();
            let chart = dir.path().join("chart");
            std::fs::create_dir_all(&chart).unwrap();
            std::fs::write(
                chart.join("values.yaml"),
                "autoscaling:\n  enabled: false\n  targetCPUUtilizationPercentage: 80\n",
            )
            .unwrap();

            let script = format!("echo \"$0 $*\" > args\necho \"{reply}\"\nexit {exit}\n");
            std::fs::write(chart.join("install"), &script).unwrap();
            std::fs::write(chart.join("uninstall"), &script).unwrap();

            let config = DeployConfig {
                chart_dir: chart,
                helm_bin: "sh".to_string(),
                ..Default::default()
            };
            (dir, config)
        }

        #[tokio::test]
        async fn deploy_patches_values_and_requires_marker() {
            let (dir, config) = fixture("NAME: app\nSTATUS: deployed", 0);
            let observations = dir.path().join("obs");
            std::fs::create_dir_all(&observations).unwrap();

            let deployer = HelmDeployer::new(config.clone());
            deployer
                .deploy(&experiment(AutoscalingMode::Memory), &observations)
                .await
                .unwrap();

            let args = std::fs::read_to_string(config.chart_dir.join("args")).unwrap();
            assert_eq!(args.trim(), "install app -n exp .");

            let snapshot = std::fs::read_to_string(observations.join(VALUES_SNAPSHOT)).unwrap();
            let chart_values =
                std::fs::read_to_string(config.chart_dir.join("values.yaml")).unwrap();
            assert_eq!(snapshot, chart_values);

            let doc: serde_yaml::Value = serde_yaml::from_str(&snapshot).unwrap();
            assert_eq!(doc["autoscaling"]["enabled"], serde_yaml::Value::from(true));
            assert!(doc["autoscaling"].get("targetCPUUtilizationPercentage").is_none());
            assert_eq!(
                doc["autoscaling"]["targetMemoryUtilizationPercentage"],
                serde_yaml::Value::from(80)
            );
            assert_eq!(doc["webui"]["replicas"], serde_yaml::Value::from(2));
        }

        #[tokio::test]
        async fn later_experiments_start_from_pristine_values() {
            let (dir, config) = fixture("STATUS: deployed", 0);
            let first = dir.path().join("mem");
            let second = dir.path().join("baseline");
            std::fs::create_dir_all(&first).unwrap();
            std::fs::create_dir_all(&second).unwrap();

            let mut memory = experiment(AutoscalingMode::Memory);
            memory.overrides = vec![ValueOverride::remove("autoscaling.targetCPUUtilizationPercentage")];
            let mut baseline = experiment(AutoscalingMode::Off);
            baseline.overrides = Vec::new();

            let deployer = HelmDeployer::new(config.clone());
            deployer.deploy(&memory, &first).await.unwrap();
            deployer.deploy(&baseline, &second).await.unwrap();

            let snapshot = std::fs::read_to_string(second.join(VALUES_SNAPSHOT)).unwrap();
            let doc: serde_yaml::Value = serde_yaml::from_str(&snapshot).unwrap();
            assert_eq!(doc["autoscaling"]["enabled"], serde_yaml::Value::from(false));
            assert_eq!(
                doc["autoscaling"]["targetCPUUtilizationPercentage"],
                serde_yaml::Value::from(80)
            );
            assert!(doc["autoscaling"].get("targetMemoryUtilizationPercentage").is_none());
            assert!(doc.get("webui").is_none());

            let pristine = std::fs::read_to_string(config.chart_dir.join("values.yaml.orig")).unwrap();
            assert!(pristine.contains("enabled: false"));
            assert!(!pristine.contains("targetMemoryUtilizationPercentage"));
        }

        #[tokio::test]
        async fn missing_marker_is_a_deploy_failure_even_on_exit_zero() {
            let (dir, config) = fixture("Error: INSTALLATION FAILED", 0);
            let deployer = HelmDeployer::new(config);
            let err = deployer
                .deploy(&experiment(AutoscalingMode::Off), dir.path())
                .await
                .unwrap_err();
            match err {
                DeployError::MissingMarker { marker, output } => {
                    assert_eq!(marker, "STATUS: deployed");
                    assert!(output.contains("INSTALLATION FAILED"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn teardown_swallows_not_found() {
            let (_dir, config) = fixture("Error: uninstall: Release not loaded: app: release: not found", 1);
            let deployer = HelmDeployer::new(config);
            deployer
                .teardown(&experiment(AutoscalingMode::Off))
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn teardown_reports_other_failures() {
            let (_dir, config) = fixture("Error: Kubernetes cluster unreachable", 1);
            let deployer = HelmDeployer::new(config);
            let err = deployer
                .teardown(&experiment(AutoscalingMode::Off))
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::Teardown { code: Some(1), .. }));
        }

        #[tokio::test]
        async fn missing_values_file_is_reported() {
            let (dir, mut config) = fixture("STATUS: deployed", 0);
            config.values_file = "missing.yaml".to_string();
            let err = HelmDeployer::new(config)
                .deploy(&experiment(AutoscalingMode::Off), dir.path())
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::ReadValues { .. }));
        }
    }
}

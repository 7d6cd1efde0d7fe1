//! Build collaborator: produces the images an experiment deploys.

use async_trait::async_trait;
use tracing::info;

use exv_core::ExperimentDefinition;
use exv_core::config::{BuildConfig, BuildStep};

use crate::error::BuildError;
use crate::process;

/// Builds and publishes everything one experiment needs.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, experiment: &ExperimentDefinition) -> Result<(), BuildError>;
}

/// Runs the configured build steps in order, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    config: BuildConfig,
}

impl CommandBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Colocated workloads run next to the driver, so they are built for
    /// the local platform.
    pub fn platform_for(&self, experiment: &ExperimentDefinition) -> &str {
        if experiment.colocated_workload {
            &self.config.local_platform
        } else {
            &self.config.remote_platform
        }
    }

    async fn run_step(
        &self,
        step_no: usize,
        step: &BuildStep,
        experiment: &ExperimentDefinition,
    ) -> Result<(), BuildError> {
        let platform = self.platform_for(experiment);
        let args: Vec<String> = step
            .args
            .iter()
            .map(|arg| substitute(arg, &experiment.target_branch, platform))
            .collect();

        info!(step = step_no, program = %step.program, ?args, "running build step");
        let output = process::run(&step.program, &args, step.cwd.as_deref())
            .await
            .map_err(|source| BuildError::Command {
                step: step_no,
                source,
            })?;

        if !output.success() {
            return Err(BuildError::Exit {
                step: step_no,
                program: step.program.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        if let Some(marker) = &step.success_marker {
            if !output.contains(marker) {
                return Err(BuildError::MissingMarker {
                    step: step_no,
                    program: step.program.clone(),
                    marker: marker.clone(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, experiment: &ExperimentDefinition) -> Result<(), BuildError> {
        info!(
            experiment = %experiment.id(),
            branch = %experiment.target_branch,
            steps = self.config.steps.len(),
            "building"
        );
        for (i, step) in self.config.steps.iter().enumerate() {
            self.run_step(i + 1, step, experiment).await?;
        }
        info!(experiment = %experiment.id(), "build finished");
        Ok(())
    }
}

fn substitute(arg: &str, branch: &str, platform: &str) -> String {
    arg.replace("{branch}", branch).replace("{platform}", platform)
}

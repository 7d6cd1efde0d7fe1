//! Experiment workflow: one iteration from output allocation to cleanup.
//!
//! 1. allocate the observation directory (collision fails before any
//!    cluster action)
//! 2. deploy the release
//! 3. wait for the required services
//! 4. optional warm-up delay
//! 5. launch, await, retrieve and delete the workload
//! 6. cleanup, whenever step 2 was reached
//!
//! Failures in steps 1 to 5 end the iteration, never the batch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use exv_cluster::{ControlPlane, LabelSelector};
use exv_core::cancel::{cancelled, is_cancelled};
use exv_core::config::WorkloadConfig;
use exv_core::{CancelReceiver, ExperimentDefinition, ExperimentsConfig, RunOptions};
use exv_readiness::{ReadinessOutcome, ReadinessWaiter};
use exv_workload::{LaunchConfig, TerminalState, WorkloadLifecycleManager};

use crate::deploy::Deployer;
use crate::error::{RunError, RunResult};
use crate::output;

/// Per-iteration knobs, resolved once from the configuration file.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub required_services: BTreeSet<String>,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub warmup: Option<Duration>,
    pub workload: WorkloadConfig,
}

impl WorkflowSettings {
    pub fn from_config(config: &ExperimentsConfig) -> Self {
        Self {
            required_services: config.deploy.required_services.iter().cloned().collect(),
            readiness_timeout: config.deploy.readiness_timeout(),
            poll_interval: config.deploy.poll_interval(),
            warmup: config.deploy.warmup(),
            workload: config.workload.clone(),
        }
    }

    /// Selects every load-generator unit.
    fn workload_selector(&self) -> LabelSelector {
        LabelSelector::new().with(&self.workload.label_key, &self.workload.label_value)
    }
}

/// What a completed iteration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationSummary {
    pub workload: String,
    pub terminal: TerminalState,
    pub result_files: usize,
}

/// Outcome of one iteration, successful or not.
#[derive(Debug)]
pub struct IterationOutcome {
    pub experiment: String,
    pub iteration: u32,
    pub observations: PathBuf,
    pub elapsed: Duration,
    pub result: RunResult<IterationSummary>,
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(RunError::Cancelled))
    }
}

/// Sequences the stages of one experiment iteration.
pub struct ExperimentWorkflow {
    deployer: Arc<dyn Deployer>,
    readiness: ReadinessWaiter,
    workloads: WorkloadLifecycleManager,
    settings: WorkflowSettings,
    options: RunOptions,
    cancel: CancelReceiver,
}

impl ExperimentWorkflow {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        deployer: Arc<dyn Deployer>,
        settings: WorkflowSettings,
        options: RunOptions,
        cancel: CancelReceiver,
    ) -> Self {
        Self {
            deployer,
            readiness: ReadinessWaiter::new(control_plane.clone()),
            workloads: WorkloadLifecycleManager::new(control_plane),
            settings,
            options,
            cancel,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Run one iteration of `experiment` under `output_root`.
    ///
    /// Never fails: errors are logged and returned inside the outcome.
    pub async fn run(
        &self,
        experiment: &ExperimentDefinition,
        iteration: u32,
        output_root: &Path,
    ) -> IterationOutcome {
        let started = Instant::now();
        let id = experiment.id();
        let observations = output::observation_dir(output_root, experiment, iteration);
        info!(
            experiment = %id,
            iteration,
            namespace = %experiment.namespace,
            dir = %observations.display(),
            "iteration starting"
        );

        let result = match output::prepare(&observations, self.options.reuse_output) {
            // Nothing was deployed, so there is nothing to clean up.
            Err(e) => Err(e),
            Ok(()) => {
                let result = self.execute(experiment, iteration, &observations).await;
                self.cleanup(experiment).await;
                result
            }
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(summary) => info!(
                experiment = %id,
                iteration,
                terminal = ?summary.terminal,
                files = summary.result_files,
                ?elapsed,
                "iteration finished"
            ),
            Err(e) => error!(
                experiment = %id,
                iteration,
                kind = e.kind(),
                error = %e,
                ?elapsed,
                "iteration failed"
            ),
        }

        IterationOutcome {
            experiment: id,
            iteration,
            observations,
            elapsed,
            result,
        }
    }

    async fn execute(
        &self,
        experiment: &ExperimentDefinition,
        iteration: u32,
        observations: &Path,
    ) -> RunResult<IterationSummary> {
        output::write_snapshot(observations, experiment)?;
        if is_cancelled(&self.cancel) {
            return Err(RunError::Cancelled);
        }

        self.deployer.deploy(experiment, observations).await?;

        let outcome = self
            .readiness
            .wait_for_ready(
                &self.settings.required_services,
                &experiment.namespace,
                self.settings.readiness_timeout,
                self.settings.poll_interval,
                self.cancel.clone(),
            )
            .await?;
        match outcome {
            ReadinessOutcome::Ready => {}
            ReadinessOutcome::Timeout { remaining } => {
                return Err(RunError::ReadinessTimeout { remaining });
            }
            ReadinessOutcome::Cancelled { .. } => return Err(RunError::Cancelled),
        }

        if let Some(warmup) = self.settings.warmup {
            info!(?warmup, "waiting before starting workload");
            let mut cancel = self.cancel.clone();
            tokio::select! {
                _ = tokio::time::sleep(warmup) => {}
                _ = cancelled(&mut cancel) => return Err(RunError::Cancelled),
            }
        }

        let launch = LaunchConfig::for_experiment(&self.settings.workload, experiment, iteration);
        let run = self
            .workloads
            .execute(&launch, observations, self.cancel.clone())
            .await?;

        match run.terminal {
            TerminalState::TimedOut => Err(RunError::WorkloadTimeout {
                name: run.name,
                timeout: launch.timeout,
            }),
            terminal => {
                if terminal == TerminalState::Failed {
                    warn!(workload = %run.name, "workload failed but produced results");
                }
                Ok(IterationSummary {
                    workload: run.name,
                    terminal,
                    result_files: run.results.map(|r| r.files.len()).unwrap_or(0),
                })
            }
        }
    }

    /// Remove whatever this iteration left in the cluster. Best effort.
    async fn cleanup(&self, experiment: &ExperimentDefinition) {
        let namespace = &experiment.namespace;
        let selector = self.settings.workload_selector();
        match self.workloads.cancel_all(namespace, &selector).await {
            Ok(0) => debug!(%namespace, "no leftover workloads"),
            Ok(n) => warn!(%namespace, deleted = n, "removed leftover workloads"),
            Err(e) => warn!(%namespace, error = %e, "failed to remove leftover workloads"),
        }
        if let Err(e) = self.deployer.teardown(experiment).await {
            warn!(%namespace, error = %e, "failed to remove release");
        }
    }
}

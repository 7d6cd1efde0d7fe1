//! Batch driver: every planned experiment, every iteration, one at a time.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use exv_core::cancel::is_cancelled;
use exv_core::{CancelReceiver, ExperimentDefinition, RunOptions};

use crate::build::Builder;
use crate::error::BuildError;
use crate::output;
use crate::workflow::{ExperimentWorkflow, IterationOutcome};

/// An experiment whose iterations were skipped because its build failed.
#[derive(Debug)]
pub struct BuildFailure {
    pub experiment: String,
    pub error: BuildError,
}

/// Everything a batch run did.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub iterations: Vec<IterationOutcome>,
    pub build_failures: Vec<BuildFailure>,
    /// The batch stopped early on a cancellation request.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.iterations.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.iterations.len() - self.succeeded()
    }

    pub fn log_summary(&self) {
        for outcome in &self.iterations {
            if let Err(e) = &outcome.result {
                warn!(
                    experiment = %outcome.experiment,
                    iteration = outcome.iteration,
                    kind = e.kind(),
                    "iteration failed"
                );
            }
        }
        for failure in &self.build_failures {
            warn!(experiment = %failure.experiment, error = %failure.error, "build failed");
        }
        info!(
            iterations = self.iterations.len(),
            succeeded = self.succeeded(),
            failed = self.failed(),
            build_failures = self.build_failures.len(),
            cancelled = self.cancelled,
            "batch finished"
        );
    }
}

/// Drives the workflow over a list of experiments.
pub struct BatchRunner {
    workflow: ExperimentWorkflow,
    builder: Arc<dyn Builder>,
    output_base: PathBuf,
    iterations: u32,
    options: RunOptions,
    cancel: CancelReceiver,
}

impl BatchRunner {
    pub fn new(
        workflow: ExperimentWorkflow,
        builder: Arc<dyn Builder>,
        output_base: PathBuf,
        iterations: u32,
        options: RunOptions,
        cancel: CancelReceiver,
    ) -> Self {
        Self {
            workflow,
            builder,
            output_base,
            iterations,
            options,
            cancel,
        }
    }

    /// Run every iteration of every experiment, strictly in sequence.
    ///
    /// A failed iteration or build never stops the batch; a cancellation
    /// request does.
    pub async fn run(&self, experiments: &[ExperimentDefinition]) -> BatchReport {
        let mut report = BatchReport::default();
        if self.options.dry_run {
            info!(experiments = experiments.len(), "dry run, nothing executed");
            return report;
        }
        if self.options.reuse_output {
            warn!("existing observation directories will be reused");
        }

        'experiments: for (n, experiment) in experiments.iter().enumerate() {
            if is_cancelled(&self.cancel) {
                report.cancelled = true;
                break;
            }
            info!(
                experiment = %experiment,
                position = n + 1,
                total = experiments.len(),
                "new experiment"
            );

            if self.options.skip_build {
                info!(experiment = %experiment.id(), "skipping build");
            } else if let Err(e) = self.builder.build(experiment).await {
                error!(experiment = %experiment.id(), error = %e, "build failed, skipping experiment");
                report.build_failures.push(BuildFailure {
                    experiment: experiment.id(),
                    error: e,
                });
                continue;
            }

            let root = output::observation_root(&self.output_base, experiment);
            for iteration in 0..self.iterations {
                if is_cancelled(&self.cancel) {
                    report.cancelled = true;
                    break 'experiments;
                }
                info!(
                    experiment = %experiment.id(),
                    run = iteration + 1,
                    of = self.iterations,
                    "running iteration"
                );
                let outcome = self.workflow.run(experiment, iteration, &root).await;
                let stop = outcome.is_cancelled();
                report.iterations.push(outcome);
                if stop {
                    report.cancelled = true;
                    break 'experiments;
                }
            }
        }

        report.log_summary();
        report
    }
}

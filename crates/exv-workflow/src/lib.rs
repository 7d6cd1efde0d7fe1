//! exv-workflow: sequencing of experiment iterations.
//!
//! [`ExperimentWorkflow`] runs one iteration of one experiment:
//! observation directory, deployment, readiness wait, optional warm-up,
//! workload, cleanup. Any failure is caught at that boundary, so
//! [`BatchRunner`] always moves on to the next iteration unless a
//! cancellation was requested.
//!
//! The external collaborators live here too, behind traits so tests can
//! replace them:
//!
//! - [`Deployer`] / [`HelmDeployer`]: values patching and `helm install`
//! - [`Builder`] / [`CommandBuilder`]: image build steps

pub mod batch;
pub mod build;
pub mod deploy;
pub mod error;
pub mod output;
pub mod patch;
pub mod plan;
pub mod process;
pub mod workflow;

pub use batch::{BatchReport, BatchRunner, BuildFailure};
pub use build::{Builder, CommandBuilder};
pub use deploy::{Deployer, HelmDeployer, autoscaling_overrides};
pub use error::{BuildError, CommandError, DeployError, RunError, RunResult};
pub use plan::render_plan;
pub use workflow::{ExperimentWorkflow, IterationOutcome, IterationSummary, WorkflowSettings};

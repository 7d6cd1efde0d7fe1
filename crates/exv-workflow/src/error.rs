//! Workflow error types.
//!
//! [`RunError`] is the taxonomy of ways one experiment iteration can fail.
//! Every variant is caught at the workflow boundary and ends only the
//! current iteration.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use exv_readiness::ReadinessError;
use exv_workload::{DecodeFailure, WorkloadError};

use crate::patch::PatchError;

/// An external program could not be started.
#[derive(Debug, Error)]
#[error("failed to run {program}: {source}")]
pub struct CommandError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build step {step}: {source}")]
    Command {
        step: usize,
        #[source]
        source: CommandError,
    },

    #[error("build step {step} ({program}) exited with status {code:?}: {stderr}")]
    Exit {
        step: usize,
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("build step {step} ({program}) output does not contain {marker:?}")]
    MissingMarker {
        step: usize,
        program: String,
        marker: String,
    },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to read values file {path}: {source}")]
    ReadValues {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteValues {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to patch values: {0}")]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("installer output does not contain {marker:?}:\n{output}")]
    MissingMarker { marker: String, output: String },

    #[error("uninstall exited with status {code:?}: {stderr}")]
    Teardown { code: Option<i32>, stderr: String },
}

/// Why an experiment iteration was abandoned.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("deploy failed: {0}")]
    Deploy(#[from] DeployError),

    #[error("timed out waiting for services: {remaining:?}")]
    ReadinessTimeout { remaining: BTreeSet<String> },

    #[error("readiness wait rejected: {0}")]
    Readiness(#[from] ReadinessError),

    #[error("workload {name} did not finish within {timeout:?}")]
    WorkloadTimeout { name: String, timeout: Duration },

    #[error("result decoding failed: {0}")]
    Decode(#[from] DecodeFailure),

    #[error("observation directory {0} already exists")]
    OutputCollision(PathBuf),

    #[error("workload error: {0}")]
    Workload(WorkloadError),

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<WorkloadError> for RunError {
    fn from(err: WorkloadError) -> Self {
        match err {
            WorkloadError::Decode(failure) => RunError::Decode(failure),
            WorkloadError::Cancelled => RunError::Cancelled,
            other => RunError::Workload(other),
        }
    }
}

impl RunError {
    /// Short machine-friendly label for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Build(_) => "build",
            RunError::Deploy(_) => "deploy",
            RunError::ReadinessTimeout { .. } | RunError::Readiness(_) => "readiness",
            RunError::WorkloadTimeout { .. } => "workload-timeout",
            RunError::Decode(_) => "decode",
            RunError::OutputCollision(_) => "output-collision",
            RunError::Workload(_) => "workload",
            RunError::Cancelled => "cancelled",
            RunError::Io { .. } => "io",
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;

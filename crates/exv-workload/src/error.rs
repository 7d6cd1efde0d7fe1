//! Workload lifecycle error types.

use thiserror::Error;

use exv_cluster::ClusterError;

use crate::archive::DecodeFailure;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to launch workload: {0}")]
    Launch(ClusterError),

    #[error("failed to watch workload: {0}")]
    Watch(ClusterError),

    #[error("failed to read workload logs: {0}")]
    Logs(ClusterError),

    #[error("failed to delete workload: {0}")]
    Delete(ClusterError),

    #[error("failed to decode workload results: {0}")]
    Decode(#[from] DecodeFailure),

    #[error("workload cancelled")]
    Cancelled,
}

pub type WorkloadResult<T> = Result<T, WorkloadError>;

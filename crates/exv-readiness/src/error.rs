//! Readiness waiter error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("no services to wait for")]
    NoServices,

    #[error("{0} must be a positive duration")]
    ZeroDuration(&'static str),
}

pub type ReadinessResult<T> = Result<T, ReadinessError>;

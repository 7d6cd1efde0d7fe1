//! exv-core: shared types for the experiment runner.
//!
//! Holds the immutable [`ExperimentDefinition`], the process-wide
//! [`RunOptions`] that are passed explicitly into every run, and the
//! `exv.toml` configuration file that describes the cluster, deployment,
//! workload, build and batch settings.

pub mod cancel;
pub mod config;
pub mod duration;
pub mod types;

pub use cancel::{CancelReceiver, CancelSender};
pub use config::{ConfigError, ExperimentsConfig};
pub use duration::{MAX_DURATION, parse_bounded, parse_duration};
pub use types::*;

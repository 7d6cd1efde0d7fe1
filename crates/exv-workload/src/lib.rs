//! exv-workload: lifecycle of the ephemeral load-generating unit.
//!
//! One unit is created per experiment iteration. It runs the load
//! generator against the release, then writes its results to standard
//! output as a base64-encoded gzip tarball. The manager:
//!
//! - launches the unit with merged environment and anti-affinity
//! - follows its phase events until a terminal state or the deadline
//! - reads its log and unpacks the result archive
//! - deletes it, on every exit path
//!
//! # State machine
//!
//! ```text
//! Pending ──► Running ──► Succeeded
//!    │           │    └─► Failed
//!    └───────────┴──────► TimedOut   (deadline passed)
//!
//! any state ──terminate()──► deleted
//! ```
//!
//! Results are read before deletion. A timed-out unit is deleted
//! without reading its output.

pub mod archive;
pub mod error;
pub mod lifecycle;
pub mod unit;

pub use archive::{DecodeFailure, DecodeStage, ResultArchive};
pub use error::{WorkloadError, WorkloadResult};
pub use lifecycle::{
    TerminalState, WorkloadHandle, WorkloadLifecycleManager, WorkloadRun, WorkloadState,
};
pub use unit::LaunchConfig;

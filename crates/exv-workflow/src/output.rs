//! Observation directory layout.
//!
//! ```text
//! <root>[_scale][_<tag>...]/<experiment id>/<iteration>/
//!     experiment.json     definition used for the run
//!     values.yaml         values the release was installed with
//!     results_*.csv       decoded workload results
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use exv_core::ExperimentDefinition;

use crate::error::{RunError, RunResult};

/// Snapshot of the definition, written before deployment.
pub const EXPERIMENT_SNAPSHOT: &str = "experiment.json";

/// Root directory for every iteration of `experiment`.
///
/// Autoscaled experiments get `_scale`; tags are appended joined by `_`.
pub fn observation_root(base: &Path, experiment: &ExperimentDefinition) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    if experiment.autoscaling.is_enabled() {
        name.push("_scale");
    }
    if !experiment.tags.is_empty() {
        name.push("_");
        name.push(experiment.tags.join("_"));
    }
    PathBuf::from(name)
}

/// Directory for one iteration under an observation root.
pub fn observation_dir(root: &Path, experiment: &ExperimentDefinition, iteration: u32) -> PathBuf {
    root.join(experiment.id()).join(iteration.to_string())
}

/// Create the iteration directory. An existing directory is a collision
/// unless `reuse` is set.
pub fn prepare(dir: &Path, reuse: bool) -> RunResult<()> {
    if dir.exists() {
        if !reuse {
            return Err(RunError::OutputCollision(dir.to_path_buf()));
        }
        warn!(dir = %dir.display(), "reusing existing observation directory");
    }
    std::fs::create_dir_all(dir).map_err(|source| RunError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    debug!(dir = %dir.display(), "observation directory ready");
    Ok(())
}

/// Persist the definition this iteration runs with.
pub fn write_snapshot(dir: &Path, experiment: &ExperimentDefinition) -> RunResult<()> {
    let path = dir.join(EXPERIMENT_SNAPSHOT);
    let json = serde_json::to_string_pretty(experiment).map_err(|e| RunError::Io {
        path: path.clone(),
        source: std::io::Error::other(e),
    })?;
    std::fs::write(&path, json).map_err(|source| RunError::Io { path, source })
}

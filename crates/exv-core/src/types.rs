//! Domain types shared by every exv crate.
//!
//! An [`ExperimentDefinition`] is created once per configured experiment and
//! never mutated during a run. Variants (such as the ramp-up copy) are made by
//! cloning and changing a single field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Autoscaling ────────────────────────────────────────────────────

/// Which resource, if any, drives horizontal autoscaling of the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoscalingMode {
    #[default]
    Off,
    Cpu,
    Memory,
    Both,
}

impl AutoscalingMode {
    pub fn is_enabled(self) -> bool {
        self != AutoscalingMode::Off
    }
}

impl fmt::Display for AutoscalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AutoscalingMode::Off => "off",
            AutoscalingMode::Cpu => "cpu",
            AutoscalingMode::Memory => "memory",
            AutoscalingMode::Both => "both",
        };
        f.write_str(s)
    }
}

// ── Workload profile ───────────────────────────────────────────────

/// Shape of the synthetic load driven against the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadProfile {
    /// The configured locust file with its own stage schedule.
    #[default]
    Standard,
    /// The ramp-up locust file: load increases steadily over the run.
    RampUp,
}

// ── Value overrides ────────────────────────────────────────────────

/// One structured edit applied to the release's values document before
/// deployment. Paths are dot-separated; numeric segments index sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ValueOverride {
    Set {
        path: String,
        value: serde_json::Value,
    },
    Remove {
        path: String,
    },
}

impl ValueOverride {
    pub fn set(path: &str, value: impl Into<serde_json::Value>) -> Self {
        ValueOverride::Set {
            path: path.to_string(),
            value: value.into(),
        }
    }

    pub fn remove(path: &str) -> Self {
        ValueOverride::Remove {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ValueOverride::Set { path, .. } | ValueOverride::Remove { path } => path,
        }
    }
}

// ── Experiment ─────────────────────────────────────────────────────

/// Immutable description of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    /// Human-readable experiment name; also the observation directory name.
    pub name: String,
    /// Source branch the release images are built from.
    pub target_branch: String,
    /// Namespace the release is installed into. Exclusive per running experiment.
    pub namespace: String,
    #[serde(default)]
    pub autoscaling: AutoscalingMode,
    /// Overrides applied on top of the configured base overrides.
    #[serde(default)]
    pub overrides: Vec<ValueOverride>,
    /// Extra workload settings, injected as `LOCUST_<KEY>` variables.
    #[serde(default)]
    pub workload_env: BTreeMap<String, String>,
    /// Environment tags; appended to the observation root.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Run the workload on the cluster next to the release rather than externally.
    #[serde(default)]
    pub colocated_workload: bool,
    #[serde(default)]
    pub profile: WorkloadProfile,
}

impl ExperimentDefinition {
    /// Copy of this experiment that drives the ramp-up workload profile.
    pub fn ramp_up_variant(&self) -> Self {
        let mut variant = self.clone();
        variant.profile = WorkloadProfile::RampUp;
        if !variant.tags.iter().any(|t| t == "rampup") {
            variant.tags.push("rampup".to_string());
        }
        variant
    }

    /// Stable identifier used for directory and workload names.
    ///
    /// Lowercase alphanumerics and dashes only.
    pub fn id(&self) -> String {
        let mut id = slugify(&self.name);
        if self.profile == WorkloadProfile::RampUp {
            id.push_str("-rampup");
        }
        id
    }

    /// Column headers for the planned-experiments table.
    pub fn headers() -> [&'static str; 7] {
        [
            "id",
            "branch",
            "namespace",
            "autoscaling",
            "overrides",
            "tags",
            "workload",
        ]
    }

    /// One row of the planned-experiments table.
    pub fn to_row(&self) -> [String; 7] {
        [
            self.id(),
            self.target_branch.clone(),
            self.namespace.clone(),
            self.autoscaling.to_string(),
            self.overrides.len().to_string(),
            self.tags.join(","),
            if self.colocated_workload {
                "colocated".to_string()
            } else {
                "external".to_string()
            },
        ]
    }
}

impl fmt::Display for ExperimentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (branch={}, namespace={}, autoscaling={})",
            self.id(),
            self.target_branch,
            self.namespace,
            self.autoscaling
        )
    }
}

/// Lowercase a name and collapse every run of non-alphanumerics into one dash.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

// ── Run options ────────────────────────────────────────────────────

/// Process-wide switches, passed explicitly into the batch and each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Allow reusing an existing observation directory instead of failing.
    pub reuse_output: bool,
    /// Skip building images before each experiment.
    pub skip_build: bool,
    /// Only enumerate planned experiments; execute no stage.
    pub dry_run: bool,
}

// ── Cluster object kind ────────────────────────────────────────────

/// Kind of workload object queried for ready replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    StatefulSet,
    Deployment,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment() -> ExperimentDefinition {
        ExperimentDefinition {
            name: "Baseline CPU".to_string(),
            target_branch: "main".to_string(),
            namespace: "exp-a".to_string(),
            autoscaling: AutoscalingMode::Cpu,
            overrides: vec![ValueOverride::set("webui.replicas", 2)],
            workload_env: BTreeMap::new(),
            tags: vec!["arm".to_string()],
            colocated_workload: false,
            profile: WorkloadProfile::Standard,
        }
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Baseline CPU"), "baseline-cpu");
        assert_eq!(slugify("  a//b__c  "), "a-b-c");
        assert_eq!(slugify("feature/x-1"), "feature-x-1");
    }

    #[test]
    fn ramp_up_variant_changes_only_profile_and_tags() {
        let exp = experiment();
        let variant = exp.ramp_up_variant();

        assert_eq!(variant.profile, WorkloadProfile::RampUp);
        assert_eq!(variant.tags, vec!["arm".to_string(), "rampup".to_string()]);
        assert_eq!(variant.namespace, exp.namespace);
        assert_eq!(variant.overrides, exp.overrides);
        // Source is untouched.
        assert_eq!(exp.profile, WorkloadProfile::Standard);
        assert_ne!(variant.id(), exp.id());
    }

    #[test]
    fn ramp_up_variant_does_not_duplicate_tag() {
        let twice = experiment().ramp_up_variant().ramp_up_variant();
        assert_eq!(twice.tags.iter().filter(|t| *t == "rampup").count(), 1);
    }

    #[test]
    fn row_matches_headers() {
        let row = experiment().to_row();
        assert_eq!(row.len(), ExperimentDefinition::headers().len());
        assert_eq!(row[0], "baseline-cpu");
        assert_eq!(row[3], "cpu");
        assert_eq!(row[6], "external");
    }

    #[test]
    fn override_deserializes_from_toml() {
        let toml_str = r#"
op = "set"
path = "autoscaling.enabled"
value = true
"#;
        let ov: ValueOverride = toml::from_str(toml_str).unwrap();
        assert_eq!(ov, ValueOverride::set("autoscaling.enabled", true));
        assert_eq!(ov.path(), "autoscaling.enabled");
    }

    #[test]
    fn autoscaling_mode_enabled() {
        assert!(!AutoscalingMode::Off.is_enabled());
        assert!(AutoscalingMode::Memory.is_enabled());
    }
}

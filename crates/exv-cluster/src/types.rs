//! Control-plane value types.

use std::collections::BTreeMap;
use std::fmt;

use futures::stream::BoxStream;

use crate::error::ClusterResult;

/// Equality-based label selector, rendered as `k1=v1,k2=v2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether every selector term is present in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Phase reported by the control plane for a workload unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    /// Map a pod phase string. "Completed" is reported by some runtimes
    /// in place of "Succeeded".
    pub fn from_pod_phase(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" | "Completed" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }
}

/// One observed phase of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEvent {
    pub name: String,
    pub phase: WorkloadPhase,
}

/// Live stream of phase events. Never ends on its own for real clusters.
pub type PhaseStream = BoxStream<'static, ClusterResult<PhaseEvent>>;

/// Everything needed to create one ephemeral workload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Name of the single container; the unit name when empty.
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    /// The unit must not land on a node carrying this label.
    pub avoid_node_label: Option<String>,
}

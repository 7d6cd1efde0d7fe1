//! The `ControlPlane` trait.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::types::{LabelSelector, PhaseStream, UnitSpec};

/// Operations the experiment runner performs against the cluster.
///
/// Implementations must be safe to share across tasks; callers hold them
/// as `Arc<dyn ControlPlane>`.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Number of ready replicas currently reported by `service`.
    async fn ready_replicas(&self, namespace: &str, service: &str) -> ClusterResult<u32>;

    /// Create one ephemeral workload unit. Returns once the API server has
    /// accepted it; the unit may not be running yet.
    async fn create_unit(&self, spec: &UnitSpec) -> ClusterResult<()>;

    /// Subscribe to phase changes of every unit matching `selector`.
    async fn watch_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<PhaseStream>;

    /// Full standard output accumulated by the unit so far.
    async fn unit_logs(&self, namespace: &str, name: &str) -> ClusterResult<String>;

    /// Delete one unit. A missing unit yields `ClusterError::NotFound`.
    async fn delete_unit(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Immediately delete every unit matching `selector`, with no grace
    /// period. Returns how many were deleted.
    async fn delete_units(&self, namespace: &str, selector: &LabelSelector)
    -> ClusterResult<usize>;
}

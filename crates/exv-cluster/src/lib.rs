//! exv-cluster: the control-plane seam for exv.
//!
//! Everything the experiment runner needs from the cluster goes through
//! the [`ControlPlane`] trait:
//!
//! - ready-replica count of a named service in a namespace
//! - create / delete / bulk-delete of ephemeral workload units
//! - a live stream of unit phase changes filtered by label
//! - the accumulated log text of a unit
//!
//! [`KubeControlPlane`] talks to a real Kubernetes API server;
//! [`InMemoryControlPlane`] is a scriptable backend for tests.

pub mod control_plane;
pub mod error;
pub mod k8s;
pub mod memory;
pub mod types;

pub use control_plane::ControlPlane;
pub use error::{ClusterError, ClusterResult};
pub use k8s::KubeControlPlane;
pub use memory::{Call, InMemoryControlPlane, UnitScript};
pub use types::*;

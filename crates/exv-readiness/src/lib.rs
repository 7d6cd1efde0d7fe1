//! exv-readiness: waits until a deployed release is serviceable.
//!
//! A release is serviceable once every required service reports at least
//! one ready replica. The waiter polls the control plane on a fixed
//! interval until that holds or the deadline passes.
//!
//! # Algorithm
//!
//! ```text
//! loop:
//!     for name in required - ready:          (queried concurrently)
//!         if ready_replicas(name) > 0: ready += name
//!     if ready == required:  return Ready
//!     if elapsed >= timeout: return Timeout(required - ready)
//!     sleep(poll_interval)
//! ```
//!
//! Ready membership is monotonic: once a service is marked ready it is
//! never queried again within the same wait. Query errors count as "not
//! ready this round" and never abort the wait.

pub mod error;
pub mod set;
pub mod waiter;

pub use error::{ReadinessError, ReadinessResult};
pub use set::ServiceReadinessSet;
pub use waiter::{ReadinessOutcome, ReadinessWaiter};

//! Readiness waiter: polls ready replicas until every service is up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use exv_cluster::ControlPlane;
use exv_core::CancelReceiver;
use exv_core::cancel::{cancelled, is_cancelled};

use crate::error::{ReadinessError, ReadinessResult};
use crate::set::ServiceReadinessSet;

/// Result of one readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// Every required service reported a ready replica.
    Ready,
    /// The deadline passed; these services never came up.
    Timeout { remaining: BTreeSet<String> },
    /// An abort was requested before the wait finished.
    Cancelled { remaining: BTreeSet<String> },
}

/// Polls the control plane for service readiness.
#[derive(Clone)]
pub struct ReadinessWaiter {
    control_plane: Arc<dyn ControlPlane>,
}

impl ReadinessWaiter {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Wait until every service in `services` has at least one ready
    /// replica in `namespace`, or `timeout` elapses.
    ///
    /// The last sleep is cut short at the deadline, so this returns within
    /// `timeout` plus the duration of one round of queries.
    pub async fn wait_for_ready(
        &self,
        services: &BTreeSet<String>,
        namespace: &str,
        timeout: Duration,
        poll_interval: Duration,
        mut cancel: CancelReceiver,
    ) -> ReadinessResult<ReadinessOutcome> {
        if services.is_empty() {
            return Err(ReadinessError::NoServices);
        }
        if timeout.is_zero() {
            return Err(ReadinessError::ZeroDuration("timeout"));
        }
        if poll_interval.is_zero() {
            return Err(ReadinessError::ZeroDuration("poll interval"));
        }

        let mut set = ServiceReadinessSet::new(services.clone(), timeout);
        debug!(%namespace, services = services.len(), ?timeout, "waiting for services");

        loop {
            if is_cancelled(&cancel) {
                warn!(%namespace, "readiness wait cancelled");
                return Ok(ReadinessOutcome::Cancelled {
                    remaining: set.remaining(),
                });
            }

            self.poll_pending(&mut set, namespace).await;

            if set.is_complete() {
                info!(%namespace, services = set.required_count(), "all services ready");
                return Ok(ReadinessOutcome::Ready);
            }
            if set.is_expired(Instant::now()) {
                let remaining = set.remaining();
                warn!(%namespace, ?remaining, "timed out waiting for services");
                return Ok(ReadinessOutcome::Timeout { remaining });
            }

            info!(
                %namespace,
                ready = set.ready_count(),
                required = set.required_count(),
                "waiting for deployment to be ready"
            );

            let nap = poll_interval.min(set.time_left(Instant::now()));
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancelled(&mut cancel) => {
                    warn!(%namespace, "readiness wait cancelled");
                    return Ok(ReadinessOutcome::Cancelled {
                        remaining: set.remaining(),
                    });
                }
            }
        }
    }

    /// Query every pending service once and mark the ready ones.
    async fn poll_pending(&self, set: &mut ServiceReadinessSet, namespace: &str) {
        let pending: Vec<String> = set.pending().cloned().collect();
        let answers = join_all(
            pending
                .iter()
                .map(|service| self.control_plane.ready_replicas(namespace, service)),
        )
        .await;

        for (service, answer) in pending.iter().zip(answers) {
            match answer {
                Ok(replicas) if replicas > 0 => {
                    set.mark_ready(service);
                    debug!(%namespace, %service, replicas, "service ready");
                }
                Ok(_) => debug!(%namespace, %service, "service has no ready replicas"),
                Err(e) => {
                    warn!(%namespace, %service, error = %e, "readiness query failed");
                }
            }
        }
    }
}

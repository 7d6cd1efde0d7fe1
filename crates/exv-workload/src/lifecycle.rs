//! Workload lifecycle manager. Drives one unit from creation to deletion.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use tracing::{debug, info, warn};

use exv_cluster::{ControlPlane, LabelSelector, WorkloadPhase};
use exv_core::CancelReceiver;
use exv_core::cancel::{cancelled, is_cancelled};

use crate::archive::{self, ResultArchive};
use crate::error::{WorkloadError, WorkloadResult};
use crate::unit::LaunchConfig;

/// Recorded lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl WorkloadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkloadState::Succeeded | WorkloadState::Failed | WorkloadState::TimedOut
        )
    }

    /// Apply an observed phase. Never moves backwards and never leaves a
    /// terminal state.
    fn advance(self, phase: WorkloadPhase) -> WorkloadState {
        if self.is_terminal() {
            return self;
        }
        match phase {
            WorkloadPhase::Succeeded => WorkloadState::Succeeded,
            WorkloadPhase::Failed => WorkloadState::Failed,
            WorkloadPhase::Running => WorkloadState::Running,
            WorkloadPhase::Pending | WorkloadPhase::Unknown => self,
        }
    }
}

/// How waiting for a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Succeeded,
    Failed,
    TimedOut,
}

/// Identifies one ephemeral unit in the cluster.
#[derive(Debug, Clone)]
pub struct WorkloadHandle {
    namespace: String,
    name: String,
    selector: LabelSelector,
    group_selector: LabelSelector,
    /// Unix timestamp (seconds) of creation.
    created_at: u64,
    state: WorkloadState,
    terminated: bool,
}

impl WorkloadHandle {
    /// Handle for a unit that may or may not exist.
    pub fn new(namespace: &str, name: &str, group_selector: LabelSelector) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector: LabelSelector::new().with(crate::unit::RUN_LABEL, name),
            group_selector,
            created_at: epoch_secs(),
            state: WorkloadState::Pending,
            terminated: false,
        }
    }

    fn from_config(config: &LaunchConfig) -> Self {
        Self::new(&config.namespace, &config.name, config.group_selector())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn state(&self) -> WorkloadState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Outcome of a full launch → await → retrieve → terminate run.
#[derive(Debug, Clone)]
pub struct WorkloadRun {
    pub name: String,
    pub terminal: TerminalState,
    /// None when retrieval was skipped (timed out).
    pub results: Option<ResultArchive>,
}

/// Creates, follows, reads and deletes load-generator units.
#[derive(Clone)]
pub struct WorkloadLifecycleManager {
    control_plane: Arc<dyn ControlPlane>,
}

impl WorkloadLifecycleManager {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Create the unit. It may not start immediately.
    pub async fn launch(&self, config: &LaunchConfig) -> WorkloadResult<WorkloadHandle> {
        let handle = WorkloadHandle::from_config(config);
        self.control_plane
            .create_unit(&config.unit_spec())
            .await
            .map_err(WorkloadError::Launch)?;
        info!(
            namespace = %handle.namespace,
            name = %handle.name,
            env = config.env.len(),
            "workload launched"
        );
        Ok(handle)
    }

    /// Follow the unit's phase events until it succeeds, fails, or
    /// `timeout` passes.
    ///
    /// On cancellation every unit of the group is force-deleted and
    /// `WorkloadError::Cancelled` is returned.
    pub async fn await_completion(
        &self,
        handle: &mut WorkloadHandle,
        timeout: Duration,
        mut cancel: CancelReceiver,
    ) -> WorkloadResult<TerminalState> {
        if is_cancelled(&cancel) {
            return self.abort(handle).await;
        }

        let mut events = self
            .control_plane
            .watch_units(&handle.namespace, &handle.selector)
            .await
            .map_err(WorkloadError::Watch)?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut stream_open = true;

        loop {
            tokio::select! {
                event = events.next(), if stream_open => match event {
                    Some(Ok(event)) if event.name == handle.name => {
                        let prev = handle.state;
                        handle.state = prev.advance(event.phase);
                        if handle.state != prev {
                            info!(
                                name = %handle.name,
                                from = ?prev,
                                to = ?handle.state,
                                "workload state changed"
                            );
                        }
                        match handle.state {
                            WorkloadState::Succeeded => return Ok(TerminalState::Succeeded),
                            WorkloadState::Failed => return Ok(TerminalState::Failed),
                            _ => {}
                        }
                    }
                    Some(Ok(event)) => {
                        debug!(name = %event.name, "ignoring event for another unit");
                    }
                    Some(Err(e)) => {
                        warn!(name = %handle.name, error = %e, "workload watch error");
                    }
                    None => {
                        warn!(name = %handle.name, "workload watch closed, waiting for deadline");
                        stream_open = false;
                    }
                },
                _ = &mut deadline => {
                    handle.state = WorkloadState::TimedOut;
                    warn!(name = %handle.name, ?timeout, "workload timed out");
                    return Ok(TerminalState::TimedOut);
                }
                _ = cancelled(&mut cancel) => {
                    return self.abort(handle).await;
                }
            }
        }
    }

    async fn abort(&self, handle: &WorkloadHandle) -> WorkloadResult<TerminalState> {
        warn!(name = %handle.name, "cancellation requested, deleting workloads");
        if let Err(e) = self
            .cancel_all(&handle.namespace, &handle.group_selector)
            .await
        {
            warn!(error = %e, "forced workload deletion failed");
        }
        Err(WorkloadError::Cancelled)
    }

    /// Read the unit's log and unpack its result archive into `destination`.
    pub async fn retrieve_results(
        &self,
        handle: &WorkloadHandle,
        destination: &Path,
    ) -> WorkloadResult<ResultArchive> {
        let logs = self
            .control_plane
            .unit_logs(&handle.namespace, &handle.name)
            .await
            .map_err(WorkloadError::Logs)?;
        if logs.trim().is_empty() {
            warn!(
                namespace = %handle.namespace,
                name = %handle.name,
                "workload has no logs, workload failed?"
            );
        }
        let archive = archive::decode(&logs, destination)?;
        info!(
            name = %handle.name,
            files = archive.files.len(),
            destination = %destination.display(),
            "workload results downloaded"
        );
        Ok(archive)
    }

    /// Delete the unit. Once a delete has gone through, further calls have
    /// no effect; a unit that is already gone is not an error. A failed
    /// delete leaves the handle live so it can be retried.
    pub async fn terminate(&self, handle: &mut WorkloadHandle) -> WorkloadResult<()> {
        if handle.terminated {
            debug!(name = %handle.name, "workload already terminated");
            return Ok(());
        }
        match self
            .control_plane
            .delete_unit(&handle.namespace, &handle.name)
            .await
        {
            Ok(()) => {
                handle.terminated = true;
                info!(namespace = %handle.namespace, name = %handle.name, "workload deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                handle.terminated = true;
                debug!(name = %handle.name, "workload already gone");
                Ok(())
            }
            Err(e) => Err(WorkloadError::Delete(e)),
        }
    }

    /// Force-delete every unit matching `selector`, whatever its state.
    pub async fn cancel_all(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> WorkloadResult<usize> {
        let deleted = self
            .control_plane
            .delete_units(namespace, selector)
            .await
            .map_err(WorkloadError::Delete)?;
        info!(%namespace, %selector, deleted, "workloads force-deleted");
        Ok(deleted)
    }

    /// Launch → await completion → retrieve results → terminate.
    ///
    /// Results are retrieved for succeeded and failed units, never for
    /// timed-out ones. The unit is deleted on every exit path, after
    /// retrieval.
    pub async fn execute(
        &self,
        config: &LaunchConfig,
        destination: &Path,
        cancel: CancelReceiver,
    ) -> WorkloadResult<WorkloadRun> {
        let mut handle = match self.launch(config).await {
            Ok(handle) => handle,
            Err(e) => {
                // Creation may have been accepted before the error surfaced.
                let mut orphan = WorkloadHandle::from_config(config);
                if let Err(del) = self.terminate(&mut orphan).await {
                    warn!(name = %config.name, error = %del, "cleanup after failed launch");
                }
                return Err(e);
            }
        };

        let outcome = self
            .follow(&mut handle, config.timeout, destination, cancel)
            .await;

        if let Err(e) = self.terminate(&mut handle).await {
            warn!(name = %handle.name, error = %e, "failed to delete workload");
        }
        outcome
    }

    async fn follow(
        &self,
        handle: &mut WorkloadHandle,
        timeout: Duration,
        destination: &Path,
        cancel: CancelReceiver,
    ) -> WorkloadResult<WorkloadRun> {
        let terminal = self.await_completion(handle, timeout, cancel).await?;

        let results = match terminal {
            TerminalState::Succeeded => {
                info!(name = %handle.name, "workload finished, downloading results");
                Some(self.retrieve_results(handle, destination).await?)
            }
            TerminalState::Failed => {
                warn!(name = %handle.name, "workload failed, downloading partial results");
                Some(self.retrieve_results(handle, destination).await?)
            }
            TerminalState::TimedOut => {
                // The log of a unit that is still running may be cut mid-archive.
                warn!(name = %handle.name, "skipping result retrieval for timed-out workload");
                None
            }
        };

        Ok(WorkloadRun {
            name: handle.name.clone(),
            terminal,
            results,
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use exv_cluster::{Call, InMemoryControlPlane, UnitScript};

    #[test]
    fn state_never_moves_backwards() {
        let s = WorkloadState::Running.advance(WorkloadPhase::Pending);
        assert_eq!(s, WorkloadState::Running);
        let s = WorkloadState::Succeeded.advance(WorkloadPhase::Failed);
        assert_eq!(s, WorkloadState::Succeeded);
        let s = WorkloadState::Pending.advance(WorkloadPhase::Failed);
        assert_eq!(s, WorkloadState::Failed);
        assert!(WorkloadState::TimedOut.is_terminal());
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let cp = InMemoryControlPlane::new();
        let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
        let mut handle = WorkloadHandle::new("ns", "lg-0", LabelSelector::new());

        // Never created: not-found is swallowed.
        manager.terminate(&mut handle).await.unwrap();
        assert!(handle.is_terminated());
        // Second call is a no-op.
        manager.terminate(&mut handle).await.unwrap();

        let deletes = cp
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::DeleteUnit { .. }))
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test]
    async fn failed_delete_can_be_retried() {
        let cp = InMemoryControlPlane::new();
        let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
        let mut handle = WorkloadHandle::new("ns", "lg-0", LabelSelector::new());

        cp.fail_next_delete("etcd unavailable");
        let err = manager.terminate(&mut handle).await.unwrap_err();
        assert!(matches!(err, WorkloadError::Delete(_)));
        assert!(!handle.is_terminated());

        manager.terminate(&mut handle).await.unwrap();
        assert!(handle.is_terminated());
        let deletes = cp
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::DeleteUnit { .. }))
            .count();
        assert_eq!(deletes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn await_completion_times_out_without_terminal_event() {
        let cp = InMemoryControlPlane::new();
        cp.set_unit_script(UnitScript {
            phases: vec![WorkloadPhase::Pending, WorkloadPhase::Running],
            logs: String::new(),
        });
        let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
        let mut handle = WorkloadHandle::new("ns", "lg-0", LabelSelector::new());
        cp.create_unit(&exv_cluster::UnitSpec {
            name: "lg-0".to_string(),
            namespace: "ns".to_string(),
            labels: [(crate::unit::RUN_LABEL.to_string(), "lg-0".to_string())].into(),
            container_name: String::new(),
            image: "img".to_string(),
            command: Vec::new(),
            working_dir: None,
            env: Default::default(),
            avoid_node_label: None,
        })
        .await
        .unwrap();

        let terminal = manager
            .await_completion(&mut handle, Duration::from_secs(30), exv_core::cancel::never())
            .await
            .unwrap();
        assert_eq!(terminal, TerminalState::TimedOut);
        assert_eq!(handle.state(), WorkloadState::TimedOut);
    }
}

//! In-memory [`ControlPlane`] for tests.
//!
//! Readiness answers and workload behaviour are scripted up front. Every
//! call is recorded so tests can assert on ordering (for example that a
//! unit's logs were read before it was deleted).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{LabelSelector, PhaseEvent, PhaseStream, UnitSpec, WorkloadPhase};

/// A recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ReadyReplicas { service: String },
    CreateUnit { name: String },
    WatchUnits { selector: String },
    UnitLogs { name: String },
    DeleteUnit { name: String },
    DeleteUnits { selector: String },
}

/// How units created after this script is installed behave.
#[derive(Debug, Clone)]
pub struct UnitScript {
    /// Phases emitted, in order, to every watcher of the unit.
    pub phases: Vec<WorkloadPhase>,
    /// Log text returned for the unit.
    pub logs: String,
}

impl Default for UnitScript {
    fn default() -> Self {
        Self {
            phases: vec![
                WorkloadPhase::Pending,
                WorkloadPhase::Running,
                WorkloadPhase::Succeeded,
            ],
            logs: String::new(),
        }
    }
}

struct StoredUnit {
    spec: UnitSpec,
    script: UnitScript,
}

#[derive(Default)]
struct Inner {
    /// `namespace/service` → remaining scripted answers. The last one repeats.
    readiness: HashMap<String, VecDeque<Result<u32, String>>>,
    /// `namespace/name` → unit.
    units: BTreeMap<String, StoredUnit>,
    script: UnitScript,
    fail_create: Option<String>,
    fail_delete: Option<String>,
    calls: Vec<Call>,
}

/// Scriptable control plane held entirely in memory.
#[derive(Clone, Default)]
pub struct InMemoryControlPlane {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script the answers to successive readiness queries for a service.
    /// `Err` entries simulate transient API errors.
    pub fn set_readiness(&self, namespace: &str, service: &str, answers: Vec<Result<u32, String>>) {
        self.lock()
            .readiness
            .insert(format!("{namespace}/{service}"), answers.into());
    }

    /// Shorthand: the service always reports `replicas` ready replicas.
    pub fn set_ready(&self, namespace: &str, service: &str, replicas: u32) {
        self.set_readiness(namespace, service, vec![Ok(replicas)]);
    }

    /// Behaviour of units created from now on.
    pub fn set_unit_script(&self, script: UnitScript) {
        self.lock().script = script;
    }

    /// Make the next `create_unit` call fail with an API error.
    pub fn fail_next_create(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    /// Make the next `delete_unit` call fail with an API error.
    pub fn fail_next_delete(&self, message: &str) {
        self.lock().fail_delete = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// How many readiness queries were made for `service`.
    pub fn readiness_queries(&self, service: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::ReadyReplicas { service: s } if s == service))
            .count()
    }

    /// Names of units that currently exist.
    pub fn unit_names(&self) -> Vec<String> {
        self.lock()
            .units
            .values()
            .map(|u| u.spec.name.clone())
            .collect()
    }

    /// Spec of an existing unit.
    pub fn unit_spec(&self, namespace: &str, name: &str) -> Option<UnitSpec> {
        self.lock()
            .units
            .get(&format!("{namespace}/{name}"))
            .map(|u| u.spec.clone())
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn ready_replicas(&self, namespace: &str, service: &str) -> ClusterResult<u32> {
        let mut inner = self.lock();
        inner.calls.push(Call::ReadyReplicas {
            service: service.to_string(),
        });
        let key = format!("{namespace}/{service}");
        let answers = inner
            .readiness
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(key.clone()))?;
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().cloned()
        };
        match answer {
            Some(Ok(n)) => Ok(n),
            Some(Err(msg)) => Err(ClusterError::Api(msg)),
            None => Err(ClusterError::NotFound(key)),
        }
    }

    async fn create_unit(&self, spec: &UnitSpec) -> ClusterResult<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::CreateUnit {
            name: spec.name.clone(),
        });
        if let Some(msg) = inner.fail_create.take() {
            return Err(ClusterError::Api(msg));
        }
        let key = format!("{}/{}", spec.namespace, spec.name);
        if inner.units.contains_key(&key) {
            return Err(ClusterError::Api(format!("{key} already exists")));
        }
        let script = inner.script.clone();
        inner.units.insert(
            key,
            StoredUnit {
                spec: spec.clone(),
                script,
            },
        );
        Ok(())
    }

    async fn watch_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<PhaseStream> {
        let mut inner = self.lock();
        inner.calls.push(Call::WatchUnits {
            selector: selector.to_string(),
        });
        let events: Vec<ClusterResult<PhaseEvent>> = inner
            .units
            .values()
            .filter(|u| u.spec.namespace == namespace && selector.matches(&u.spec.labels))
            .flat_map(|u| {
                u.script.phases.iter().map(|phase| {
                    Ok(PhaseEvent {
                        name: u.spec.name.clone(),
                        phase: *phase,
                    })
                })
            })
            .collect();
        // A real watch stays open until the caller drops it.
        Ok(stream::iter(events).chain(stream::pending()).boxed())
    }

    async fn unit_logs(&self, namespace: &str, name: &str) -> ClusterResult<String> {
        let mut inner = self.lock();
        inner.calls.push(Call::UnitLogs {
            name: name.to_string(),
        });
        let key = format!("{namespace}/{name}");
        inner
            .units
            .get(&key)
            .map(|u| u.script.logs.clone())
            .ok_or(ClusterError::NotFound(key))
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteUnit {
            name: name.to_string(),
        });
        if let Some(msg) = inner.fail_delete.take() {
            return Err(ClusterError::Api(msg));
        }
        let key = format!("{namespace}/{name}");
        match inner.units.remove(&key) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound(key)),
        }
    }

    async fn delete_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<usize> {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteUnits {
            selector: selector.to_string(),
        });
        let before = inner.units.len();
        inner
            .units
            .retain(|_, u| !(u.spec.namespace == namespace && selector.matches(&u.spec.labels)));
        Ok(before - inner.units.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> UnitSpec {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "loadgenerator".to_string());
        labels.insert("run".to_string(), name.to_string());
        UnitSpec {
            name: name.to_string(),
            namespace: "ns".to_string(),
            labels,
            container_name: String::new(),
            image: "img".to_string(),
            command: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            avoid_node_label: None,
        }
    }

    #[tokio::test]
    async fn readiness_answers_are_consumed_then_repeat() {
        let cp = InMemoryControlPlane::new();
        cp.set_readiness("ns", "a", vec![Err("boom".to_string()), Ok(0), Ok(2)]);

        assert!(cp.ready_replicas("ns", "a").await.is_err());
        assert_eq!(cp.ready_replicas("ns", "a").await.unwrap(), 0);
        assert_eq!(cp.ready_replicas("ns", "a").await.unwrap(), 2);
        assert_eq!(cp.ready_replicas("ns", "a").await.unwrap(), 2);
        assert_eq!(cp.readiness_queries("a"), 4);
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let cp = InMemoryControlPlane::new();
        let err = cp.ready_replicas("ns", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let cp = InMemoryControlPlane::new();
        cp.create_unit(&unit("lg-0")).await.unwrap();
        cp.delete_unit("ns", "lg-0").await.unwrap();
        assert!(cp.delete_unit("ns", "lg-0").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn watch_emits_scripted_phases() {
        let cp = InMemoryControlPlane::new();
        cp.create_unit(&unit("lg-0")).await.unwrap();

        let sel = LabelSelector::new().with("run", "lg-0");
        let stream = cp.watch_units("ns", &sel).await.unwrap();
        let phases: Vec<WorkloadPhase> = stream
            .take(3)
            .map(|e| e.unwrap().phase)
            .collect()
            .await;
        assert_eq!(
            phases,
            vec![
                WorkloadPhase::Pending,
                WorkloadPhase::Running,
                WorkloadPhase::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn bulk_delete_matches_selector_only() {
        let cp = InMemoryControlPlane::new();
        cp.create_unit(&unit("lg-0")).await.unwrap();
        cp.create_unit(&unit("lg-1")).await.unwrap();

        let sel = LabelSelector::new().with("run", "lg-0");
        assert_eq!(cp.delete_units("ns", &sel).await.unwrap(), 1);
        assert_eq!(cp.unit_names(), vec!["lg-1".to_string()]);

        let all = LabelSelector::new().with("app", "loadgenerator");
        assert_eq!(cp.delete_units("ns", &all).await.unwrap(), 1);
        assert!(cp.unit_names().is_empty());
    }

    #[tokio::test]
    async fn create_failure_is_one_shot() {
        let cp = InMemoryControlPlane::new();
        cp.fail_next_create("quota exceeded");
        assert!(cp.create_unit(&unit("lg-0")).await.is_err());
        assert!(cp.create_unit(&unit("lg-0")).await.is_ok());
    }
}

//! Kubernetes backend for [`ControlPlane`].
//!
//! Workload units are bare pods with `restartPolicy: Never`. Service
//! readiness is read from the status subresource of a StatefulSet or a
//! Deployment, depending on the configured [`ServiceKind`].

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, Pod, PodSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use tracing::debug;

use exv_core::ServiceKind;

use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{LabelSelector, PhaseEvent, PhaseStream, UnitSpec, WorkloadPhase};

/// Control plane backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    service_kind: ServiceKind,
}

impl KubeControlPlane {
    pub fn new(client: Client, service_kind: ServiceKind) -> Self {
        Self {
            client,
            service_kind,
        }
    }

    /// Connect using the local kubeconfig or the in-cluster service account.
    pub async fn try_default(service_kind: ServiceKind) -> ClusterResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        debug!(?service_kind, "kubernetes client ready");
        Ok(Self::new(client, service_kind))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn ready_replicas(&self, namespace: &str, service: &str) -> ClusterResult<u32> {
        let what = format!("{namespace}/{service}");
        let ready = match self.service_kind {
            ServiceKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let sts = api
                    .get_status(service)
                    .await
                    .map_err(|e| map_api_err(&what, e))?;
                sts.status.and_then(|s| s.ready_replicas)
            }
            ServiceKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deploy = api
                    .get_status(service)
                    .await
                    .map_err(|e| map_api_err(&what, e))?;
                deploy.status.and_then(|s| s.ready_replicas)
            }
        };
        Ok(ready.unwrap_or(0).max(0) as u32)
    }

    async fn create_unit(&self, spec: &UnitSpec) -> ClusterResult<()> {
        let pod = build_pod(spec);
        self.pods(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| map_api_err(&format!("{}/{}", spec.namespace, spec.name), e))?;
        debug!(namespace = %spec.namespace, name = %spec.name, "pod created");
        Ok(())
    }

    async fn watch_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<PhaseStream> {
        let config = watcher::Config::default().labels(&selector.to_string());
        let stream = watcher(self.pods(namespace), config)
            .default_backoff()
            .applied_objects()
            .map(|res| match res {
                Ok(pod) => Ok(phase_event(&pod)),
                Err(e) => Err(ClusterError::Watch(e.to_string())),
            })
            .boxed();
        Ok(stream)
    }

    async fn unit_logs(&self, namespace: &str, name: &str) -> ClusterResult<String> {
        self.pods(namespace)
            .logs(name, &LogParams::default())
            .await
            .map_err(|e| map_api_err(&format!("{namespace}/{name}"), e))
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_api_err(&format!("{namespace}/{name}"), e))?;
        Ok(())
    }

    async fn delete_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<usize> {
        let dp = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::default()
        };
        let lp = ListParams::default().labels(&selector.to_string());
        let deleted = self
            .pods(namespace)
            .delete_collection(&dp, &lp)
            .await
            .map_err(|e| map_api_err(&format!("{namespace}/{selector}"), e))?;
        Ok(deleted.left().map(|list| list.items.len()).unwrap_or(0))
    }
}

/// Translate a unit spec into a pod manifest.
pub fn build_pod(spec: &UnitSpec) -> Pod {
    let env = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let affinity = spec.avoid_node_label.as_ref().map(|key| Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: key.clone(),
                        operator: "DoesNotExist".to_string(),
                        values: None,
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: container_name(spec),
                image: Some(spec.image.clone()),
                command: Some(spec.command.clone()),
                env: Some(env),
                working_dir: spec.working_dir.clone(),
                ..Default::default()
            }],
            affinity,
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_name(spec: &UnitSpec) -> String {
    if spec.container_name.is_empty() {
        spec.name.clone()
    } else {
        spec.container_name.clone()
    }
}

fn phase_event(pod: &Pod) -> PhaseEvent {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(WorkloadPhase::from_pod_phase)
        .unwrap_or(WorkloadPhase::Pending);
    PhaseEvent {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
    }
}

fn map_api_err(what: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(what.to_string()),
        other => ClusterError::Api(format!("{what}: {other}")),
    }
}

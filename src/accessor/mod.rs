//! Typed read-only access to the Kubernetes API
//!
//! The [`ClusterAccessor`] wraps `kube::Api` list/read operations behind a
//! process-lifetime cache. Every collector goes through it, so a resource
//! matched by several collection plans is fetched from the API server once.

use crate::apis::ResourceApi;
use crate::cache::Cache;
use crate::error::{OpsError, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Event, Node, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, LogParams};
use kube::{Api, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// A Kubernetes resource kind the collector knows how to list
pub trait Collectable:
    Clone + std::fmt::Debug + DeserializeOwned + Serialize + Send + Sync + 'static
{
    /// The Kubernetes API kind (e.g. "Pod")
    const KIND: &'static str;

    /// Whether this resource is namespaced
    const NAMESPACED: bool;

    /// Create an Api handle; `namespace: None` means all namespaces
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>
    where
        Self: Sized;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Resource name, empty when unset
    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Resource namespace, if namespaced
    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }
}

macro_rules! namespaced_collectable {
    ($type:ty, $kind:literal) => {
        impl Collectable for $type {
            const KIND: &'static str = $kind;
            const NAMESPACED: bool = true;

            fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                match namespace {
                    Some(ns) => Api::namespaced(client, ns),
                    None => Api::all(client),
                }
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

macro_rules! cluster_collectable {
    ($type:ty, $kind:literal) => {
        impl Collectable for $type {
            const KIND: &'static str = $kind;
            const NAMESPACED: bool = false;

            fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                Api::all(client)
            }

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

namespaced_collectable!(Pod, "Pod");
namespaced_collectable!(Deployment, "Deployment");
namespaced_collectable!(ReplicaSet, "ReplicaSet");
namespaced_collectable!(StatefulSet, "StatefulSet");
namespaced_collectable!(DaemonSet, "DaemonSet");
namespaced_collectable!(Service, "Service");
namespaced_collectable!(ConfigMap, "ConfigMap");
namespaced_collectable!(PersistentVolumeClaim, "PersistentVolumeClaim");
namespaced_collectable!(Job, "Job");
namespaced_collectable!(CronJob, "CronJob");
namespaced_collectable!(Event, "Event");
cluster_collectable!(ClusterRole, "ClusterRole");
cluster_collectable!(ClusterRoleBinding, "ClusterRoleBinding");
cluster_collectable!(Node, "Node");
cluster_collectable!(StorageClass, "StorageClass");

/// Read-only, memoizing view of the connected cluster
pub struct ClusterAccessor {
    client: Client,
    cache: Cache,
}

impl ClusterAccessor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Cache::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// List resources of a kind, memoized by (kind, namespace, selectors).
    ///
    /// HTTP 404 is treated as an empty list: the serving API group may simply
    /// be absent from this cluster.
    pub async fn list<K: Collectable>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let key = Cache::list_key(K::KIND, namespace, label_selector, field_selector);
        if let Some(cached) = self.cache.get::<Vec<K>>(&key) {
            return Ok(cached);
        }

        let api = K::api(self.client.clone(), namespace);
        let mut lp = ListParams::default();
        if let Some(ls) = label_selector {
            lp = lp.labels(ls);
        }
        if let Some(fs) = field_selector {
            lp = lp.fields(fs);
        }

        let items = match api.list(&lp).await {
            Ok(list) => list.items,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = K::KIND, "list returned 404, treating as empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let items = sanitize(items);
        self.cache.set(&key, &items);
        Ok(items)
    }

    pub async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_deployments(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<Deployment>> {
        self.list(namespace, label_selector, field_selector).await
    }

    pub async fn list_stateful_sets(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<StatefulSet>> {
        self.list(namespace, label_selector, field_selector).await
    }

    pub async fn list_replica_sets(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<ReplicaSet>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_daemon_sets(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DaemonSet>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_services(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Service>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<ConfigMap>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_pvcs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_jobs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Job>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_cron_jobs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<CronJob>> {
        self.list(namespace, label_selector, None).await
    }

    pub async fn list_cluster_roles(
        &self,
        label_selector: Option<&str>,
    ) -> Result<Vec<ClusterRole>> {
        self.list(None, label_selector, None).await
    }

    pub async fn list_cluster_role_bindings(
        &self,
        label_selector: Option<&str>,
    ) -> Result<Vec<ClusterRoleBinding>> {
        self.list(None, label_selector, None).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.list(None, None, None).await
    }

    pub async fn list_events(&self) -> Result<Vec<Event>> {
        self.list(None, None, None).await
    }

    pub async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        self.list(None, None, None).await
    }

    /// List custom resources for one kind of a [`ResourceApi`]
    pub async fn list_custom_objects(
        &self,
        api: &ResourceApi,
        kind: &str,
        plural: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let operation = format!("{}/{}/{}", api.group, api.version, plural);
        let key = Cache::list_key(&operation, namespace, None, None);
        if let Some(cached) = self.cache.get::<Vec<DynamicObject>>(&key) {
            return Ok(cached);
        }

        let gvk = GroupVersionKind::gvk(api.group, api.version, kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, plural);
        let dyn_api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        let items = match dyn_api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(%operation, "custom object list returned 404, treating as empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let items: Vec<DynamicObject> = items
            .into_iter()
            .map(|mut obj| {
                obj.metadata.managed_fields = None;
                obj
            })
            .collect();
        self.cache.set(&key, &items);
        Ok(items)
    }

    /// Per-pod metrics from `metrics.k8s.io`, empty when the metrics API is absent
    pub async fn list_pod_metrics(&self, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        const METRICS_API: ResourceApi = ResourceApi {
            group: "metrics.k8s.io",
            version: "v1beta1",
            moniker: "",
            kinds: &[("PodMetrics", "pods")],
        };
        self.list_custom_objects(&METRICS_API, "PodMetrics", "pods", namespace)
            .await
    }

    /// Read one container's log.
    ///
    /// Returns `Ok(None)` when the log is unavailable: the pod is gone, or
    /// `previous=true` and the container has no prior terminated instance.
    pub async fn read_pod_log(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        since_seconds: Option<i64>,
        previous: bool,
    ) -> Result<Option<String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams {
            container: Some(container.to_string()),
            since_seconds,
            previous,
            ..Default::default()
        };

        match api.logs(pod, &lp).await {
            Ok(text) => Ok(Some(text)),
            Err(kube::Error::Api(ae)) if ae.code == 404 || (previous && ae.code == 400) => {
                debug!(
                    namespace,
                    pod, container, previous, "log unavailable: {}", ae.message
                );
                Ok(None)
            }
            Err(e) => Err(OpsError::from(e)),
        }
    }
}

/// Strip server-side bookkeeping that only adds noise to a bundle
fn sanitize<K: Collectable>(items: Vec<K>) -> Vec<K> {
    items
        .into_iter()
        .map(|mut item| {
            item.meta_mut().managed_fields = None;
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;

    fn pod_with_managed_fields(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("azure-iot-operations".to_string()),
                managed_fields: Some(vec![ManagedFieldsEntry::default()]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_strips_managed_fields() {
        let pods = sanitize(vec![pod_with_managed_fields("aio-broker-frontend-0")]);
        assert_eq!(pods.len(), 1);
        assert!(pods[0].metadata.managed_fields.is_none());
        assert_eq!(pods[0].name(), "aio-broker-frontend-0");
    }

    #[test]
    fn test_collectable_scopes() {
        assert!(Pod::NAMESPACED);
        assert!(PersistentVolumeClaim::NAMESPACED);
        assert!(!Node::NAMESPACED);
        assert!(!ClusterRole::NAMESPACED);
        assert_eq!(StorageClass::KIND, "StorageClass");
    }
}

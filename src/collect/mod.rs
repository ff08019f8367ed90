//! Subsystem collection plans and archive entries
//!
//! Every platform subsystem is described by a declarative [`SubsystemPlan`]:
//! which workload kinds to fetch, which label selectors and name prefixes
//! identify it, and which custom APIs it installs. The runner in
//! [`runner`] reduces a plan to a stream of [`ArchiveEntry`] values.

pub mod plans;
pub mod runner;

use crate::apis::ResourceApi;
use chrono::{DateTime, Utc};

/// One file inside the support bundle
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// POSIX-style relative path inside the zip
    pub path: String,
    /// File payload
    pub data: Vec<u8>,
    /// Overrides the zip entry timestamp; used for traces, where the entry
    /// must carry the root span's start time
    pub mtime: Option<DateTime<Utc>>,
}

impl ArchiveEntry {
    pub fn new(path: String, data: Vec<u8>) -> Self {
        Self {
            path,
            data,
            mtime: None,
        }
    }

    pub fn with_mtime(path: String, data: Vec<u8>, mtime: DateTime<Utc>) -> Self {
        Self {
            path,
            data,
            mtime: Some(mtime),
        }
    }
}

/// Workload kinds a plan may request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Service,
    ConfigMap,
    PersistentVolumeClaim,
    Job,
    CronJob,
    ClusterRole,
    ClusterRoleBinding,
}

/// Discovers connector stateful sets that lack a stable common label.
///
/// The connector CR instances are listed first; each instance then yields a
/// second stateful-set list with the field selector
/// `metadata.name=<prefix><instance>`.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorDiscovery {
    pub api: ResourceApi,
    pub kind: &'static str,
    pub plural: &'static str,
    pub statefulset_prefix: &'static str,
}

impl ConnectorDiscovery {
    /// Field selector for one connector instance's stateful set
    pub fn field_selector(&self, instance: &str) -> String {
        format!("metadata.name={}{}", self.statefulset_prefix, instance)
    }
}

/// Declarative collection plan for one subsystem
#[derive(Debug, Clone, Copy)]
pub struct SubsystemPlan {
    /// Short tag naming the subsystem; used as an archive directory
    pub moniker: &'static str,
    /// Custom APIs the subsystem installs; presence gates the collector
    pub apis: &'static [ResourceApi],
    /// Workload kinds to capture
    pub workloads: &'static [WorkloadKind],
    /// Label selectors, OR'd: the union of results is collected
    pub label_selectors: &'static [&'static str],
    /// Client-side name-prefix filter applied after the selector
    pub name_prefixes: &'static [&'static str],
    /// Restrict workload listing to known namespaces; empty means all
    pub namespace_hints: &'static [&'static str],
    /// Capture container logs alongside pod manifests
    pub logs: bool,
    /// Capture init container logs too
    pub init_container_logs: bool,
    /// Attempt previous-crash logs
    pub previous_logs: bool,
    /// Capture the per-pod metrics custom object
    pub pod_metrics: bool,
    /// Capture diagnostic metrics (and optionally traces) from the
    /// diagnostics pod
    pub diagnostics: bool,
    /// Connector stateful sets to discover via CR instances
    pub connectors: &'static [ConnectorDiscovery],
}

impl SubsystemPlan {
    /// Approximate work units for progress reporting
    pub fn unit_count(&self) -> usize {
        let custom_kinds: usize = self.apis.iter().map(|api| api.kinds.len()).sum();
        let diagnostics = if self.diagnostics { 2 } else { 0 };
        // Shared plan has neither workloads nor APIs but always three lists
        (self.workloads.len() + custom_kinds + self.connectors.len() + diagnostics).max(3)
    }

    /// Whether `name` passes the plan's prefix filter
    pub fn matches_prefix(&self, name: &str) -> bool {
        self.name_prefixes.is_empty()
            || self.name_prefixes.iter().any(|p| name.starts_with(p))
    }
}

/// `<ns>/<moniker>/<kind>.<name>.yaml`, or `<moniker>/<kind>.<name>.yaml`
/// for cluster-scoped resources
pub fn manifest_path(namespace: Option<&str>, moniker: &str, kind: &str, name: &str) -> String {
    let kind = kind.to_lowercase();
    match namespace {
        Some(ns) => format!("{ns}/{moniker}/{kind}.{name}.yaml"),
        None => format!("{moniker}/{kind}.{name}.yaml"),
    }
}

/// `<ns>/<moniker>/<kind>.<version>.<name>.yaml` for custom resources
pub fn custom_resource_path(
    namespace: Option<&str>,
    moniker: &str,
    kind: &str,
    version: &str,
    name: &str,
) -> String {
    let kind = kind.to_lowercase();
    match namespace {
        Some(ns) => format!("{ns}/{moniker}/{kind}.{version}.{name}.yaml"),
        None => format!("{moniker}/{kind}.{version}.{name}.yaml"),
    }
}

/// `<ns>/<moniker>/pod.<pod>.<container>[.<qualifier>].log`
pub fn pod_log_path(
    namespace: &str,
    moniker: &str,
    pod: &str,
    container: &str,
    qualifier: Option<&str>,
) -> String {
    match qualifier {
        Some(q) => format!("{namespace}/{moniker}/pod.{pod}.{container}.{q}.log"),
        None => format!("{namespace}/{moniker}/pod.{pod}.{container}.log"),
    }
}

/// `<ns>/<moniker>/pod.<pod>.metric.yaml`
pub fn pod_metric_path(namespace: &str, moniker: &str, pod: &str) -> String {
    format!("{namespace}/{moniker}/pod.{pod}.metric.yaml")
}

/// `<ns>/<moniker>/traces/<basename>.<ext>`
pub fn trace_path(namespace: &str, moniker: &str, basename: &str, ext: &str) -> String {
    format!("{namespace}/{moniker}/traces/{basename}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::MQ_CONNECTOR_API;

    #[test]
    fn test_manifest_paths() {
        assert_eq!(
            manifest_path(Some("azure-iot-operations"), "mq", "Pod", "aio-broker-frontend-0"),
            "azure-iot-operations/mq/pod.aio-broker-frontend-0.yaml"
        );
        assert_eq!(
            manifest_path(None, "meso", "ClusterRole", "aio-observability"),
            "meso/clusterrole.aio-observability.yaml"
        );
    }

    #[test]
    fn test_custom_resource_path_includes_version() {
        assert_eq!(
            custom_resource_path(Some("ns"), "mq", "Broker", "v1beta1", "default"),
            "ns/mq/broker.v1beta1.default.yaml"
        );
    }

    #[test]
    fn test_pod_log_paths() {
        assert_eq!(
            pod_log_path("ns", "mq", "p", "c", None),
            "ns/mq/pod.p.c.log"
        );
        assert_eq!(
            pod_log_path("ns", "mq", "p", "c", Some("previous")),
            "ns/mq/pod.p.c.previous.log"
        );
        assert_eq!(
            pod_log_path("ns", "mq", "p", "c", Some("init")),
            "ns/mq/pod.p.c.init.log"
        );
    }

    #[test]
    fn test_connector_field_selector() {
        let discovery = ConnectorDiscovery {
            api: MQ_CONNECTOR_API,
            kind: "MqttBridgeConnector",
            plural: "mqttbridgeconnectors",
            statefulset_prefix: "aio-mq-mqttbridge-",
        };
        assert_eq!(
            discovery.field_selector("bridge-a"),
            "metadata.name=aio-mq-mqttbridge-bridge-a"
        );
    }

    #[test]
    fn test_prefix_filter() {
        let plan = SubsystemPlan {
            name_prefixes: &["aio-broker", "aio-mq"],
            ..plans::MQ_PLAN
        };
        assert!(plan.matches_prefix("aio-broker-frontend-0"));
        assert!(plan.matches_prefix("aio-mq-diagnostics-probe-0"));
        assert!(!plan.matches_prefix("cert-manager-0"));
    }
}

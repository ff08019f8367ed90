//! Registered subsystem collection plans
//!
//! One static plan per platform subsystem, enumerated in the order the
//! assembler drives them. Selector strings and name prefixes identify each
//! subsystem's workloads on the cluster.

use super::{ConnectorDiscovery, SubsystemPlan, WorkloadKind};
use crate::apis::{
    AKRI_API, ARCCONTAINERSTORAGE_API, CERTMANAGER_API, DATAFLOW_API, DEVICEREGISTRY_API,
    META_API, MQ_API, MQ_CONNECTOR_API, OPCUA_API, SCHEMAREGISTRY_API, SECRETSTORE_API,
    SECRETSTORE_PROVIDER_API,
};

/// Namespace the platform deploys into by default
pub const AIO_NAMESPACE: &str = "azure-iot-operations";

/// Moniker of the synthetic shared plan (nodes, events, storage classes)
pub const SHARED_MONIKER: &str = "shared";
/// Moniker of the OTel collector plan, always appended in auto mode
pub const OTEL_MONIKER: &str = "otel";

use WorkloadKind::*;

const STANDARD_WORKLOADS: &[WorkloadKind] = &[
    Pod, Deployment, ReplicaSet, StatefulSet, DaemonSet, Service,
];

const MQ_CONNECTORS: &[ConnectorDiscovery] = &[
    ConnectorDiscovery {
        api: MQ_CONNECTOR_API,
        kind: "MqttBridgeConnector",
        plural: "mqttbridgeconnectors",
        statefulset_prefix: "aio-mq-mqttbridge-",
    },
    ConnectorDiscovery {
        api: MQ_CONNECTOR_API,
        kind: "KafkaConnector",
        plural: "kafkaconnectors",
        statefulset_prefix: "aio-mq-kafka-connector-",
    },
    ConnectorDiscovery {
        api: MQ_CONNECTOR_API,
        kind: "DataLakeConnector",
        plural: "datalakeconnectors",
        statefulset_prefix: "aio-mq-datalake-connector-",
    },
];

pub const MQ_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "mq",
    apis: &[MQ_API, MQ_CONNECTOR_API],
    workloads: &[
        Pod, Deployment, ReplicaSet, StatefulSet, DaemonSet, Service, ConfigMap, Job,
    ],
    label_selectors: &["app.kubernetes.io/name=aio-broker"],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: true,
    init_container_logs: true,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: true,
    connectors: MQ_CONNECTORS,
};

pub const OPCUA_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "opcua",
    apis: &[OPCUA_API],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/package=microsoft-iotoperations-opcuabroker"],
    name_prefixes: &["aio-opc-", "opcplc-"],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: true,
    diagnostics: false,
    connectors: &[],
};

pub const DATAFLOW_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "dataflow",
    apis: &[DATAFLOW_API],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/name=aio-dataflow"],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const SCHEMAREGISTRY_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "schemaregistry",
    apis: &[SCHEMAREGISTRY_API],
    workloads: &[
        Pod, Deployment, ReplicaSet, StatefulSet, Service, PersistentVolumeClaim,
    ],
    label_selectors: &["app.kubernetes.io/name=adr-schema-registry"],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const SECRETSTORE_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "secretstore",
    apis: &[SECRETSTORE_API, SECRETSTORE_PROVIDER_API],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/managed-by=secret-sync-controller"],
    name_prefixes: &[],
    // CRs live in the platform namespace; workloads in the controller's own
    namespace_hints: &["azure-secret-store"],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const CERTMANAGER_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "certmanager",
    apis: &[CERTMANAGER_API],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/instance=cert-manager"],
    name_prefixes: &[],
    namespace_hints: &["cert-manager", AIO_NAMESPACE, "azure-arc-acstor"],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const AKRI_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "akri",
    apis: &[AKRI_API],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/name=akri"],
    name_prefixes: &["aio-akri-"],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const ARCCONTAINERSTORAGE_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "arccontainerstorage",
    apis: &[ARCCONTAINERSTORAGE_API],
    workloads: &[
        Pod, Deployment, ReplicaSet, StatefulSet, DaemonSet, Service, ConfigMap,
        PersistentVolumeClaim,
    ],
    label_selectors: &[
        "app.kubernetes.io/part-of=arc-containerstorage",
        "acstor.azure.com/otel-collector=aio",
    ],
    name_prefixes: &[],
    namespace_hints: &["azure-arc-containerstorage", "azure-arc-acstor"],
    logs: true,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const AZUREMONITOR_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "azuremonitor",
    apis: &[],
    // No stable label set; everything is matched by name prefix
    workloads: &[
        Pod, Deployment, ReplicaSet, DaemonSet, Service, ConfigMap,
    ],
    label_selectors: &[],
    name_prefixes: &["ama-", "diagnostic-operator-"],
    namespace_hints: &["azuremonitor"],
    logs: true,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const MESO_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "meso",
    apis: &[],
    workloads: &[
        Pod, Deployment, ReplicaSet, StatefulSet, Service, ConfigMap, ClusterRole,
        ClusterRoleBinding,
    ],
    label_selectors: &["app.kubernetes.io/name=aio-observability"],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

/// Arc agent components, one sub-plan each; only some expose a Service
pub const ARC_AGENT_PREFIXES: &[&str] = &[
    "clusterconnect-agent",
    "cluster-metadata-operator",
    "clusteridentityoperator",
    "config-agent",
    "controller-manager",
    "extension-events-collector",
    "extension-manager",
    "flux-logs-agent",
    "kube-aad-proxy",
    "logcollector",
    "metrics-agent",
    "resource-sync-agent",
];

pub const ARCAGENTS_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "arcagents",
    apis: &[],
    workloads: &[Pod, Deployment, ReplicaSet, Service, ConfigMap],
    label_selectors: &[],
    name_prefixes: ARC_AGENT_PREFIXES,
    namespace_hints: &["azure-arc"],
    logs: true,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const OPENSERVICEMESH_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "openservicemesh",
    apis: &[],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/name=openservicemesh.io"],
    name_prefixes: &[],
    namespace_hints: &["arc-osm-system"],
    logs: true,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const DEVICEREGISTRY_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "deviceregistry",
    apis: &[DEVICEREGISTRY_API],
    // CRs only; the registry has no workloads of its own
    workloads: &[],
    label_selectors: &[],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: false,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const META_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: "meta",
    apis: &[META_API],
    workloads: &[Pod, Deployment, ReplicaSet, Service],
    label_selectors: &["app.kubernetes.io/name=aio-operator"],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: true,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const OTEL_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: OTEL_MONIKER,
    apis: &[],
    workloads: STANDARD_WORKLOADS,
    label_selectors: &["app.kubernetes.io/name=aio-otel-collector"],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: true,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

pub const SHARED_PLAN: SubsystemPlan = SubsystemPlan {
    moniker: SHARED_MONIKER,
    apis: &[],
    workloads: &[],
    label_selectors: &[],
    name_prefixes: &[],
    namespace_hints: &[],
    logs: false,
    init_container_logs: false,
    previous_logs: false,
    pod_metrics: false,
    diagnostics: false,
    connectors: &[],
};

/// All selectable subsystem plans, in assembler order.
///
/// The shared and OTel plans are not listed here: the assembler appends them
/// itself in auto mode, and in explicit mode only when named.
pub const SELECTABLE_PLANS: &[SubsystemPlan] = &[
    MQ_PLAN,
    OPCUA_PLAN,
    DATAFLOW_PLAN,
    SCHEMAREGISTRY_PLAN,
    SECRETSTORE_PLAN,
    CERTMANAGER_PLAN,
    AKRI_PLAN,
    ARCCONTAINERSTORAGE_PLAN,
    AZUREMONITOR_PLAN,
    MESO_PLAN,
    ARCAGENTS_PLAN,
    OPENSERVICEMESH_PLAN,
    DEVICEREGISTRY_PLAN,
    META_PLAN,
];

/// Look up any plan (selectable, shared, or otel) by moniker
pub fn plan_for(moniker: &str) -> Option<&'static SubsystemPlan> {
    if moniker == SHARED_MONIKER {
        return Some(&SHARED_PLAN);
    }
    if moniker == OTEL_MONIKER {
        return Some(&OTEL_PLAN);
    }
    SELECTABLE_PLANS.iter().find(|p| p.moniker == moniker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monikers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for plan in SELECTABLE_PLANS {
            assert!(seen.insert(plan.moniker), "duplicate moniker {}", plan.moniker);
        }
        assert!(!seen.contains(SHARED_MONIKER));
        assert!(!seen.contains(OTEL_MONIKER));
    }

    #[test]
    fn test_plan_lookup() {
        assert_eq!(plan_for("mq").unwrap().moniker, "mq");
        assert_eq!(plan_for("shared").unwrap().moniker, "shared");
        assert_eq!(plan_for("otel").unwrap().moniker, "otel");
        assert!(plan_for("nope").is_none());
    }

    #[test]
    fn test_mq_plan_shape() {
        assert!(MQ_PLAN.diagnostics);
        assert_eq!(MQ_PLAN.connectors.len(), 3);
        assert!(MQ_PLAN.previous_logs);
        assert!(MQ_PLAN.init_container_logs);
    }

    #[test]
    fn test_deviceregistry_is_cr_only() {
        assert!(DEVICEREGISTRY_PLAN.workloads.is_empty());
        assert!(!DEVICEREGISTRY_PLAN.logs);
        assert_eq!(DEVICEREGISTRY_PLAN.apis.len(), 1);
    }

    #[test]
    fn test_schemaregistry_includes_pvcs() {
        assert!(SCHEMAREGISTRY_PLAN
            .workloads
            .contains(&WorkloadKind::PersistentVolumeClaim));
    }

    #[test]
    fn test_meso_includes_cluster_rbac() {
        assert!(MESO_PLAN.workloads.contains(&WorkloadKind::ClusterRole));
        assert!(MESO_PLAN
            .workloads
            .contains(&WorkloadKind::ClusterRoleBinding));
    }
}

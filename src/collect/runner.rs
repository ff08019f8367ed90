//! Plan execution: reduce a subsystem plan to archive entries
//!
//! Failure policy mirrors what operators expect from a triage tool: a failure
//! producing any one entry is logged at debug and skipped, a failure opening
//! the subsystem's API group skips the whole collector (decided upstream by
//! the assembler's probe step).

use super::plans::{AIO_NAMESPACE, SHARED_MONIKER};
use super::{ArchiveEntry, SubsystemPlan, WorkloadKind};
use crate::accessor::{ClusterAccessor, Collectable};
use crate::apis::ApiProbe;
use crate::diagnostics::{DiagnosticsClient, SUPPORT_BUNDLE_TRACE_SENTINEL};
use crate::error::Result;
use crate::traces;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Caller-tunable knobs threaded through every collector
#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    /// Capture logs no older than this many seconds
    pub log_age_seconds: i64,
    /// Capture broker traces from the diagnostics pod
    pub mq_traces: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            log_age_seconds: 86_400,
            mq_traces: false,
        }
    }
}

/// Everything a collector needs to run
pub struct CollectContext<'a> {
    pub accessor: &'a ClusterAccessor,
    pub probe: &'a ApiProbe,
    pub options: CollectOptions,
}

/// Run one subsystem plan to completion and return its archive entries
pub async fn collect_subsystem(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
) -> Result<Vec<ArchiveEntry>> {
    if plan.moniker == SHARED_MONIKER {
        return collect_shared(ctx).await;
    }

    let mut entries = Vec::new();
    let scopes: Vec<Option<&str>> = if plan.namespace_hints.is_empty() {
        vec![None]
    } else {
        plan.namespace_hints.iter().map(|ns| Some(*ns)).collect()
    };

    let mut collected_pods: Vec<Pod> = Vec::new();
    for scope in &scopes {
        for kind in plan.workloads {
            match kind {
                WorkloadKind::Pod => {
                    let pods = workload_union::<Pod>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &pods);
                    collected_pods.extend(pods);
                }
                WorkloadKind::Deployment => {
                    let items = workload_union::<Deployment>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::ReplicaSet => {
                    let items = workload_union::<ReplicaSet>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::StatefulSet => {
                    let items = workload_union::<StatefulSet>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::DaemonSet => {
                    let items = workload_union::<DaemonSet>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::Service => {
                    let items = workload_union::<Service>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::ConfigMap => {
                    let items = workload_union::<ConfigMap>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::PersistentVolumeClaim => {
                    let items = workload_union::<PersistentVolumeClaim>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::Job => {
                    let items = workload_union::<Job>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::CronJob => {
                    let items = workload_union::<CronJob>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::ClusterRole => {
                    let items = workload_union::<ClusterRole>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
                WorkloadKind::ClusterRoleBinding => {
                    let items = workload_union::<ClusterRoleBinding>(ctx, plan, *scope).await;
                    manifest_entries(&mut entries, plan, &items);
                }
            }
        }
    }

    // Pods matched by several selectors or hints are captured once
    dedup_pods(&mut collected_pods);

    if plan.logs {
        entries.extend(pod_log_entries(ctx, plan, &collected_pods).await);
    }
    if plan.pod_metrics {
        entries.extend(pod_metric_entries(ctx, plan, &collected_pods).await);
    }

    entries.extend(custom_resource_entries(ctx, plan).await?);
    entries.extend(connector_statefulset_entries(ctx, plan).await?);

    if plan.diagnostics {
        entries.extend(diagnostics_entries(ctx, plan, &collected_pods).await);
    }

    Ok(entries)
}

/// Union of all label selectors, prefix-filtered, deduplicated by name
async fn workload_union<K: Collectable>(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
    scope: Option<&str>,
) -> Vec<K> {
    let selectors: Vec<Option<&str>> = if plan.label_selectors.is_empty() {
        vec![None]
    } else {
        plan.label_selectors.iter().map(|s| Some(*s)).collect()
    };

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for selector in selectors {
        let listed: Vec<K> = match ctx.accessor.list(scope, selector, None).await {
            Ok(listed) => listed,
            Err(e) => {
                debug!(
                    kind = K::KIND,
                    moniker = plan.moniker,
                    "workload list failed, skipping: {e}"
                );
                continue;
            }
        };
        for item in listed {
            if !plan.matches_prefix(item.name()) {
                continue;
            }
            let key = format!("{}/{}", item.namespace().unwrap_or_default(), item.name());
            if seen.insert(key) {
                items.push(item);
            }
        }
    }
    items
}

/// One YAML manifest entry per resource
fn manifest_entries<K: Collectable>(
    entries: &mut Vec<ArchiveEntry>,
    plan: &SubsystemPlan,
    items: &[K],
) {
    for item in items {
        let path = super::manifest_path(item.namespace(), plan.moniker, K::KIND, item.name());
        match yaml_bytes(item) {
            Ok(data) => entries.push(ArchiveEntry::new(path, data)),
            Err(e) => debug!(%path, "failed to serialize manifest: {e}"),
        }
    }
}

fn dedup_pods(pods: &mut Vec<Pod>) {
    let mut seen = HashSet::new();
    pods.retain(|pod| {
        seen.insert(format!(
            "{}/{}",
            pod.namespace().unwrap_or_default(),
            pod.name()
        ))
    });
}

/// Container logs for every collected pod: current, previous crash, and init
async fn pod_log_entries(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
    pods: &[Pod],
) -> Vec<ArchiveEntry> {
    let futures = pods.iter().map(|pod| single_pod_logs(ctx, plan, pod));
    futures::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn single_pod_logs(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
    pod: &Pod,
) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let Some(namespace) = pod.namespace() else {
        return entries;
    };
    let pod_name = pod.name();
    let Some(spec) = &pod.spec else {
        return entries;
    };

    let since = Some(ctx.options.log_age_seconds);
    for container in &spec.containers {
        if let Some(log) = read_log(ctx, namespace, pod_name, &container.name, since, false).await {
            entries.push(ArchiveEntry::new(
                super::pod_log_path(namespace, plan.moniker, pod_name, &container.name, None),
                log.into_bytes(),
            ));
        }
        if plan.previous_logs {
            if let Some(log) =
                read_log(ctx, namespace, pod_name, &container.name, since, true).await
            {
                entries.push(ArchiveEntry::new(
                    super::pod_log_path(
                        namespace,
                        plan.moniker,
                        pod_name,
                        &container.name,
                        Some("previous"),
                    ),
                    log.into_bytes(),
                ));
            }
        }
    }

    if plan.init_container_logs {
        for container in spec.init_containers.as_deref().unwrap_or_default() {
            if let Some(log) =
                read_log(ctx, namespace, pod_name, &container.name, since, false).await
            {
                entries.push(ArchiveEntry::new(
                    super::pod_log_path(
                        namespace,
                        plan.moniker,
                        pod_name,
                        &container.name,
                        Some("init"),
                    ),
                    log.into_bytes(),
                ));
            }
        }
    }

    entries
}

async fn read_log(
    ctx: &CollectContext<'_>,
    namespace: &str,
    pod: &str,
    container: &str,
    since: Option<i64>,
    previous: bool,
) -> Option<String> {
    match ctx
        .accessor
        .read_pod_log(namespace, pod, container, since, previous)
        .await
    {
        Ok(log) => log,
        Err(e) => {
            debug!(namespace, pod, container, previous, "log read failed: {e}");
            None
        }
    }
}

/// Per-pod metrics objects from `metrics.k8s.io`
async fn pod_metric_entries(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
    pods: &[Pod],
) -> Vec<ArchiveEntry> {
    let namespaces: BTreeSet<&str> = pods.iter().filter_map(|p| p.namespace()).collect();

    let mut entries = Vec::new();
    for namespace in namespaces {
        let metrics = match ctx.accessor.list_pod_metrics(Some(namespace)).await {
            Ok(metrics) => metrics,
            Err(e) => {
                debug!(namespace, "pod metrics unavailable: {e}");
                continue;
            }
        };
        let by_name: HashMap<&str, _> = metrics
            .iter()
            .filter_map(|m| m.metadata.name.as_deref().map(|n| (n, m)))
            .collect();

        for pod in pods.iter().filter(|p| p.namespace() == Some(namespace)) {
            if let Some(metric) = by_name.get(pod.name()) {
                let path = super::pod_metric_path(namespace, plan.moniker, pod.name());
                match yaml_bytes(metric) {
                    Ok(data) => entries.push(ArchiveEntry::new(path, data)),
                    Err(e) => debug!(%path, "failed to serialize pod metrics: {e}"),
                }
            }
        }
    }
    entries
}

/// Custom resources for every present API the plan declares
async fn custom_resource_entries(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    for api in ctx.probe.filter_present(plan.apis).await? {
        for (kind, plural) in api.kinds {
            let objects = match ctx
                .accessor
                .list_custom_objects(&api, kind, plural, None)
                .await
            {
                Ok(objects) => objects,
                Err(e) => {
                    debug!(%api, kind, "custom object list failed, skipping: {e}");
                    continue;
                }
            };
            for object in objects {
                let name = object.metadata.name.as_deref().unwrap_or_default();
                let path = super::custom_resource_path(
                    object.metadata.namespace.as_deref(),
                    plan.moniker,
                    kind,
                    api.version,
                    name,
                );
                match yaml_bytes(&object) {
                    Ok(data) => entries.push(ArchiveEntry::new(path, data)),
                    Err(e) => debug!(%path, "failed to serialize custom resource: {e}"),
                }
            }
        }
    }
    Ok(entries)
}

/// Connector stateful sets, found per CR instance by field selector.
///
/// These stateful sets carry no stable common label, so the connector CRs are
/// listed first and each instance yields one field-selected list.
async fn connector_statefulset_entries(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    for discovery in plan.connectors {
        if !ctx.probe.is_present(&discovery.api).await? {
            continue;
        }
        let instances = match ctx
            .accessor
            .list_custom_objects(&discovery.api, discovery.kind, discovery.plural, None)
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                debug!(kind = discovery.kind, "connector list failed, skipping: {e}");
                continue;
            }
        };

        for instance in instances {
            let Some(name) = instance.metadata.name.as_deref() else {
                continue;
            };
            let namespace = instance.metadata.namespace.as_deref();
            let field_selector = discovery.field_selector(name);
            let sets = match ctx
                .accessor
                .list_stateful_sets(namespace, None, Some(&field_selector))
                .await
            {
                Ok(sets) => sets,
                Err(e) => {
                    debug!(%field_selector, "connector statefulset list failed: {e}");
                    continue;
                }
            };
            manifest_entries(&mut entries, plan, &sets);
        }
    }
    Ok(entries)
}

/// Diagnostic metrics (and optionally traces) from the diagnostics pod.
///
/// Port-forward failures skip the capture; the subsystem's other entries are
/// unaffected.
async fn diagnostics_entries(
    ctx: &CollectContext<'_>,
    plan: &SubsystemPlan,
    pods: &[Pod],
) -> Vec<ArchiveEntry> {
    let namespace = pods
        .iter()
        .find_map(|p| p.namespace())
        .unwrap_or(AIO_NAMESPACE);

    let client = match DiagnosticsClient::discover(ctx.accessor, namespace).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            debug!(namespace, "no diagnostics pod found");
            return Vec::new();
        }
        Err(e) => {
            debug!(namespace, "diagnostics pod discovery failed: {e}");
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    match client.fetch_metrics(ctx.accessor.client().clone()).await {
        Ok(body) => entries.push(ArchiveEntry::new(
            format!("{namespace}/{}/diagnostic_metrics.txt", plan.moniker),
            body,
        )),
        Err(e) => debug!("diagnostic metrics capture failed: {e}"),
    }

    if ctx.options.mq_traces {
        let sentinel = vec![SUPPORT_BUNDLE_TRACE_SENTINEL.to_string()];
        match client
            .fetch_traces(ctx.accessor.client().clone(), &sentinel)
            .await
        {
            Ok(traces_data) => {
                for trace in &traces_data {
                    match traces::process_trace(trace) {
                        Ok(Some(record)) => {
                            let base = record.archive_basename();
                            entries.push(ArchiveEntry::with_mtime(
                                super::trace_path(namespace, plan.moniker, &base, "otlp.pb"),
                                record.otlp,
                                record.timestamp,
                            ));
                            entries.push(ArchiveEntry::with_mtime(
                                super::trace_path(namespace, plan.moniker, &base, "tempo.json"),
                                record.tempo,
                                record.timestamp,
                            ));
                        }
                        Ok(None) => {}
                        Err(e) => debug!("trace processing failed: {e}"),
                    }
                }
            }
            Err(e) => debug!("trace capture failed: {e}"),
        }
    }

    entries
}

/// Cluster-wide context every bundle carries: nodes, events, storage classes
async fn collect_shared(ctx: &CollectContext<'_>) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();

    let nodes = ctx.accessor.list_nodes().await?;
    entries.push(ArchiveEntry::new("nodes.yaml".to_string(), yaml_bytes(&nodes)?));

    let events = ctx.accessor.list_events().await?;
    entries.push(ArchiveEntry::new(
        "events.yaml".to_string(),
        yaml_bytes(&events)?,
    ));

    let storage_classes = ctx.accessor.list_storage_classes().await?;
    entries.push(ArchiveEntry::new(
        "storage_classes.yaml".to_string(),
        yaml_bytes(&storage_classes)?,
    ));

    Ok(entries)
}

fn yaml_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_yaml::to_string(value)?.into_bytes())
}

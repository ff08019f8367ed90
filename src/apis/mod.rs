//! Resource API descriptors and cluster discovery probing
//!
//! Each IoT Operations subsystem installs one or more custom API groups. A
//! [`ResourceApi`] names such a group together with the kinds it serves; the
//! [`ApiProbe`] decides which of them are actually deployed by querying
//! discovery once per (group, version) pair.

use crate::error::{OpsError, Result};
use dashmap::DashMap;
use kube::Client;
use tracing::debug;

/// A custom API group the platform may install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceApi {
    /// API group, e.g. `mqttbroker.iotoperations.azure.com`
    pub group: &'static str,
    /// API version, e.g. `v1`
    pub version: &'static str,
    /// Subsystem tag used as an archive directory name
    pub moniker: &'static str,
    /// (kind, plural) pairs served by this group
    pub kinds: &'static [(&'static str, &'static str)],
}

impl ResourceApi {
    /// The `group/version` string used for discovery
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl std::fmt::Display for ResourceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.version)
    }
}

pub const MQ_API: ResourceApi = ResourceApi {
    group: "mqttbroker.iotoperations.azure.com",
    version: "v1",
    moniker: "mq",
    kinds: &[
        ("Broker", "brokers"),
        ("BrokerListener", "brokerlisteners"),
        ("BrokerAuthentication", "brokerauthentications"),
        ("BrokerAuthorization", "brokerauthorizations"),
    ],
};

pub const MQ_CONNECTOR_API: ResourceApi = ResourceApi {
    group: "mqttbroker.iotoperations.azure.com",
    version: "v1beta1",
    moniker: "mq",
    kinds: &[
        ("MqttBridgeConnector", "mqttbridgeconnectors"),
        ("KafkaConnector", "kafkaconnectors"),
        ("DataLakeConnector", "datalakeconnectors"),
    ],
};

pub const OPCUA_API: ResourceApi = ResourceApi {
    group: "opcuabroker.iotoperations.azure.com",
    version: "v1beta1",
    moniker: "opcua",
    kinds: &[
        ("AssetType", "assettypes"),
        ("ModuleType", "moduletypes"),
        ("Module", "modules"),
    ],
};

pub const DATAFLOW_API: ResourceApi = ResourceApi {
    group: "connectivity.iotoperations.azure.com",
    version: "v1",
    moniker: "dataflow",
    kinds: &[
        ("Dataflow", "dataflows"),
        ("DataflowEndpoint", "dataflowendpoints"),
        ("DataflowProfile", "dataflowprofiles"),
    ],
};

pub const DEVICEREGISTRY_API: ResourceApi = ResourceApi {
    group: "deviceregistry.microsoft.com",
    version: "v1",
    moniker: "deviceregistry",
    kinds: &[
        ("Asset", "assets"),
        ("AssetEndpointProfile", "assetendpointprofiles"),
    ],
};

pub const META_API: ResourceApi = ResourceApi {
    group: "iotoperations.azure.com",
    version: "v1",
    moniker: "meta",
    kinds: &[("Instance", "instances")],
};

pub const SECRETSTORE_API: ResourceApi = ResourceApi {
    group: "secret-sync.x-k8s.io",
    version: "v1alpha1",
    moniker: "secretstore",
    kinds: &[("SecretSync", "secretsyncs")],
};

pub const SECRETSTORE_PROVIDER_API: ResourceApi = ResourceApi {
    group: "secrets-store.csi.x-k8s.io",
    version: "v1",
    moniker: "secretstore",
    kinds: &[("SecretProviderClass", "secretproviderclasses")],
};

pub const CERTMANAGER_API: ResourceApi = ResourceApi {
    group: "cert-manager.io",
    version: "v1",
    moniker: "certmanager",
    kinds: &[
        ("Certificate", "certificates"),
        ("Issuer", "issuers"),
        ("ClusterIssuer", "clusterissuers"),
    ],
};

pub const AKRI_API: ResourceApi = ResourceApi {
    group: "akri.sh",
    version: "v0",
    moniker: "akri",
    kinds: &[("Configuration", "configurations"), ("Instance", "instances")],
};

pub const ARCCONTAINERSTORAGE_API: ResourceApi = ResourceApi {
    group: "arccontainerstorage.azure.net",
    version: "v1",
    moniker: "arccontainerstorage",
    kinds: &[("EdgeVolume", "edgevolumes"), ("EdgeSubvolume", "edgesubvolumes")],
};

pub const SCHEMAREGISTRY_API: ResourceApi = ResourceApi {
    group: "schemaregistry.microsoft.com",
    version: "v1",
    moniker: "schemaregistry",
    kinds: &[("Schema", "schemas"), ("SchemaVersion", "schemaversions")],
};

/// Probes discovery for the presence of custom API groups.
///
/// Results are cached per (group, version); the probe issues at most one
/// discovery query per pair for the process lifetime.
pub struct ApiProbe {
    client: Client,
    presence: DashMap<String, bool>,
}

impl ApiProbe {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            presence: DashMap::new(),
        }
    }

    /// Whether the given API group/version is served by the cluster
    pub async fn is_present(&self, api: &ResourceApi) -> Result<bool> {
        let key = api.api_version();
        if let Some(present) = self.presence.get(&key) {
            return Ok(*present);
        }

        let present = match self.client.list_api_group_resources(&key).await {
            Ok(_) => true,
            Err(kube::Error::Api(ae)) if ae.code == 404 => false,
            Err(e) => return Err(e.into()),
        };

        debug!(api = %key, present, "probed API group");
        self.presence.insert(key, present);
        Ok(present)
    }

    /// Whether any of the given APIs is present
    pub async fn any_present(&self, apis: &[ResourceApi]) -> Result<bool> {
        for api in apis {
            if self.is_present(api).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The subset of `apis` the cluster serves
    pub async fn filter_present(&self, apis: &[ResourceApi]) -> Result<Vec<ResourceApi>> {
        let mut present = Vec::new();
        for api in apis {
            if self.is_present(api).await? {
                present.push(*api);
            }
        }
        Ok(present)
    }

    /// Fail with [`OpsError::ApiMissing`] unless at least one API is present.
    ///
    /// Used when the operator named a subsystem explicitly; in auto mode the
    /// subsystem is silently skipped instead.
    pub async fn require_any(&self, apis: &[ResourceApi]) -> Result<()> {
        if apis.is_empty() || self.any_present(apis).await? {
            return Ok(());
        }
        Err(OpsError::ApiMissing {
            api: apis[0].api_version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_formatting() {
        assert_eq!(MQ_API.api_version(), "mqttbroker.iotoperations.azure.com/v1");
        assert_eq!(
            CERTMANAGER_API.to_string(),
            "cert-manager.io/v1"
        );
    }

    #[test]
    fn test_descriptors_carry_plurals() {
        for api in [MQ_API, DATAFLOW_API, DEVICEREGISTRY_API, AKRI_API] {
            for (kind, plural) in api.kinds {
                assert!(!kind.is_empty());
                assert_eq!(plural.to_lowercase(), *plural, "plural must be lowercase");
            }
        }
    }
}

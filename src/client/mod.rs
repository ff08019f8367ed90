//! Kubernetes client abstraction

use crate::error::{OpsError, Result};
use kube::{config::KubeConfigOptions, Client, Config};

/// Create a Kubernetes client for the specified context
pub async fn create_client(context: Option<&str>) -> Result<Client> {
    let config = load_config(context).await?;
    Client::try_from(config).map_err(OpsError::from)
}

/// Load Kubernetes configuration
async fn load_config(context: Option<&str>) -> Result<Config> {
    let options = KubeConfigOptions {
        context: context.map(String::from),
        ..Default::default()
    };

    match Config::from_kubeconfig(&options).await {
        Ok(config) => Ok(config),
        // Fall back to in-cluster config when no kubeconfig is available
        Err(kubeconfig_err) => Config::incluster().map_err(|_| {
            OpsError::Config(format!("Failed to load kubeconfig: {kubeconfig_err}"))
        }),
    }
}

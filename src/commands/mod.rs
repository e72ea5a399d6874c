pub mod classify;
pub mod exec;
pub mod logs;

use anyhow::Result;
use tracing::debug;

use kubetap_k8s::KubeClient;

use crate::cli::ClusterArgs;

/// A connected cluster context and the namespace to work in
pub struct Cluster {
    pub client: kube::Client,
    pub namespace: String,
}

impl Cluster {
    pub async fn connect(args: &ClusterArgs) -> Result<Self> {
        let kube_client = KubeClient::new()?;
        let context = kube_client.resolve_context(args.context.as_deref())?;
        let namespace = args
            .namespace
            .clone()
            .unwrap_or_else(|| kube_client.default_namespace(&context));

        debug!(%context, %namespace, "connecting to cluster");
        let client = kube_client.client_for_context(&context).await?;

        Ok(Self { client, namespace })
    }
}

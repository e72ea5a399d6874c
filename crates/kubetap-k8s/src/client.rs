use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;

/// Kubernetes context information
#[derive(Clone, Debug)]
pub struct ContextInfo {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
    pub is_current: bool,
}

/// Kubernetes client wrapper
pub struct KubeClient {
    kubeconfig: Kubeconfig,
    current_context: Option<String>,
}

impl KubeClient {
    /// Create a new KubeClient by loading the kubeconfig
    pub fn new() -> Result<Self> {
        let kubeconfig =
            Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?;

        Ok(Self::from_kubeconfig(kubeconfig))
    }

    pub fn from_kubeconfig(kubeconfig: Kubeconfig) -> Self {
        let current_context = kubeconfig.current_context.clone();
        Self {
            kubeconfig,
            current_context,
        }
    }

    /// Get all available contexts from kubeconfig
    pub fn contexts(&self) -> Vec<ContextInfo> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|ctx| {
                let context = ctx.context.as_ref();
                ContextInfo {
                    name: ctx.name.clone(),
                    cluster: context.map(|c| c.cluster.clone()).unwrap_or_default(),
                    user: context.and_then(|c| c.user.clone()).unwrap_or_default(),
                    namespace: context.and_then(|c| c.namespace.clone()),
                    is_current: Some(&ctx.name) == self.current_context.as_ref(),
                }
            })
            .collect()
    }

    /// Resolve an optional context name to a concrete one, falling back to
    /// the kubeconfig's current context
    pub fn resolve_context(&self, context_name: Option<&str>) -> Result<String> {
        let name = context_name
            .or(self.current_context.as_deref())
            .context("No context given and kubeconfig has no current-context")?;

        let contexts = self.contexts();
        if !contexts.iter().any(|c| c.name == name) {
            let known: Vec<&str> = contexts.iter().map(|c| c.name.as_str()).collect();
            anyhow::bail!(
                "Context '{}' not found in kubeconfig (available: {})",
                name,
                known.join(", ")
            );
        }

        Ok(name.to_string())
    }

    /// Default namespace configured for a context
    pub fn default_namespace(&self, context_name: &str) -> String {
        self.kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .and_then(|c| c.context.as_ref())
            .and_then(|c| c.namespace.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Create a kube::Client for a specific context
    pub async fn client_for_context(&self, context_name: &str) -> Result<kube::Client> {
        let config = kube::Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .context(format!(
            "Failed to create config for context: {}",
            context_name
        ))?;

        let client = kube::Client::try_from(config).context(format!(
            "Failed to create client for context: {}",
            context_name
        ))?;

        debug!(context = context_name, "created kube client");
        Ok(client)
    }
}

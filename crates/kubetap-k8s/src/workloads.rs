//! Workload to pod resolution

use std::fmt::Debug;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Api;
use kube::api::ListParams;
use tracing::debug;

use kubetap_types::{LogTarget, WorkloadKind, WorkloadRef};

trait HasSelector {
    fn selector(&self) -> Option<&LabelSelector>;
}

impl HasSelector for Deployment {
    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasSelector for StatefulSet {
    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasSelector for DaemonSet {
    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasSelector for ReplicaSet {
    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl HasSelector for Job {
    fn selector(&self) -> Option<&LabelSelector> {
        self.spec.as_ref().and_then(|s| s.selector.as_ref())
    }
}

/// Render a LabelSelector in the API's label selector syntax.
///
/// Returns `None` for an empty selector, which would otherwise match every
/// pod in the namespace.
pub fn selector_string(selector: &LabelSelector) -> Option<String> {
    let mut terms = Vec::new();

    if let Some(labels) = &selector.match_labels {
        terms.extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr.values.as_deref().unwrap_or_default().join(",");
            let term = match expr.operator.as_str() {
                "In" => format!("{} in ({})", expr.key, values),
                "NotIn" => format!("{} notin ({})", expr.key, values),
                "Exists" => expr.key.clone(),
                "DoesNotExist" => format!("!{}", expr.key),
                _ => continue,
            };
            terms.push(term);
        }
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(","))
    }
}

async fn selector_for<T>(client: &kube::Client, workload: &WorkloadRef) -> Result<String>
where
    T: k8s_openapi::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + k8s_openapi::Metadata<Ty = ObjectMeta>
        + HasSelector
        + serde::de::DeserializeOwned
        + serde::Serialize
        + Clone
        + Debug
        + Send
        + Sync,
{
    let api: Api<T> = Api::namespaced(client.clone(), &workload.namespace);
    let resource = api
        .get(&workload.name)
        .await
        .context(format!("Failed to get {}", workload))?;

    resource
        .selector()
        .and_then(selector_string)
        .context(format!("{} has no pod selector", workload))
}

/// Resolve a workload reference to the pods it currently owns.
///
/// An unknown workload, a missing selector or an empty match is an error so
/// callers never start an empty log stream silently.
pub async fn pods_for_workload(
    client: &kube::Client,
    workload: &WorkloadRef,
) -> Result<Vec<LogTarget>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), &workload.namespace);

    let selector = match workload.kind {
        WorkloadKind::Pod => {
            pods.get(&workload.name)
                .await
                .context(format!("Failed to get {}", workload))?;
            return Ok(vec![LogTarget::pod(&workload.namespace, &workload.name)]);
        }
        WorkloadKind::Deployment => selector_for::<Deployment>(client, workload).await?,
        WorkloadKind::StatefulSet => selector_for::<StatefulSet>(client, workload).await?,
        WorkloadKind::DaemonSet => selector_for::<DaemonSet>(client, workload).await?,
        WorkloadKind::ReplicaSet => selector_for::<ReplicaSet>(client, workload).await?,
        WorkloadKind::Job => selector_for::<Job>(client, workload).await?,
    };

    debug!(%workload, selector = %selector, "listing pods for workload");

    let list = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .context(format!("Failed to list pods for {}", workload))?;

    let targets: Vec<LogTarget> = list
        .items
        .into_iter()
        .filter_map(|pod| pod.metadata.name)
        .map(|name| LogTarget::pod(&workload.namespace, name))
        .collect();

    if targets.is_empty() {
        anyhow::bail!("No pods match {} (selector {})", workload, selector);
    }

    Ok(targets)
}

/// List the container names of a pod, in spec order
pub async fn container_names(
    client: &kube::Client,
    namespace: &str,
    pod: &str,
) -> Result<Vec<String>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = pods
        .get(pod)
        .await
        .context(format!("Failed to get pod {} in {}", pod, namespace))?;

    Ok(pod
        .spec
        .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
        .unwrap_or_default())
}

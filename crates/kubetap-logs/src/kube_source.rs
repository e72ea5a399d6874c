//! Kubernetes-backed log source and target resolver

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{AsyncReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;

use kubetap_types::{LogOptions, LogTarget, WorkloadRef};

use crate::source::{ByteStream, LogSource, StreamEncoding, TargetResolver};

const READ_CHUNK: usize = 16 * 1024;

/// Pod log endpoint of one cluster. The client is bound to a context.
#[derive(Clone)]
pub struct KubeLogSource {
    client: kube::Client,
}

impl KubeLogSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn params(target: &LogTarget, options: &LogOptions) -> LogParams {
        LogParams {
            follow: options.follow,
            container: target.container.clone(),
            // since_seconds takes precedence over tail_lines
            tail_lines: if options.since_seconds.is_some() {
                None
            } else {
                options.tail_lines
            },
            since_seconds: options.since_seconds,
            timestamps: options.timestamps,
            previous: options.previous,
            ..Default::default()
        }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    fn encoding(&self) -> StreamEncoding {
        StreamEncoding::Linear
    }

    async fn open(&self, target: &LogTarget, options: &LogOptions) -> Result<ByteStream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let reader = api
            .log_stream(&target.name, &Self::params(target, options))
            .await
            .context(format!("Failed to open log stream for {}", target))?;

        let chunks = futures::stream::try_unfold(Box::pin(reader), |mut reader| async move {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = reader.read(&mut buf).await.context("Failed to read log stream")?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok::<_, anyhow::Error>(Some((buf, reader)))
        });

        Ok(chunks.boxed())
    }
}

/// Workload and container resolution over one cluster
#[derive(Clone)]
pub struct KubeResolver {
    client: kube::Client,
}

impl KubeResolver {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TargetResolver for KubeResolver {
    async fn resolve_workload(&self, workload: &WorkloadRef) -> Result<Vec<LogTarget>> {
        kubetap_k8s::pods_for_workload(&self.client, workload).await
    }

    async fn list_containers(&self, namespace: &str, pod: &str) -> Result<Vec<String>> {
        kubetap_k8s::container_names(&self.client, namespace, pod).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_options() {
        let target = LogTarget::pod("prod", "api-1").with_container("app");
        let options = LogOptions {
            follow: false,
            tail_lines: Some(50),
            timestamps: true,
            previous: true,
            ..Default::default()
        };

        let params = KubeLogSource::params(&target, &options);
        assert!(!params.follow);
        assert_eq!(params.container.as_deref(), Some("app"));
        assert_eq!(params.tail_lines, Some(50));
        assert!(params.timestamps);
        assert!(params.previous);
    }

    #[test]
    fn test_since_overrides_tail() {
        let options = LogOptions {
            since_seconds: Some(300),
            ..Default::default()
        };
        let params = KubeLogSource::params(&LogTarget::pod("ns", "p"), &options);
        assert_eq!(params.tail_lines, None);
        assert_eq!(params.since_seconds, Some(300));
    }
}

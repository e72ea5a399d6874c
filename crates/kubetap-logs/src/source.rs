//! Seams to the transport and resource-resolution collaborators

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use kubetap_types::{LogOptions, LogTarget, WorkloadRef};

/// Raw chunks of one streaming log read
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// How a source's bytes are laid out on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEncoding {
    /// Plain text lines (the orchestrator log API)
    Linear,
    /// Container-engine frames, or raw text when the container has a TTY
    Multiplexed,
}

/// A backend that can open one streaming log read per target
#[async_trait]
pub trait LogSource: Send + Sync {
    fn encoding(&self) -> StreamEncoding;

    /// Open the log endpoint of `target` with `options` as query parameters
    async fn open(&self, target: &LogTarget, options: &LogOptions) -> Result<ByteStream>;
}

/// Resolution of workloads to concrete log targets
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Pods currently backing a workload. Unknown kinds, missing selectors
    /// and empty matches are errors.
    async fn resolve_workload(&self, workload: &WorkloadRef) -> Result<Vec<LogTarget>>;

    /// Container names of a pod
    async fn list_containers(&self, namespace: &str, pod: &str) -> Result<Vec<String>>;
}

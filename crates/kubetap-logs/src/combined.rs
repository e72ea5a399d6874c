use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use kubetap_types::{LogOptions, LogTarget, WorkloadRef};

use crate::error::StreamError;
use crate::reader::{ErrorCallback, LineCallback, PodLogReader, ReaderExit};
use crate::scope::CancelScope;
use crate::source::{LogSource, TargetResolver};

/// Cloneable handle that stops a combined stream
#[derive(Clone, Debug)]
pub struct StopHandle {
    scope: CancelScope,
}

impl StopHandle {
    /// Stop every reader. Idempotent; once it returns no callback fires.
    pub fn stop(&self) {
        self.scope.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// Fan-out of one reader per target into a single callback stream.
///
/// Entries arrive in arrival order with no ordering across sources. A
/// failing source reports through the error callback and the others keep
/// streaming. Dropping the stream stops it.
pub struct CombinedLogStream {
    scope: CancelScope,
    targets: Vec<LogTarget>,
    tasks: Vec<JoinHandle<ReaderExit>>,
}

impl CombinedLogStream {
    /// Start one reader per target. Must be called inside a tokio runtime.
    pub fn start(
        source: Arc<dyn LogSource>,
        targets: Vec<LogTarget>,
        options: LogOptions,
        on_line: LineCallback,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let scope = CancelScope::new();

        let tasks = targets
            .iter()
            .map(|target| {
                let reader = PodLogReader::new(
                    Arc::clone(&source),
                    target.clone(),
                    options.clone(),
                    Arc::clone(&on_line),
                    on_error.clone(),
                    scope.clone(),
                );
                tokio::spawn(reader.run())
            })
            .collect();

        info!(sources = targets.len(), "started combined log stream");

        Self {
            scope,
            targets,
            tasks,
        }
    }

    /// Resolve workloads to targets, then start.
    ///
    /// Any resolution failure fails the whole start; nothing is streamed.
    /// With `container` set every pod is narrowed to that container; with
    /// `options.all_containers` every pod is expanded to all of its
    /// containers.
    pub async fn start_for_workloads(
        resolver: &dyn TargetResolver,
        source: Arc<dyn LogSource>,
        workloads: &[WorkloadRef],
        container: Option<&str>,
        options: LogOptions,
        on_line: LineCallback,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self, StreamError> {
        let targets =
            resolve_targets(resolver, workloads, container, options.all_containers).await?;
        Ok(Self::start(source, targets, options, on_line, on_error))
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            scope: self.scope.clone(),
        }
    }

    /// Stop every reader. Idempotent; once it returns no callback fires.
    pub fn stop(&self) {
        if !self.scope.is_cancelled() {
            debug!(sources = self.targets.len(), "stopping combined log stream");
        }
        self.scope.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn targets(&self) -> &[LogTarget] {
        &self.targets
    }

    /// Check if any readers are still running
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Get the number of readers still running
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Wait for every reader to finish, returning how each one ended
    pub async fn wait(&mut self) -> Vec<ReaderExit> {
        let mut exits = Vec::with_capacity(self.tasks.len());
        for task in self.tasks.drain(..) {
            exits.push(task.await.unwrap_or(ReaderExit::Cancelled));
        }
        exits
    }
}

impl Drop for CombinedLogStream {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn resolve_targets(
    resolver: &dyn TargetResolver,
    workloads: &[WorkloadRef],
    container: Option<&str>,
    all_containers: bool,
) -> Result<Vec<LogTarget>, StreamError> {
    let resolve_err = |err: anyhow::Error| StreamError::Resolve(format!("{:#}", err));

    let mut pods = Vec::new();
    for workload in workloads {
        pods.extend(resolver.resolve_workload(workload).await.map_err(resolve_err)?);
    }

    let mut seen = HashSet::new();
    pods.retain(|pod| seen.insert(pod.clone()));

    let targets = match container {
        Some(container) => pods.into_iter().map(|pod| pod.with_container(container)).collect(),
        None if all_containers => {
            let mut targets = Vec::new();
            for pod in pods {
                let containers = resolver
                    .list_containers(&pod.namespace, &pod.name)
                    .await
                    .map_err(resolve_err)?;
                targets.extend(containers.into_iter().map(|c| pod.clone().with_container(c)));
            }
            targets
        }
        None => pods,
    };

    if targets.is_empty() {
        return Err(StreamError::Resolve("no log sources resolved".to_string()));
    }

    Ok(targets)
}

//! In-memory fakes for the source and resolver seams

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;

use kubetap_types::{LogEntry, LogOptions, LogTarget, WorkloadKind, WorkloadRef};

use crate::error::StreamError;
use crate::reader::{ErrorCallback, LineCallback};
use crate::source::{ByteStream, LogSource, StreamEncoding, TargetResolver};

pub fn docker_frame(kind: u8, payload: &str) -> Vec<u8> {
    let mut out = vec![kind, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload.as_bytes());
    out
}

enum Behavior {
    Chunks(Vec<Vec<u8>>),
    ChunksThenError(Vec<Vec<u8>>, String),
    OpenError(String),
    Live(mpsc::UnboundedReceiver<Vec<u8>>),
}

/// Scripted log source keyed by target name
pub struct FakeSource {
    encoding: StreamEncoding,
    behaviors: Mutex<HashMap<String, Behavior>>,
    opened: Mutex<Vec<LogTarget>>,
}

impl FakeSource {
    pub fn linear() -> Self {
        Self::with_encoding(StreamEncoding::Linear)
    }

    pub fn multiplexed() -> Self {
        Self::with_encoding(StreamEncoding::Multiplexed)
    }

    fn with_encoding(encoding: StreamEncoding) -> Self {
        Self {
            encoding,
            behaviors: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunks(self, name: &str, chunks: Vec<Vec<u8>>) -> Self {
        self.behaviors.lock().insert(name.to_string(), Behavior::Chunks(chunks));
        self
    }

    pub fn with_chunks_then_error(self, name: &str, chunks: Vec<Vec<u8>>, error: &str) -> Self {
        self.behaviors
            .lock()
            .insert(name.to_string(), Behavior::ChunksThenError(chunks, error.to_string()));
        self
    }

    pub fn with_open_error(self, name: &str, error: &str) -> Self {
        self.behaviors
            .lock()
            .insert(name.to_string(), Behavior::OpenError(error.to_string()));
        self
    }

    /// A stream fed chunk by chunk through the returned sender
    pub fn with_live(self, name: &str) -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded();
        self.behaviors.lock().insert(name.to_string(), Behavior::Live(rx));
        (self, tx)
    }

    pub fn opened(&self) -> Vec<LogTarget> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl LogSource for FakeSource {
    fn encoding(&self) -> StreamEncoding {
        self.encoding
    }

    async fn open(&self, target: &LogTarget, _options: &LogOptions) -> Result<ByteStream> {
        self.opened.lock().push(target.clone());
        let behavior = self
            .behaviors
            .lock()
            .remove(&target.name)
            .ok_or_else(|| anyhow!("no such source {}", target.name))?;

        match behavior {
            Behavior::Chunks(chunks) => {
                Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            Behavior::ChunksThenError(chunks, error) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(anyhow!(error))));
                Ok(futures::stream::iter(items).boxed())
            }
            Behavior::OpenError(error) => Err(anyhow!(error)),
            Behavior::Live(rx) => Ok(rx.map(Ok).boxed()),
        }
    }
}

/// Resolver over a fixed table of workloads and pod containers
#[derive(Default)]
pub struct FakeResolver {
    pub workloads: HashMap<String, Vec<String>>,
    pub containers: HashMap<String, Vec<String>>,
}

#[async_trait]
impl TargetResolver for FakeResolver {
    async fn resolve_workload(&self, workload: &WorkloadRef) -> Result<Vec<LogTarget>> {
        if workload.kind == WorkloadKind::Pod {
            return Ok(vec![LogTarget::pod(&workload.namespace, &workload.name)]);
        }
        let pods = self
            .workloads
            .get(&workload.name)
            .ok_or_else(|| anyhow!("{} not found", workload))?;
        Ok(pods
            .iter()
            .map(|pod| LogTarget::pod(&workload.namespace, pod))
            .collect())
    }

    async fn list_containers(&self, _namespace: &str, pod: &str) -> Result<Vec<String>> {
        self.containers
            .get(pod)
            .cloned()
            .ok_or_else(|| anyhow!("pod {} not found", pod))
    }
}

/// Collects callback invocations
#[derive(Clone, Default)]
pub struct Recorder {
    lines: Arc<Mutex<Vec<LogEntry>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn on_line(&self) -> LineCallback {
        let lines = Arc::clone(&self.lines);
        Arc::new(move |entry: LogEntry| lines.lock().push(entry))
    }

    pub fn on_error(&self) -> ErrorCallback {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |err: StreamError| errors.lock().push(err.to_string()))
    }

    pub fn lines(&self) -> Vec<LogEntry> {
        self.lines.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines.lock().iter().map(|e| e.message.clone()).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

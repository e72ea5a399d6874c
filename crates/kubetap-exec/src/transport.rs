use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Sink;
use futures::stream::BoxStream;

use kubetap_types::LogTarget;

/// Outbound half of an exec socket; each item is one encoded frame
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = anyhow::Error> + Send>>;

/// Inbound half of an exec socket; the stream ending means the socket closed
pub type FrameStream = BoxStream<'static, Result<Vec<u8>>>;

/// An open exec socket
pub struct ExecSocket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens exec sockets to containers
#[async_trait]
pub trait ExecTransport: Send + Sync {
    /// Open a socket running `command` in the target. The target's container
    /// selects one container of the pod.
    async fn open(&self, target: &LogTarget, command: &[String]) -> Result<ExecSocket>;
}

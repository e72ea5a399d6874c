//! Exec sockets over the Kubernetes pod exec endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{AttachParams, AttachedProcess};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use kubetap_types::{ExecChannel, LogTarget, TerminalSize};

use crate::codec::ExecChannelCodec;
use crate::transport::{ExecSocket, ExecTransport};

const READ_CHUNK: usize = 8 * 1024;

/// Pod exec endpoint of one cluster
#[derive(Clone)]
pub struct KubeExecTransport {
    client: kube::Client,
}

impl KubeExecTransport {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn params(target: &LogTarget) -> AttachParams {
        let params = AttachParams::interactive_tty();
        match &target.container {
            Some(container) => params.container(container.clone()),
            None => params,
        }
    }
}

/// Aborts the exec connection task when the socket is dropped
struct ProcessGuard(AttachedProcess);

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl ExecTransport for KubeExecTransport {
    async fn open(&self, target: &LogTarget, command: &[String]) -> Result<ExecSocket> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let mut process = api
            .exec(&target.name, command.to_vec(), &Self::params(target))
            .await
            .context(format!("Failed to open exec socket to {}", target))?;

        let stdin = process.stdin().context("exec socket has no stdin")?;
        let stdout = process.stdout().context("exec socket has no stdout")?;
        let status = process.take_status().context("exec socket has no status channel")?;
        let resize = process.terminal_size();
        let guard = ProcessGuard(process);

        // Outbound frames are routed back to the handle of their channel
        let sink = futures::sink::unfold(
            (stdin, resize),
            |(mut stdin, mut resize), frame: Vec<u8>| async move {
                match ExecChannelCodec::decode(&frame) {
                    Some(message) if message.channel == ExecChannel::Stdin => {
                        stdin
                            .write_all(&message.payload)
                            .await
                            .context("Failed to write to exec stdin")?;
                        stdin.flush().await.context("Failed to write to exec stdin")?;
                    }
                    Some(message) if message.channel == ExecChannel::Resize => {
                        if let Some(tx) = resize.as_mut() {
                            let size: TerminalSize = serde_json::from_slice(&message.payload)
                                .context("Invalid resize payload")?;
                            tx.send(kube::api::TerminalSize {
                                width: size.width,
                                height: size.height,
                            })
                            .await
                            .context("Failed to resize exec terminal")?;
                        }
                    }
                    _ => {}
                }
                Ok::<_, anyhow::Error>((stdin, resize))
            },
        );

        let output = futures::stream::try_unfold(stdout, |mut stdout| async move {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = stdout.read(&mut buf).await.context("Failed to read exec stdout")?;
            if n == 0 {
                return Ok(None);
            }
            let frame = ExecChannelCodec::encode(ExecChannel::Stdout, &buf[..n]);
            Ok::<_, anyhow::Error>(Some((frame, stdout)))
        });

        // The remote status arrives once the process exits
        let status = futures::stream::unfold(Some((status, guard)), |state| async move {
            let (status, guard) = state?;
            let frame = status
                .await
                .and_then(|status| serde_json::to_vec(&status).ok())
                .map(|payload| ExecChannelCodec::encode(ExecChannel::Error, &payload));
            drop(guard);
            Some((frame, None))
        })
        .filter_map(|frame| async move { frame.map(Ok) });

        Ok(ExecSocket {
            sink: Box::pin(sink),
            stream: output.chain(status).boxed(),
        })
    }
}

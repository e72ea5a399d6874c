//! Container-engine HTTP log source
//!
//! Reads `/containers/{id}/logs` from an engine API reachable over TCP
//! (for example `http://127.0.0.1:2375`). The body is multiplexed unless the
//! container runs with a TTY; the demultiplexer tells the two apart.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};

use kubetap_types::{LogOptions, LogTarget};

use crate::source::{ByteStream, LogSource, StreamEncoding};

#[derive(Clone)]
pub struct EngineLogSource {
    base_url: String,
    http: reqwest::Client,
}

impl EngineLogSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Endpoint URL for a container id
    fn logs_url(&self, container_id: &str) -> String {
        format!("{}/containers/{}/logs", self.base_url, container_id)
    }

    fn query(options: &LogOptions, now_unix: i64) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("stdout", "1".to_string()),
            ("stderr", "1".to_string()),
            ("follow", bool_param(options.follow)),
            ("timestamps", bool_param(options.timestamps)),
        ];

        match options.since_seconds {
            Some(since) => query.push(("since", (now_unix - since).to_string())),
            None => {
                if let Some(tail) = options.tail_lines {
                    query.push(("tail", tail.to_string()));
                }
            }
        }

        if let Some(until) = options.until {
            query.push(("until", until.to_string()));
        }

        query
    }
}

fn bool_param(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

#[async_trait]
impl LogSource for EngineLogSource {
    fn encoding(&self) -> StreamEncoding {
        StreamEncoding::Multiplexed
    }

    async fn open(&self, target: &LogTarget, options: &LogOptions) -> Result<ByteStream> {
        let now = chrono::Utc::now().timestamp();
        let response = self
            .http
            .get(self.logs_url(&target.name))
            .query(&Self::query(options, now))
            .send()
            .await
            .context(format!("Failed to reach container engine for {}", target))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("container engine returned {}: {}", status, body.trim());
        }

        Ok(response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|err| anyhow::Error::new(err).context("Failed to read container log stream"))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::docker_frame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response, then drop the connection
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(&response).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let body = "{\"message\":\"No such container: c0ffee\"}";
        let response = format!(
            "HTTP/1.1 404 Not Found\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let source = EngineLogSource::new(serve_once(response.into_bytes()).await);

        let err = match source
            .open(&LogTarget::engine_container("c0ffee"), &LogOptions::default())
            .await
        {
            Ok(_) => panic!("open should fail"),
            Err(err) => format!("{:#}", err),
        };
        assert!(err.contains("404"), "{err}");
        assert!(err.contains("No such container: c0ffee"), "{err}");
    }

    #[tokio::test]
    async fn test_truncated_body_is_a_read_error() {
        let frame = docker_frame(1, "hello\n");
        let mut response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/vnd.docker.multiplexed-stream\r\n\
             Content-Length: {}\r\n\r\n",
            frame.len() + 64
        )
        .into_bytes();
        response.extend_from_slice(&frame);
        let source = EngineLogSource::new(serve_once(response).await);

        let items: Vec<_> = source
            .open(&LogTarget::engine_container("c0ffee"), &LogOptions::default())
            .await
            .unwrap()
            .collect()
            .await;

        let (chunks, errors): (Vec<_>, Vec<_>) = items.into_iter().partition(|item| item.is_ok());
        let received: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        assert_eq!(received, frame);
        let err = errors.into_iter().next().expect("read error").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read container log stream"));
    }

    #[test]
    fn test_logs_url() {
        let source = EngineLogSource::new("http://127.0.0.1:2375/");
        assert_eq!(
            source.logs_url("c0ffee"),
            "http://127.0.0.1:2375/containers/c0ffee/logs"
        );
    }

    #[test]
    fn test_query_tail() {
        let query = EngineLogSource::query(&LogOptions::default(), 1_700_000_000);
        assert_eq!(
            query,
            vec![
                ("stdout", "1".to_string()),
                ("stderr", "1".to_string()),
                ("follow", "1".to_string()),
                ("timestamps", "1".to_string()),
                ("tail", "100".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_since_and_until() {
        let options = LogOptions {
            follow: false,
            since_seconds: Some(60),
            until: Some(1_700_000_030),
            ..Default::default()
        };
        let query = EngineLogSource::query(&options, 1_700_000_000);
        assert!(query.contains(&("follow", "0".to_string())));
        assert!(query.contains(&("since", "1699999940".to_string())));
        assert!(query.contains(&("until", "1700000030".to_string())));
        assert!(!query.iter().any(|(k, _)| *k == "tail"));
    }
}

use std::sync::Arc;

use chrono::DateTime;
use futures::StreamExt;
use tracing::{debug, warn};

use kubetap_types::{LogEntry, LogOptions, LogTarget, StreamKind};

use crate::demux::{DemuxLine, DockerFrameDemultiplexer, FramingError};
use crate::error::StreamError;
use crate::framer::LineFramer;
use crate::scope::CancelScope;
use crate::source::{LogSource, StreamEncoding};

/// Receives every emitted log line
pub type LineCallback = Arc<dyn Fn(LogEntry) + Send + Sync>;

/// Receives at most one error per source
pub type ErrorCallback = Arc<dyn Fn(StreamError) + Send + Sync>;

/// Why a reader stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    /// The backend closed the stream
    Ended,
    /// The scope was cancelled
    Cancelled,
    /// Transport or framing failure, reported through the error callback
    Failed,
}

/// Bytes to lines for one source's encoding
enum LinePipeline {
    Linear(LineFramer),
    Multiplexed(DockerFrameDemultiplexer),
}

impl LinePipeline {
    fn for_encoding(encoding: StreamEncoding) -> Self {
        match encoding {
            StreamEncoding::Linear => Self::Linear(LineFramer::new()),
            StreamEncoding::Multiplexed => Self::Multiplexed(DockerFrameDemultiplexer::new()),
        }
    }

    fn push(&mut self, chunk: &[u8], lines: &mut Vec<DemuxLine>) -> Result<(), FramingError> {
        match self {
            Self::Linear(framer) => {
                lines.extend(framer.push(chunk).into_iter().map(|l| (None, l)));
                Ok(())
            }
            Self::Multiplexed(demux) => demux.push(chunk, lines),
        }
    }

    fn finish(&mut self) -> Vec<DemuxLine> {
        match self {
            Self::Linear(framer) => framer.finish().map(|l| (None, l)).into_iter().collect(),
            Self::Multiplexed(demux) => demux.finish(),
        }
    }
}

/// Split a leading `<RFC3339 timestamp>Z ` prefix off a line.
///
/// Lines without a parseable prefix come back whole.
pub fn split_timestamp(line: &str) -> (Option<&str>, &str) {
    let Some((prefix, rest)) = line.split_once(' ') else {
        return (None, line);
    };

    if prefix.ends_with('Z') && DateTime::parse_from_rfc3339(prefix).is_ok() {
        (Some(prefix), rest)
    } else {
        (None, line)
    }
}

/// One streaming read of one pod's (or container's) log endpoint
pub struct PodLogReader {
    source: Arc<dyn LogSource>,
    target: LogTarget,
    options: LogOptions,
    on_line: LineCallback,
    on_error: Option<ErrorCallback>,
    scope: CancelScope,
}

impl PodLogReader {
    pub fn new(
        source: Arc<dyn LogSource>,
        target: LogTarget,
        options: LogOptions,
        on_line: LineCallback,
        on_error: Option<ErrorCallback>,
        scope: CancelScope,
    ) -> Self {
        Self {
            source,
            target,
            options,
            on_line,
            on_error,
            scope,
        }
    }

    /// Read until the stream ends, fails, or the scope is cancelled
    pub async fn run(self) -> ReaderExit {
        let opened = tokio::select! {
            biased;
            _ = self.scope.cancelled() => return ReaderExit::Cancelled,
            opened = self.source.open(&self.target, &self.options) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return self.fail(StreamError::transport(self.target.source_id(), &err)),
        };

        debug!(source = %self.target, "log stream opened");
        let mut pipeline = LinePipeline::for_encoding(self.source.encoding());

        loop {
            let next = tokio::select! {
                biased;
                _ = self.scope.cancelled() => return ReaderExit::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let mut lines = Vec::new();
                    let pushed = pipeline.push(&chunk, &mut lines);
                    for (kind, line) in lines {
                        if !self.emit(kind, &line) {
                            return ReaderExit::Cancelled;
                        }
                    }
                    if let Err(error) = pushed {
                        return self.fail(StreamError::Framing {
                            source_id: self.target.source_id().to_string(),
                            error,
                        });
                    }
                }
                Some(Err(err)) => {
                    return self.fail(StreamError::transport(self.target.source_id(), &err));
                }
                None => {
                    for (kind, line) in pipeline.finish() {
                        if !self.emit(kind, &line) {
                            return ReaderExit::Cancelled;
                        }
                    }
                    debug!(source = %self.target, "log stream ended");
                    return ReaderExit::Ended;
                }
            }
        }
    }

    /// Deliver one line. Returns false once the scope is cancelled.
    fn emit(&self, stream: Option<StreamKind>, line: &str) -> bool {
        if line.trim().is_empty() {
            return !self.scope.is_cancelled();
        }

        let (timestamp, message) = if self.options.timestamps {
            split_timestamp(line)
        } else {
            (None, line)
        };

        let entry = LogEntry {
            source_id: self.target.source_id().to_string(),
            sub_channel: self.target.container.clone(),
            timestamp: timestamp.map(str::to_string),
            message: message.to_string(),
            stream,
        };

        self.scope.deliver(|| (self.on_line)(entry))
    }

    /// Report a failure once, unless it was caused by cancellation
    fn fail(&self, error: StreamError) -> ReaderExit {
        if self.scope.is_cancelled() {
            return ReaderExit::Cancelled;
        }

        warn!(source = %self.target, %error, "log stream failed");
        if let Some(on_error) = &self.on_error {
            if !self.scope.deliver(|| on_error(error)) {
                return ReaderExit::Cancelled;
            }
        }
        ReaderExit::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, Recorder, docker_frame};

    fn reader(
        source: FakeSource,
        target: LogTarget,
        options: LogOptions,
        rec: &Recorder,
    ) -> PodLogReader {
        PodLogReader::new(
            Arc::new(source),
            target,
            options,
            rec.on_line(),
            Some(rec.on_error()),
            CancelScope::new(),
        )
    }

    #[test]
    fn test_split_timestamp() {
        assert_eq!(
            split_timestamp("2024-01-15T10:30:00.123456789Z some log message"),
            (Some("2024-01-15T10:30:00.123456789Z"), "some log message")
        );
        assert_eq!(split_timestamp("2024-01-15T10:30:00Z x"), (Some("2024-01-15T10:30:00Z"), "x"));
        assert_eq!(split_timestamp("plain message"), (None, "plain message"));
        assert_eq!(split_timestamp("notatimeZ x"), (None, "notatimeZ x"));
        assert_eq!(split_timestamp("──── ╭──╮"), (None, "──── ╭──╮"));
    }

    #[tokio::test]
    async fn test_lines_with_timestamps() {
        let target = LogTarget::pod("default", "api-1").with_container("app");
        let source = FakeSource::linear().with_chunks(
            "api-1",
            vec![
                b"2024-01-15T10:30:00.1Z first\n2024-01-15T10:30:01.2Z sec".to_vec(),
                b"ond\n\n   \n2024-01-15T10:30:02.3Z unterminated".to_vec(),
            ],
        );
        let rec = Recorder::default();

        let exit = reader(source, target, LogOptions::default(), &rec).run().await;
        assert_eq!(exit, ReaderExit::Ended);

        let lines = rec.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].message, "first");
        assert_eq!(lines[0].timestamp.as_deref(), Some("2024-01-15T10:30:00.1Z"));
        assert_eq!(lines[0].sub_channel.as_deref(), Some("app"));
        assert_eq!(lines[1].message, "second");
        assert_eq!(lines[2].message, "unterminated");
        assert!(rec.errors().is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_not_requested() {
        let source = FakeSource::linear()
            .with_chunks("p", vec![b"2024-01-15T10:30:00Z kept whole\n".to_vec()]);
        let rec = Recorder::default();
        let options = LogOptions {
            timestamps: false,
            ..Default::default()
        };

        reader(source, LogTarget::pod("ns", "p"), options, &rec).run().await;
        let lines = rec.lines();
        assert_eq!(lines[0].timestamp, None);
        assert_eq!(lines[0].message, "2024-01-15T10:30:00Z kept whole");
    }

    #[tokio::test]
    async fn test_multiplexed_source() {
        let mut bytes = docker_frame(1, "2024-01-15T10:30:00Z out\n");
        bytes.extend(docker_frame(2, "2024-01-15T10:30:01Z err\n"));
        let chunks = bytes.chunks(5).map(<[u8]>::to_vec).collect();
        let source = FakeSource::multiplexed().with_chunks("c0ffee", chunks);
        let rec = Recorder::default();

        let target = LogTarget::engine_container("c0ffee");
        let exit = reader(source, target, LogOptions::default(), &rec).run().await;
        assert_eq!(exit, ReaderExit::Ended);

        let lines = rec.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "out");
        assert_eq!(lines[0].stream, Some(StreamKind::Stdout));
        assert_eq!(lines[1].message, "err");
        assert_eq!(lines[1].stream, Some(StreamKind::Stderr));
    }

    #[tokio::test]
    async fn test_framing_error_reported_once() {
        let mut bytes = docker_frame(1, "good\n");
        bytes.extend([9, 0, 0, 0, 0, 0, 0, 1, b'x']);
        let source = FakeSource::multiplexed()
            .with_chunks("c1", vec![bytes, docker_frame(1, "never\n")]);
        let rec = Recorder::default();

        let exit = reader(source, LogTarget::engine_container("c1"), LogOptions::default(), &rec)
            .run()
            .await;
        assert_eq!(exit, ReaderExit::Failed);
        assert_eq!(rec.messages(), vec!["good"]);
        let errors = rec.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("invalid stream type 9"));
    }

    #[tokio::test]
    async fn test_open_failure_reported_once() {
        let source = FakeSource::linear().with_open_error("p", "connection refused");
        let rec = Recorder::default();

        let exit = reader(source, LogTarget::pod("ns", "p"), LogOptions::default(), &rec)
            .run()
            .await;
        assert_eq!(exit, ReaderExit::Failed);
        assert!(rec.lines().is_empty());
        assert_eq!(rec.errors(), vec!["p: connection refused"]);
    }

    #[tokio::test]
    async fn test_read_failure_after_lines() {
        let source = FakeSource::linear().with_chunks_then_error(
            "p",
            vec![b"a\nb".to_vec()],
            "reset by peer",
        );
        let rec = Recorder::default();

        let exit = reader(source, LogTarget::pod("ns", "p"), LogOptions::default(), &rec)
            .run()
            .await;
        assert_eq!(exit, ReaderExit::Failed);
        assert_eq!(rec.messages(), vec!["a"]);
        assert_eq!(rec.errors(), vec!["p: reset by peer"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let source = FakeSource::linear().with_chunks("p", vec![b"a\n".to_vec()]);
        let rec = Recorder::default();
        let scope = CancelScope::new();
        scope.cancel();

        let exit = PodLogReader::new(
            Arc::new(source),
            LogTarget::pod("ns", "p"),
            LogOptions::default(),
            rec.on_line(),
            Some(rec.on_error()),
            scope,
        )
        .run()
        .await;

        assert_eq!(exit, ReaderExit::Cancelled);
        assert!(rec.lines().is_empty());
        assert!(rec.errors().is_empty());
    }
}

//! Log streaming for kubetap
//!
//! Byte streams from pod log endpoints and container engines are framed into
//! lines, tagged with their source, and fanned into one callback stream.
//! Lines can be classified for display and kept in a bounded buffer.

mod buffer;
mod classifier;
mod combined;
mod demux;
mod engine;
mod error;
mod framer;
mod kube_source;
mod reader;
mod scope;
mod source;

#[cfg(test)]
mod testing;

pub use buffer::{LevelCounts, LogBuffer};
pub use classifier::LogClassifier;
pub use combined::{CombinedLogStream, StopHandle};
pub use demux::{DemuxLine, DemuxMode, DockerFrameDemultiplexer, FramingError, MAX_FRAME_LEN};
pub use engine::EngineLogSource;
pub use error::StreamError;
pub use framer::LineFramer;
pub use kube_source::{KubeLogSource, KubeResolver};
pub use reader::{ErrorCallback, LineCallback, PodLogReader, ReaderExit, split_timestamp};
pub use scope::CancelScope;
pub use source::{ByteStream, LogSource, StreamEncoding, TargetResolver};

// Re-export types used in our public API
pub use kubetap_types::{
    LogEntry, LogFormat, LogLevel, LogOptions, LogTarget, ParsedLogLine, StreamKind, WorkloadKind,
    WorkloadRef,
};

//! Shared types for kubetap
//!
//! This crate contains data structures used across multiple kubetap crates.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Resource Identity
// ============================================================================

/// Kinds of workload that can be resolved to a set of pods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Job,
}

impl WorkloadKind {
    /// Parse a kind from the kubectl-style names and short aliases
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pod" | "pods" | "po" => Some(Self::Pod),
            "deployment" | "deployments" | "deploy" => Some(Self::Deployment),
            "statefulset" | "statefulsets" | "sts" => Some(Self::StatefulSet),
            "daemonset" | "daemonsets" | "ds" => Some(Self::DaemonSet),
            "replicaset" | "replicasets" | "rs" => Some(Self::ReplicaSet),
            "job" | "jobs" => Some(Self::Job),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::DaemonSet => "daemonset",
            Self::ReplicaSet => "replicaset",
            Self::Job => "job",
        }
    }
}

/// A reference to a workload: kind + name + namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl WorkloadRef {
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Parse `kind/name` or a bare pod name.
    ///
    /// Returns `None` when the kind prefix is not a known workload kind.
    pub fn parse(spec: &str, namespace: &str) -> Option<Self> {
        match spec.split_once('/') {
            Some((kind, name)) => {
                let kind = WorkloadKind::parse(kind)?;
                Some(Self::new(kind, name, namespace))
            }
            None => Some(Self::new(WorkloadKind::Pod, spec, namespace)),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} in {}", self.kind.as_str(), self.name, self.namespace)
    }
}

/// One concrete log source: a pod (optionally a single container in it),
/// or a container id when talking to a container engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogTarget {
    /// Namespace (empty for container-engine targets)
    pub namespace: String,

    /// Pod name or container id
    pub name: String,

    /// Container within the pod
    pub container: Option<String>,
}

impl LogTarget {
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            container: None,
        }
    }

    pub fn engine_container(id: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: id.into(),
            container: None,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Identity used as `LogEntry::source_id`
    pub fn source_id(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}/{}", self.name, container),
            None => f.write_str(&self.name),
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Options for a log read, encoded as query parameters by each backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep the stream open and deliver new lines as they are written
    pub follow: bool,

    /// Number of historical lines to fetch first
    pub tail_lines: Option<i64>,

    /// Ask the backend to prefix every line with an RFC3339 timestamp
    pub timestamps: bool,

    /// Only lines newer than this many seconds
    pub since_seconds: Option<i64>,

    /// Only lines older than this unix timestamp (container engine only)
    pub until: Option<i64>,

    /// Logs of the previous container instance (Kubernetes only)
    pub previous: bool,

    /// Expand pods into one source per container during resolution
    pub all_containers: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: true,
            tail_lines: Some(100),
            timestamps: true,
            since_seconds: None,
            until: None,
            previous: false,
            all_containers: false,
        }
    }
}

/// Which runtime stream a line came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Stream type byte of a multiplexed frame header
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// A single log line from one source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Pod name or container id
    pub source_id: String,

    /// Container name (if the source is one container of a pod)
    pub sub_channel: Option<String>,

    /// Backend timestamp prefix (if requested and present)
    pub timestamp: Option<String>,

    /// Line text without the timestamp prefix
    pub message: String,

    /// Runtime stream, known only for demultiplexed sources
    pub stream: Option<StreamKind>,
}

impl LogEntry {
    pub fn new(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            sub_channel: None,
            timestamp: None,
            message: message.into(),
            stream: None,
        }
    }

    /// Label for display: `source` or `source/container`
    pub fn label(&self) -> String {
        match &self.sub_channel {
            Some(container) => format!("{}/{}", self.source_id, container),
            None => self.source_id.clone(),
        }
    }
}

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    #[default]
    Unknown,
}

impl LogLevel {
    /// Map a level field value to a level.
    ///
    /// Substring rules for errors and warnings, exact matches for the rest.
    pub fn from_label(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        if lower.contains("err") || lower.contains("fatal") || lower.contains("critical") {
            Self::Error
        } else if lower.contains("warn") {
            Self::Warn
        } else {
            match lower.as_str() {
                "info" => Self::Info,
                "debug" => Self::Debug,
                "trace" => Self::Trace,
                _ => Self::Unknown,
            }
        }
    }

    /// Short display string (3 chars)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERR",
            Self::Warn => "WRN",
            Self::Info => "INF",
            Self::Debug => "DBG",
            Self::Trace => "TRC",
            Self::Unknown => "???",
        }
    }
}

/// Recognized shape of a log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// JSON object or array
    Structured,
    /// logfmt-style `key=value` pairs
    LeveledKv,
    /// klog-style `I0101 12:00:00.000000 1 file.go:10] ...`
    PositionalLeveled,
    Plain,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::LeveledKv => "leveled-kv",
            Self::PositionalLeveled => "positional-leveled",
            Self::Plain => "plain",
        }
    }
}

/// Classification of one log line, recomputed per render
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLogLine {
    pub format: LogFormat,
    pub level: LogLevel,
    pub rendered: String,
    pub structured_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ParsedLogLine {
    pub fn plain(line: &str) -> Self {
        Self {
            format: LogFormat::Plain,
            level: LogLevel::Unknown,
            rendered: line.to_string(),
            structured_data: None,
        }
    }
}

// ============================================================================
// Exec Types
// ============================================================================

/// Channel tag of an exec wire frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecChannel {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    Error = 3,
    Resize = 4,
}

impl ExecChannel {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            3 => Some(Self::Error),
            4 => Some(Self::Resize),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Terminal dimensions sent on the resize channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    #[serde(rename = "Width")]
    pub width: u16,
    #[serde(rename = "Height")]
    pub height: u16,
}

impl TerminalSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

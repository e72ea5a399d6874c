//! Container-engine log stream demultiplexing
//!
//! Without a TTY the engine multiplexes stdout and stderr into frames of an
//! 8-byte header followed by the payload:
//!
//! ```text
//! [stream type: 1][0x00 0x00 0x00][payload length: 4, big-endian][payload]
//! ```
//!
//! With a TTY the stream is raw text with no framing at all. Which of the two
//! a stream is gets decided once, from its first bytes.

use thiserror::Error;

use kubetap_types::StreamKind;

use crate::framer::LineFramer;

const HEADER_LEN: usize = 8;

/// Frames larger than this are treated as a corrupt header
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A corrupt multiplexed header. Fatal for the stream it occurred in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid stream type {0} in frame header")]
    InvalidStreamType(u8),

    #[error("non-zero reserved bytes in frame header: {0:02x?}")]
    ReservedBytes([u8; 3]),

    #[error("frame length {0} exceeds the 64 MiB limit")]
    FrameTooLarge(usize),
}

/// A decoded line and the stream it came from (`None` in raw mode)
pub type DemuxLine = (Option<StreamKind>, String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxMode {
    Undetermined,
    Multiplexed,
    Raw,
}

/// Decodes one engine log stream into lines tagged with their stream.
///
/// Owned by exactly one reader; stdout and stderr each get their own
/// line framer so partial lines of the two never splice together.
#[derive(Debug)]
pub struct DockerFrameDemultiplexer {
    mode: DemuxMode,
    buffer: Vec<u8>,
    stdout: LineFramer,
    stderr: LineFramer,
    stdin: LineFramer,
}

impl Default for DockerFrameDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerFrameDemultiplexer {
    pub fn new() -> Self {
        Self {
            mode: DemuxMode::Undetermined,
            buffer: Vec::new(),
            stdout: LineFramer::new(),
            stderr: LineFramer::new(),
            stdin: LineFramer::new(),
        }
    }

    pub fn mode(&self) -> DemuxMode {
        self.mode
    }

    /// Feed one chunk, appending every line it completed to `lines`.
    ///
    /// Lines from frames before a corrupt header are still appended.
    pub fn push(&mut self, chunk: &[u8], lines: &mut Vec<DemuxLine>) -> Result<(), FramingError> {
        if chunk.is_empty() {
            return Ok(());
        }

        if self.mode == DemuxMode::Undetermined {
            self.mode = detect_mode(chunk);
        }

        match self.mode {
            DemuxMode::Raw => {
                lines.extend(self.stdout.push(chunk).into_iter().map(|line| (None, line)));
                Ok(())
            }
            _ => {
                self.buffer.extend_from_slice(chunk);
                self.drain_frames(lines)
            }
        }
    }

    /// End of stream: flush partial lines.
    ///
    /// Bytes of an incomplete trailing frame are dropped.
    pub fn finish(&mut self) -> Vec<DemuxLine> {
        let mut lines = Vec::new();
        match self.mode {
            DemuxMode::Raw => {
                lines.extend(self.stdout.finish().map(|line| (None, line)));
            }
            _ => {
                lines.extend(self.stdin.finish().map(|l| (Some(StreamKind::Stdin), l)));
                lines.extend(self.stdout.finish().map(|l| (Some(StreamKind::Stdout), l)));
                lines.extend(self.stderr.finish().map(|l| (Some(StreamKind::Stderr), l)));
            }
        }
        self.buffer.clear();
        lines
    }

    fn drain_frames(&mut self, lines: &mut Vec<DemuxLine>) -> Result<(), FramingError> {
        let mut offset = 0;

        while self.buffer.len() - offset >= HEADER_LEN {
            let header = &self.buffer[offset..offset + HEADER_LEN];
            let (kind, len) = parse_header(header)?;

            let start = offset + HEADER_LEN;
            if self.buffer.len() < start + len {
                break;
            }

            let payload = &self.buffer[start..start + len];
            let framer = match kind {
                StreamKind::Stdout => &mut self.stdout,
                StreamKind::Stderr => &mut self.stderr,
                StreamKind::Stdin => &mut self.stdin,
            };
            lines.extend(framer.push(payload).into_iter().map(|line| (Some(kind), line)));
            offset = start + len;
        }

        self.buffer.drain(..offset);
        Ok(())
    }
}

fn parse_header(header: &[u8]) -> Result<(StreamKind, usize), FramingError> {
    let kind = StreamKind::from_byte(header[0]).ok_or(FramingError::InvalidStreamType(header[0]))?;
    if header[1..4] != [0, 0, 0] {
        return Err(FramingError::ReservedBytes([header[1], header[2], header[3]]));
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLarge(len));
    }
    Ok((kind, len))
}

/// Stream type byte 0..=2 followed by zero reserved bytes marks a
/// multiplexed stream. Only the bytes present are inspected.
fn detect_mode(first_chunk: &[u8]) -> DemuxMode {
    let probe = &first_chunk[..first_chunk.len().min(4)];
    let framed = probe[0] <= 2 && probe[1..].iter().all(|&b| b == 0);
    if framed {
        DemuxMode::Multiplexed
    } else {
        DemuxMode::Raw
    }
}

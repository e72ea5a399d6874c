//! Exec wire frames: one channel byte followed by the payload

use kubetap_types::{ExecChannel, TerminalSize};

/// One decoded exec frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecChannelMessage {
    pub channel: ExecChannel,
    pub payload: Vec<u8>,
}

impl ExecChannelMessage {
    /// Whether this frame carries process output for the consumer
    pub fn is_output(&self) -> bool {
        matches!(self.channel, ExecChannel::Stdout | ExecChannel::Stderr)
    }
}

pub struct ExecChannelCodec;

impl ExecChannelCodec {
    pub fn encode(channel: ExecChannel, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(channel.as_byte());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn encode_stdin(text: &str) -> Vec<u8> {
        Self::encode(ExecChannel::Stdin, text.as_bytes())
    }

    pub fn encode_resize(size: TerminalSize) -> Vec<u8> {
        // Serializing two integers cannot fail
        let payload = serde_json::to_vec(&size).unwrap_or_default();
        Self::encode(ExecChannel::Resize, &payload)
    }

    /// Split a received frame. Empty frames and unknown tags yield `None`.
    pub fn decode(frame: &[u8]) -> Option<ExecChannelMessage> {
        let (&tag, payload) = frame.split_first()?;
        let channel = ExecChannel::from_byte(tag)?;
        Some(ExecChannelMessage {
            channel,
            payload: payload.to_vec(),
        })
    }
}

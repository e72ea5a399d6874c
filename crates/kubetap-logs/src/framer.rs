/// Splits a chunked byte stream into newline-terminated lines.
///
/// A trailing partial line is carried over to the next chunk. Bytes are
/// only decoded once a line is complete, so a multi-byte character split
/// across chunks decodes correctly.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            if self.pending.is_empty() {
                lines.push(decode_line(head));
            } else {
                self.pending.extend_from_slice(head);
                lines.push(decode_line(&self.pending));
                self.pending.clear();
            }
            rest = &tail[1..];
        }

        self.pending.extend_from_slice(rest);
        lines
    }

    /// Convenience for text chunks
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.push(chunk.as_bytes())
    }

    /// End of stream: emit the unterminated tail, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }

    /// Bytes held back waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

//! Splits the chunked response body into newline-delimited frames.

/// Lines longer than this are dropped rather than buffered forever.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One complete, non-blank line (without the terminator)
    Line(String),
    /// Blank line the service sends to keep the connection open
    KeepAlive,
    /// Line exceeded [`MAX_LINE_BYTES`]; carries the number of bytes dropped
    Oversized(usize),
}

/// Accumulates body chunks and hands back complete frames.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    // Bytes discarded from the current line after it grew too large
    discarding: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Chunks may split lines (and UTF-8 sequences) anywhere.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding > 0 {
                frames.push(Frame::Oversized(self.discarding + head.len()));
                self.discarding = 0;
                continue;
            }

            let len = self.buffer.len() + head.len();
            if len > MAX_LINE_BYTES {
                self.buffer.clear();
                frames.push(Frame::Oversized(len));
                continue;
            }

            self.buffer.extend_from_slice(head);
            frames.push(self.take_line());
        }

        if self.discarding > 0 {
            self.discarding += rest.len();
        } else if self.buffer.len() + rest.len() > MAX_LINE_BYTES {
            self.discarding = self.buffer.len() + rest.len();
            self.buffer.clear();
        } else {
            self.buffer.extend_from_slice(rest);
        }

        frames
    }

    /// Bytes held for a line that has not been terminated yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> Frame {
        let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        if line.is_empty() {
            Frame::KeepAlive
        } else {
            Frame::Line(line)
        }
    }
}

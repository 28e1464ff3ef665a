// SPDX-License-Identifier: GPL-3.0-only

/// Accumulates raw bytes read off the wire and splits them into complete,
/// terminator-included lines on `\n`. Any trailing, not-yet-terminated
/// bytes stay buffered for the next `feed`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    inbuf: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and drains every complete line now available, in
    /// order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.inbuf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.inbuf.iter().position(|&b| b == b'\n') {
            lines.push(self.inbuf.drain(..=pos).collect());
        }
        lines
    }
}

/// Per-connection state. Owned exclusively by the worker that accepted the
/// connection; destroyed on QUIT, peer close, or a fatal read error.
#[derive(Debug)]
pub struct ConnectionState {
    pub in_data: bool,
    pub line_buffer: LineBuffer,
    pub data_buffer: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub peer_ip: String,
}

impl ConnectionState {
    #[must_use]
    pub fn new(peer_ip: impl Into<String>) -> Self {
        Self {
            in_data: false,
            line_buffer: LineBuffer::new(),
            data_buffer: String::new(),
            sender: String::new(),
            recipients: Vec::new(),
            peer_ip: peer_ip.into(),
        }
    }

    pub(crate) fn reset_transaction(&mut self) {
        self.sender.clear();
        self.recipients.clear();
        self.data_buffer.clear();
        self.in_data = false;
    }
}

//! Incremental decoder for `text/event-stream` bodies.
//!
//! The progress endpoint pushes frames of the form
//! `data: {"progress": 40, "message": "..."}` followed by a blank line.
//! Network chunks do not respect frame boundaries, so [`SseDecoder`]
//! buffers partial lines and only yields complete events.

/// Upper bound on an event still being assembled: the unterminated line
/// plus the `data` lines collected so far.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// The stream kept sending bytes without completing an event.
#[derive(Debug, thiserror::Error)]
#[error("Status event exceeds {limit} bytes without completing")]
pub struct OversizedEvent {
    pub limit: usize,
}

/// Accumulates raw bytes and yields the `data` payload of each
/// completed event.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no `\n`.
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    /// Feed one network chunk. Returns the payloads of all events
    /// completed by this chunk, in order.
    ///
    /// Multiple `data:` lines in one event are joined with `\n`. Comment
    /// lines and the `event`, `id` and `retry` fields are ignored.
    ///
    /// Fails once the pending event grows past the limit; the decoder
    /// should then be discarded along with its connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, OversizedEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            self.process_line(&line, &mut events);
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() + self.data_len > self.limit {
            return Err(OversizedEvent { limit: self.limit });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
                self.data_len = 0;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data_len += value.len();
            self.data.push(value.to_string());
        }
    }
}

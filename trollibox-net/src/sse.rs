//! Server-Sent-Events decoding.
//!
//! Wire format: `field: value` lines, a blank line ends an event.
//! Recognized fields are `event`, `data` (repeatable, joined with `\n`) and
//! `id`; lines starting with `:` are comments.

use std::io::{self, BufRead};

use crate::protocol::ServerEvent;

/// Incremental line-oriented SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the most recent event that carried one.
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Feed one line (without its terminator). Returns an event when the line
    /// completes one.
    ///
    /// Some servers emit data-less events as a bare `event:` line with no
    /// blank line after it, so a new `event:` line flushes an unterminated
    /// predecessor.
    pub fn push_line(&mut self, line: &str) -> Option<ServerEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                let previous = if self.event.is_some() { self.dispatch() } else { None };
                self.event = Some(value.to_string());
                previous
            }
            "data" => {
                self.data.push(value.to_string());
                None
            }
            "id" => {
                self.last_id = Some(value.to_string());
                None
            }
            _ => None,
        }
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let name = self.event.take();
        let data = std::mem::take(&mut self.data);
        if name.is_none() && data.is_empty() {
            return None;
        }
        let name = name.unwrap_or_else(|| "message".to_string());
        Some(ServerEvent::new(&name, &data.join("\n")))
    }
}

/// Read lines until the next complete event. `Ok(None)` means the stream
/// ended; an unterminated trailing event is discarded.
pub fn read_event<R: BufRead>(reader: &mut R, decoder: &mut SseDecoder) -> io::Result<Option<ServerEvent>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.strip_suffix('\n').unwrap_or(&line);
        if let Some(event) = decoder.push_line(trimmed) {
            return Ok(Some(event));
        }
    }
}

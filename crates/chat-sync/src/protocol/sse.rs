//! Incremental parser for `text/event-stream` bodies.
//!
//! Bytes are fed as they arrive from the network; complete events are
//! returned once their terminating blank line has been seen. Partial lines
//! stay buffered across calls, up to [`MAX_LINE_BYTES`].

use crate::error::{Result, SyncError};
use bytes::{Buf, BytesMut};

/// Longest line accepted before the stream is treated as broken.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, `None` for the default `message` event.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream at dispatch time.
    pub id: Option<String>,
}

#[derive(Debug)]
pub struct SseParser {
    buffer: BytesMut,
    /// Bytes of `buffer` already known to contain no newline.
    scanned: usize,
    max_line: usize,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        SseParser {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            max_line,
            event: None,
            data: String::new(),
            has_data: false,
            last_event_id: None,
        }
    }

    /// Feed a chunk and collect the events it completes.
    ///
    /// Fails with [`SyncError::LineTooLong`] once an unterminated line grows
    /// past the limit; the parser should not be fed again after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            let mut line = &raw[..];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }

            let line = String::from_utf8_lossy(line);
            self.process_line(&line);
        }

        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_line {
            let limit = self.max_line;
            self.buffer.clear();
            self.scanned = 0;
            return Err(SyncError::LineTooLong { limit });
        }

        Ok(frames)
    }

    fn process_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            // Reconnect timing is owned by the connection's backoff.
            "retry" => {}
            other => tracing::trace!("Ignoring unknown SSE field {:?}", other),
        }
    }

    /// Emit the pending event, if it carried any data.
    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;

        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
        })
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"data: {\"type\":\"heartbeat\"}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"type\":\"heartbeat\"}");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: hel").unwrap().is_empty());
        assert_eq!(parser.pending(), 9);
        assert!(parser.feed(b"lo\n").unwrap().is_empty());
        let frames = parser.feed(b"\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_line_split_over_many_chunks() {
        let mut parser = SseParser::new();
        for chunk in ["da", "ta: ", "abc", "def"] {
            assert!(parser.feed(chunk.as_bytes()).unwrap().is_empty());
        }
        let frames = parser.feed(b"\r\n\r\ndata: next\n\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "abcdef");
        assert_eq!(frames[1].data, "next");
    }

    #[test]
    fn test_multiline_data_and_crlf() {
        let mut parser = SseParser::new();
        let frames = parser
            .feed(b"event: update\r\ndata: a\r\ndata:b\r\n\r\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("update"));
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn test_comments_and_empty_events_are_skipped() {
        let mut parser = SseParser::new();
        let frames = parser
            .feed(b": keep-alive\n\nevent: ping\n\ndata: x\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
        // `event: ping` had no data and must not leak into the next frame.
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn test_id_and_retry_fields() {
        let mut parser = SseParser::new();
        let frames = parser
            .feed(b"id: 7\nretry: 1500\ndata\n\ndata: y\n\n")
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[1].id.as_deref(), Some("7"));
        assert_eq!(parser.last_event_id(), Some("7"));
    }

    #[test]
    fn test_unterminated_line_over_limit_fails() {
        let mut parser = SseParser::with_max_line(16);
        assert!(parser.feed(b"data: 0123456789").unwrap().is_empty());
        let err = parser.feed(b"abcdef").unwrap_err();
        assert!(matches!(err, SyncError::LineTooLong { limit: 16 }));
        assert!(!err.is_payload_error());
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_long_input_of_short_lines_is_fine() {
        let mut parser = SseParser::with_max_line(16);
        let frames = parser.feed(b"data: a\n\ndata: b\n\ndata: c\n\n").unwrap();
        assert_eq!(frames.len(), 3);
    }
}

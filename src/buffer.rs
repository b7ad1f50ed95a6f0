//! Newline-delimited frame accumulator for stream transports
//!
//! Stream transports deliver arbitrary byte chunks; [`ReadBuffer`]
//! accumulates them and drains complete messages, one JSON object per
//! `\n`-terminated line. An optional trailing `\r` is trimmed, empty lines
//! are skipped, and a line that fails to decode is logged and skipped so
//! one bad frame can never stall the stream. A trailing partial line is
//! retained until a later chunk completes it.

use bytes::{Buf, BytesMut};

use crate::codec;
use crate::types::JsonRpcMessage;

/// Stateful accumulator turning byte chunks into framed messages.
///
/// # Examples
///
/// ```
/// use mcp_runtime::buffer::ReadBuffer;
///
/// let mut buf = ReadBuffer::new();
/// buf.append(br#"{"jsonrpc":"2.0","method":"ping","#);
/// assert!(buf.next_message().is_none());
/// buf.append(b"\"params\":{}}\n");
/// assert!(buf.next_message().is_some());
/// ```
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buffer: BytesMut,
}

impl ReadBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Append a chunk of bytes received from the transport.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Drain the next complete message, if one is available.
    ///
    /// Skips empty lines and lines that fail to decode (each logged at
    /// `warn`), so the return value is the next *valid* message. Returns
    /// `None` once no complete line remains in the buffer.
    pub fn next_message(&mut self) -> Option<JsonRpcMessage> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n')?;
            let line = self.buffer.split_to(newline + 1);
            // Drop the trailing \n and an optional \r before it.
            let mut end = line.len() - 1;
            if end > 0 && line[end - 1] == b'\r' {
                end -= 1;
            }
            let line = &line[..end];
            if line.is_empty() {
                continue;
            }
            let text = match std::str::from_utf8(line) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("read buffer: skipping non-UTF-8 line: {e}");
                    continue;
                }
            };
            match codec::decode(text) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!("read buffer: skipping undecodable line: {e:#}");
                    continue;
                }
            }
        }
    }

    /// Discard all buffered bytes, including any partial line.
    pub fn clear(&mut self) {
        self.buffer.advance(self.buffer.len());
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcNotification, JsonRpcRequest};

    fn encoded(method: &str, id: i64) -> String {
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(id, method, None));
        format!("{}\n", codec::encode(&msg).unwrap())
    }

    fn drain(buf: &mut ReadBuffer) -> Vec<JsonRpcMessage> {
        let mut out = Vec::new();
        while let Some(m) = buf.next_message() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_three_messages_in_one_chunk_drain_in_order() {
        let mut buf = ReadBuffer::new();
        let chunk = format!("{}{}{}", encoded("a", 0), encoded("b", 1), encoded("c", 2));
        buf.append(chunk.as_bytes());

        let methods: Vec<String> = drain(&mut buf)
            .iter()
            .map(|m| m.method().unwrap().to_string())
            .collect();
        assert_eq!(methods, vec!["a", "b", "c"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_retained_across_appends() {
        let mut buf = ReadBuffer::new();
        let full = encoded("tools/list", 7);
        let (head, tail) = full.split_at(10);

        buf.append(head.as_bytes());
        assert!(buf.next_message().is_none());
        assert!(!buf.is_empty());

        buf.append(tail.as_bytes());
        let msg = buf.next_message().expect("completed line should decode");
        assert_eq!(msg.method(), Some("tools/list"));
    }

    #[test]
    fn test_split_mid_second_message() {
        // A\nB (no trailing newline) then C-completion\n: drain yields A,
        // then B concatenated with the completion.
        let mut buf = ReadBuffer::new();
        let a = encoded("a", 0);
        let b = codec::encode(&JsonRpcMessage::Request(JsonRpcRequest::new(1, "b", None))).unwrap();
        let (b_head, b_tail) = b.split_at(5);

        buf.append(format!("{a}{b_head}").as_bytes());
        assert_eq!(buf.next_message().unwrap().method(), Some("a"));
        assert!(buf.next_message().is_none());

        buf.append(format!("{b_tail}\n").as_bytes());
        assert_eq!(buf.next_message().unwrap().method(), Some("b"));
    }

    #[test]
    fn test_crlf_and_empty_lines_tolerated() {
        let mut buf = ReadBuffer::new();
        let msg = codec::encode(&JsonRpcMessage::Notification(JsonRpcNotification::new(
            "notifications/initialized",
            None,
        )))
        .unwrap();
        buf.append(format!("\n\r\n{msg}\r\n\n").as_bytes());

        let drained = drain(&mut buf);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].method(), Some("notifications/initialized"));
    }

    #[test]
    fn test_bad_line_skipped_without_stalling() {
        let mut buf = ReadBuffer::new();
        buf.append(b"this is not json\n");
        buf.append(encoded("ping", 1).as_bytes());

        let drained = drain(&mut buf);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].method(), Some("ping"));
    }

    #[test]
    fn test_arbitrary_chunk_boundaries_round_trip() {
        // Feed a stream of encoded messages byte-by-byte; the drained
        // sequence must match the input order exactly.
        let mut buf = ReadBuffer::new();
        let stream: String = (0..5).map(|i| encoded(&format!("m{i}"), i)).collect();

        let mut drained = Vec::new();
        for byte in stream.as_bytes() {
            buf.append(&[*byte]);
            while let Some(m) = buf.next_message() {
                drained.push(m.method().unwrap().to_string());
            }
        }
        assert_eq!(drained, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_clear_discards_partial_line() {
        let mut buf = ReadBuffer::new();
        buf.append(b"{\"jsonrpc\":\"2.0\"");
        assert!(!buf.is_empty());
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }
}

//! SSE (Server-Sent Events) decoder for OpenAI-compatible chat streams.
//!
//! Buffers raw bytes so that both lines and multi-byte characters split
//! across TCP chunks decode correctly.

use serde_json::Value;

/// Incremental decoder for `data: {...}` event streams terminated by
/// `data: [DONE]`.
///
/// # Example
///
/// ```
/// use generator_pipeline::backend::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let data = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: [DONE]\n\n";
/// let values = decoder.decode(data);
/// assert_eq!(values.len(), 1);
/// assert!(decoder.is_done());
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return every complete JSON payload.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(value) = self.parse_line(&String::from_utf8_lossy(&line)) {
                values.push(value);
            }
        }
        values
    }

    /// Decode whatever is left once the stream ends without a trailing newline.
    pub fn flush(&mut self) -> Vec<Value> {
        let remaining = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&remaining).into_owned();
        text.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<Value> {
        let data = line
            .trim()
            .strip_prefix("data:")
            .map(str::trim)?;
        if data == "[DONE]" {
            self.done = true;
            return None;
        }
        serde_json::from_str(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_basic_decode() {
        let mut decoder = SseDecoder::new();
        let values = decoder.decode(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["choices"][0]["delta"]["content"], "Hello");
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_sse_comments_and_events_ignored() {
        let mut decoder = SseDecoder::new();
        let values = decoder.decode(b": keep-alive\nevent: message\n\ndata:{\"x\":1}\n\n");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["x"], 1);
    }

    #[test]
    fn test_sse_split_line_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"cho").is_empty());
        let values = decoder.decode(b"ices\":[]}\n\ndata: [DONE]\n\n");
        assert_eq!(values.len(), 1);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_split_utf8_across_chunks() {
        let mut decoder = SseDecoder::new();
        let line = "data: {\"t\":\"café\"}\n".as_bytes();
        let split = line.len() - 4; // inside the two-byte 'é'
        assert!(decoder.decode(&line[..split]).is_empty());
        let values = decoder.decode(&line[split..]);
        assert_eq!(values[0]["t"], "café");
    }

    #[test]
    fn test_sse_flush_without_newline() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"a\":2}").is_empty());
        let values = decoder.flush();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["a"], 2);
    }
}

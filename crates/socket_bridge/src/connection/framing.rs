//! Turning socket bytes into messages and messages into socket bytes.
//!
//! Reads are decoded with [`Utf8Decoder`], which keeps an incomplete
//! multi-byte sequence at the end of one read until the next read completes
//! it. The decoded text is then cut into messages by [`FrameSplitter`]
//! according to the configured [`Framing`].

use crate::config::Framing;
use crate::error::ServerError;

/// Result of decoding one chunk of bytes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    /// Every complete, well-formed character decoded so far
    pub text: String,
    /// Number of malformed byte sequences that were skipped
    pub malformed: usize,
}

/// Incremental UTF-8 decoder.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` appended to whatever was left over from the last call.
    ///
    /// Malformed sequences are dropped and counted. A truncated sequence at
    /// the very end is kept for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> DecodedChunk {
        self.pending.extend_from_slice(bytes);

        let mut chunk = DecodedChunk::default();
        let mut offset = 0;

        while offset < self.pending.len() {
            match std::str::from_utf8(&self.pending[offset..]) {
                Ok(valid) => {
                    chunk.text.push_str(valid);
                    offset = self.pending.len();
                }
                Err(e) => {
                    let valid_end = offset + e.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[offset..valid_end]) {
                        chunk.text.push_str(valid);
                    }
                    offset = valid_end;

                    match e.error_len() {
                        Some(len) => {
                            chunk.malformed += 1;
                            offset += len;
                        }
                        // Truncated sequence, wait for more bytes
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..offset);
        chunk
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Cuts decoded text into messages.
///
/// Under newline framing a message is buffered until its `\n` arrives; no
/// buffered or completed line may exceed `max_frame_len` bytes.
#[derive(Debug)]
pub struct FrameSplitter {
    framing: Framing,
    max_frame_len: usize,
    partial: String,
}

impl FrameSplitter {
    /// Creates a splitter for the given framing and frame length cap.
    pub fn new(framing: Framing, max_frame_len: usize) -> Self {
        Self {
            framing,
            max_frame_len,
            partial: String::new(),
        }
    }

    /// Feeds decoded text and returns every message it completes.
    ///
    /// # Errors
    ///
    /// [`ServerError::FrameTooLarge`] once a line outgrows the cap. The
    /// buffered text is discarded; the stream cannot be resynchronized.
    pub fn push(&mut self, text: String) -> Result<Vec<String>, ServerError> {
        match self.framing {
            Framing::Raw => {
                if text.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![text])
                }
            }
            Framing::Newline => {
                self.partial.push_str(&text);

                let mut frames = Vec::new();
                while let Some(pos) = self.partial.find('\n') {
                    let line: String = self.partial.drain(..=pos).collect();
                    let line = line.trim_end_matches(['\n', '\r']);
                    if line.len() > self.max_frame_len {
                        return Err(self.overflow());
                    }
                    if !line.trim().is_empty() {
                        frames.push(line.to_string());
                    }
                }

                if self.partial.len() > self.max_frame_len {
                    return Err(self.overflow());
                }
                Ok(frames)
            }
        }
    }

    fn overflow(&mut self) -> ServerError {
        self.partial = String::new();
        ServerError::FrameTooLarge {
            limit: self.max_frame_len,
        }
    }

/// Text received after the last complete message.
    pub fn partial(&self) -> &str {
        &self.partial
    }
}

/// Encodes an outbound payload for the wire.
///
/// # Errors
///
/// Returns [`ServerError::InvalidFraming`] when newline framing is in use and
/// the payload contains a line break.
pub fn encode(framing: Framing, text: &str) -> Result<Vec<u8>, ServerError> {
    match framing {
        Framing::Raw => Ok(text.as_bytes().to_vec()),
        Framing::Newline => {
            if text.contains(['\n', '\r']) {
                return Err(ServerError::InvalidFraming(
                    "payload contains a line break".to_string(),
                ));
            }
            let mut bytes = Vec::with_capacity(text.len() + 1);
            bytes.extend_from_slice(text.as_bytes());
            bytes.push(b'\n');
            Ok(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ascii() {
        let mut decoder = Utf8Decoder::new();
        let chunk = decoder.decode(b"{\"ping\":true}");
        assert_eq!(chunk.text, "{\"ping\":true}");
        assert_eq!(chunk.malformed, 0);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        // "é" is 0xC3 0xA9, "€" is 0xE2 0x82 0xAC
        let mut decoder = Utf8Decoder::new();

        let first = decoder.decode(&[b'"', 0xC3]);
        assert_eq!(first.text, "\"");
        assert_eq!(decoder.pending_len(), 1);

        let second = decoder.decode(&[0xA9, 0xE2, 0x82]);
        assert_eq!(second.text, "é");
        assert_eq!(decoder.pending_len(), 2);

        let third = decoder.decode(&[0xAC, b'"']);
        assert_eq!(third.text, "€\"");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_malformed_bytes_are_skipped() {
        let mut decoder = Utf8Decoder::new();
        let chunk = decoder.decode(&[b'a', 0xFF, b'b', 0xC3, b'c']);
        assert_eq!(chunk.text, "abc");
        assert_eq!(chunk.malformed, 2);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_raw_splitter_passes_text_through() {
        let mut splitter = FrameSplitter::new(Framing::Raw, 4);
        assert_eq!(
            splitter.push("{\"a\":1}".to_string()).unwrap(),
            vec!["{\"a\":1}"]
        );
        assert!(splitter.push(String::new()).unwrap().is_empty());
    }

    #[test]
    fn test_newline_splitter_buffers_partial_lines() {
        let mut splitter = FrameSplitter::new(Framing::Newline, 64);
        assert!(splitter.push("{\"a\":".to_string()).unwrap().is_empty());
        assert_eq!(splitter.partial(), "{\"a\":");

        let frames = splitter
            .push("1}\r\n\n{\"b\":2}\n{\"c\"".to_string())
            .unwrap();
        assert_eq!(frames, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(splitter.partial(), "{\"c\"");
    }

    #[test]
    fn test_newline_splitter_caps_unterminated_line() {
        let mut splitter = FrameSplitter::new(Framing::Newline, 8);
        assert!(splitter.push("[1,2,3".to_string()).unwrap().is_empty());

        let result = splitter.push(",4,5,6".to_string());
        assert!(matches!(result, Err(ServerError::FrameTooLarge { limit: 8 })));
        assert_eq!(splitter.partial(), "");
    }

    #[test]
    fn test_newline_splitter_caps_complete_line() {
        let mut splitter = FrameSplitter::new(Framing::Newline, 8);
        assert_eq!(splitter.push("[1,2,3]\n".to_string()).unwrap(), vec!["[1,2,3]"]);
        assert!(matches!(
            splitter.push("[1,2,3,4,5]\n".to_string()),
            Err(ServerError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(Framing::Raw, "{}").unwrap(), b"{}".to_vec());
        assert_eq!(encode(Framing::Newline, "{}").unwrap(), b"{}\n".to_vec());
        assert!(matches!(
            encode(Framing::Newline, "{\n}"),
            Err(ServerError::InvalidFraming(_))
        ));
        assert!(encode(Framing::Raw, "{\n}").is_ok());
    }
}

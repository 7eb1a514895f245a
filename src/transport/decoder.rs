//! Incremental JSON decoding over a growing byte buffer.
//!
//! The broker sends back-to-back JSON objects with no length prefix and no separator, so a frame
//! boundary can only be found by attempting to parse and seeing how many bytes were consumed.

use serde_json::{Deserializer, Value};

use crate::error::{Error, Result};

/// Buffers inbound bytes and peels off complete JSON values as they become available.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder { buffer: Vec::new() }
    }

    /// Append freshly-read bytes to the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// How many bytes are currently buffered but not yet parsed into a complete value.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Try to parse one complete JSON value off the front of the buffer.
    ///
    /// Returns `Ok(None)` if the buffer holds only whitespace or a truncated value and more bytes
    /// are needed. Returns `Err` if the buffered bytes are not a valid JSON prefix at all.
    pub fn try_decode(&mut self) -> Result<Option<Value>> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return Ok(None);
        }

        let mut stream = Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buffer.drain(..consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(Error::Decoding(e)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_one_complete_object() {
        let mut decoder = StreamDecoder::new();
        decoder.push(br#"{"status":true}"#);
        let value = decoder.try_decode().unwrap().unwrap();
        assert_eq!(value["status"], true);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn waits_for_more_bytes_on_truncated_object() {
        let mut decoder = StreamDecoder::new();
        decoder.push(br#"{"status":tr"#);
        assert!(decoder.try_decode().unwrap().is_none());
        decoder.push(br#"ue}"#);
        let value = decoder.try_decode().unwrap().unwrap();
        assert_eq!(value["status"], true);
    }

    #[test]
    fn splits_two_back_to_back_objects() {
        let mut decoder = StreamDecoder::new();
        decoder.push(br#"{"a":1}{"b":2}"#);
        let first = decoder.try_decode().unwrap().unwrap();
        let second = decoder.try_decode().unwrap().unwrap();
        assert_eq!(first["a"], 1);
        assert_eq!(second["b"], 2);
    }

    #[test]
    fn malformed_prefix_is_an_error() {
        let mut decoder = StreamDecoder::new();
        decoder.push(b"not json");
        assert!(decoder.try_decode().is_err());
    }

    #[test]
    fn empty_buffer_yields_none() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.try_decode().unwrap().is_none());
    }
}

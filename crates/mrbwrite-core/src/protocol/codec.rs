//! Console line framing
//!
//! Splits the console byte stream into lines for [`tokio_util::codec::Framed`].
//! Unlike `LinesCodec`, invalid UTF-8 never fails the stream: the console
//! prints garbage while the board boots, and that garbage must come through as
//! an ordinary (non-matching) line.

use std::io;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::MAX_LINE_LENGTH;

/// Line decoder and raw byte encoder for the board console
#[derive(Debug, Clone)]
pub struct ConsoleLineCodec {
    /// Index already searched for a newline
    next_index: usize,
    max_length: usize,
}

impl Default for ConsoleLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLineCodec {
    /// Codec with the default maximum line length
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Codec that cuts lines longer than `max_length` bytes
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length: max_length.max(1),
        }
    }
}

/// Strip the trailing line terminator and decode lossily
fn finish_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl Decoder for ConsoleLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let newline = src[self.next_index..].iter().position(|b| *b == b'\n');
        match newline {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                let raw = src.split_to(end);
                Ok(Some(finish_line(&raw)))
            }
            None if src.len() > self.max_length => {
                self.next_index = 0;
                let raw = src.split_to(self.max_length);
                Ok(Some(finish_line(&raw)))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let raw = src.split_to(src.len());
        Ok(Some(finish_line(&raw)))
    }
}

impl Encoder<&[u8]> for ConsoleLineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.extend_from_slice(item);
        Ok(())
    }
}

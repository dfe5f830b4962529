//! Line tokenizer for raw log input.
//!
//! Splits a byte stream on `\n` using memchr, strips a trailing `\r`, and
//! decodes each line as UTF-8. A line that is not valid UTF-8 yields an error
//! for that line only; reading continues with the next line.

use memchr::memchr;
use std::io::{self, BufRead, BufReader, Read};

use super::buffers::{DEFAULT_INPUT_BUFFER, DEFAULT_LINE_BUFFER};
use crate::error::{Result, ScanError};

/// A streaming line reader over any readable source.
pub struct LineReader<R: Read> {
    reader: BufReader<R>,
    line_number: usize,
    buffer: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_INPUT_BUFFER)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            line_number: 0,
            buffer: Vec::with_capacity(DEFAULT_LINE_BUFFER),
        }
    }

    /// Number of lines read so far, including undecodable ones.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Read raw bytes up to and excluding the next `\n` into the buffer.
    ///
    /// Returns the number of bytes consumed, 0 at end of stream.
    fn read_raw_line(&mut self) -> io::Result<usize> {
        let mut consumed = 0;
        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(consumed);
            }
            match memchr(b'\n', available) {
                Some(pos) => {
                    self.buffer.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    return Ok(consumed + pos + 1);
                }
                None => {
                    let len = available.len();
                    self.buffer.extend_from_slice(available);
                    self.reader.consume(len);
                    consumed += len;
                }
            }
        }
    }

    /// Read the next line.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        if self.read_raw_line()? == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let bytes = std::mem::replace(&mut self.buffer, Vec::with_capacity(DEFAULT_LINE_BUFFER));
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| ScanError::InvalidUtf8 {
                line: self.line_number,
            })
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}

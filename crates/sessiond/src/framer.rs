// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line framer: slices an async byte stream into logical text lines.
//!
//! Tolerates partial reads and both CRLF and LF terminators. A line exceeding
//! `max_line_bytes` is discarded (not yielded) and the framer resynchronizes
//! at the next terminator, so one pathological line never grows the buffer
//! without bound.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

pub struct LineFramer<R> {
    reader: R,
    buf: BytesMut,
    read_buf: [u8; 8192],
    max_line_bytes: usize,
    overflowing: bool,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_line_bytes(reader, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(8192),
            read_buf: [0u8; 8192],
            max_line_bytes,
            overflowing: false,
        }
    }

    /// Read until the next line terminator and return the line (sans
    /// terminator), or `None` on EOF with no trailing partial line.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                // EOF. Flush any trailing partial line that never saw a terminator.
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = self.buf.split();
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
            self.buf.extend_from_slice(&self.read_buf[..n]);
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > self.max_line_bytes {
                    tracing::warn!(
                        buffered = self.buf.len(),
                        max = self.max_line_bytes,
                        "line framer buffer exceeds max_line_bytes with no terminator; discarding"
                    );
                    self.buf.clear();
                    self.overflowing = true;
                }
                return None;
            };

            if pos + 1 > self.max_line_bytes {
                tracing::warn!(
                    line_bytes = pos + 1,
                    max = self.max_line_bytes,
                    "discarding line exceeding max_line_bytes"
                );
                self.buf.advance(pos + 1);
                continue;
            }

            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1); // drop '\n'
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1); // drop trailing '\r'
            }

            if self.overflowing {
                self.overflowing = false;
                continue; // this line was truncated upstream; resync on the next one
            }

            if line.is_empty() {
                continue;
            }

            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

#[cfg(test)]
#[path = "framer_tests.rs"]
mod tests;

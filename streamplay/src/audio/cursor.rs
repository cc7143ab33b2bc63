//! Bitstream cursor over raw compressed bytes
//!
//! Holds the bytes read from the source that the parser has not consumed
//! yet. Refills compact the unconsumed tail to the front before appending,
//! so a frame straddling a chunk boundary is never lost.

use std::io::{ErrorKind, Read};

use crate::audio::parser::ParseError;

/// Outcome of a single refill attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// Bytes appended to the cursor (may be fewer than requested)
    Read(usize),

    /// Source reported it would block; try again later
    Retry,

    /// Source is exhausted
    EndOfSource,
}

/// Exclusively-owned view of raw bytes still to be parsed.
#[derive(Debug, Default)]
pub struct BitstreamCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl BitstreamCursor {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Bytes not yet consumed by the parser
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed bytes
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Mark `count` bytes as consumed.
    ///
    /// Consuming more than [`remaining`](Self::remaining) is a parser bug
    /// and is rejected without moving the cursor.
    pub fn advance(&mut self, count: usize) -> Result<(), ParseError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(ParseError::Overconsumed {
                consumed: count,
                remaining,
            });
        }
        self.pos += count;
        Ok(())
    }

    /// Move unconsumed bytes to the front and read up to `max_bytes` more.
    ///
    /// `Interrupted` reads are retried; `WouldBlock` is reported as
    /// [`Refill::Retry`]. Any other I/O error is returned.
    pub fn refill<R: Read + ?Sized>(&mut self, source: &mut R, max_bytes: usize) -> std::io::Result<Refill> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let start = self.buf.len();
        self.buf.resize(start + max_bytes, 0);

        loop {
            match source.read(&mut self.buf[start..]) {
                Ok(0) => {
                    self.buf.truncate(start);
                    return Ok(Refill::EndOfSource);
                }
                Ok(n) => {
                    self.buf.truncate(start + n);
                    return Ok(Refill::Read(n));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.buf.truncate(start);
                    return Ok(Refill::Retry);
                }
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        }
    }
}

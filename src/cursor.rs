// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Bounded write sinks for 9P protocol encoding
//!
//! Messages are encoded through [`Write`](crate::transport::Write). A
//! growable `Vec<u8>` sink serves the session's reusable encode buffer;
//! [`Cursor`] wraps a fixed-capacity region for callers that encode into
//! preallocated transport memory. A cursor never writes past capacity:
//! the overshooting operation fails and leaves the position unchanged.

use alloc::vec::Vec;
use core::cmp::min;

use crate::transport::Write;
use crate::Error;

/// A write cursor over a fixed-capacity buffer with position tracking.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Cursor<T> {
    inner: T,
    pos: usize,
}

impl<T> Cursor<T> {
    /// Create a new cursor wrapping the given inner value.
    pub const fn new(inner: T) -> Cursor<T> {
        Cursor { pos: 0, inner }
    }

    /// Current write position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Consume the cursor and return the inner value.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl Write for Cursor<&mut [u8]> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let capacity = self.inner.len();
        if buf.len() > capacity - min(self.pos, capacity) {
            // Whole write or nothing; the position must stay unchanged.
            return Err(Error::Overflow);
        }
        self.inner[self.pos..self.pos + buf.len()].copy_from_slice(buf);
        self.pos += buf.len();
        Ok(buf.len())
    }
}

impl Write for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

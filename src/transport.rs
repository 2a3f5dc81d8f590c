// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! 9P transport layer abstraction
//!
//! This module defines traits for reading and writing 9P protocol messages
//! over an underlying transport (e.g., a virtio-9p descriptor ring or a TCP
//! socket) and the framing helpers used by the session engine. A transport
//! carries whole messages: the first four bytes of every message are its
//! little-endian total length, header included.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::fcall::{TaggedFcall, HEADER_SIZE};
use crate::Error;

/// Trait for reading bytes from a transport
pub trait Read {
    /// Read bytes into the buffer
    ///
    /// Returns the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Read exactly `buf.len()` bytes into the buffer
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let n = self.read(&mut buf[total_read..])?;
            if n == 0 {
                return Err(Error::Io);
            }
            total_read += n;
        }
        Ok(())
    }
}

/// Trait for writing bytes to a transport or an encoding sink
pub trait Write {
    /// Write bytes from the buffer
    ///
    /// Returns the number of bytes written
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;

    /// Write all bytes from the buffer
    ///
    /// A sink that stops making progress before the buffer is consumed
    /// fails with [`Error::Overflow`].
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut total_written = 0;
        while total_written < buf.len() {
            let n = self.write(&buf[total_written..])?;
            if n == 0 {
                return Err(Error::Overflow);
            }
            total_written += n;
        }
        Ok(())
    }
}

/// A named transport, as registered by a driver at probe time
///
/// The mount glue looks transports up by tag and hands exclusive ownership
/// of the claimed instance to one session.
pub trait Transport: Read + Write + Send {
    /// Largest message the transport can carry in one exchange
    fn max_msize(&self) -> u32;

    /// Transport name for diagnostics
    fn name(&self) -> &str;
}

impl Read for Box<dyn Transport> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read(buf)
    }
}

impl Write for Box<dyn Transport> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        (**self).write(buf)
    }
}

/// Write a 9P message to a transport
///
/// `buf` is the session's encode buffer, reused across requests.
pub(crate) fn write_message<W: Write>(
    w: &mut W,
    buf: &mut Vec<u8>,
    fcall: &TaggedFcall<'_>,
) -> Result<(), Error> {
    fcall.encode_to_buf(buf)?;
    w.write_all(&buf[..])
}

/// Read a 9P message size header (4 bytes) and then the full message
pub(crate) fn read_to_buf<R: Read>(r: &mut R, buf: &mut Vec<u8>) -> Result<(), Error> {
    buf.resize(4, 0);
    r.read_exact(&mut buf[..])?;
    let sz = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
    if sz < HEADER_SIZE {
        return Err(Error::InvalidInput);
    }
    if sz > buf.capacity() {
        buf.reserve(sz - buf.len());
    }
    buf.resize(sz, 0);
    r.read_exact(&mut buf[4..])
}

/// Read a 9P message from a transport
pub(crate) fn read_message<'a, R: Read>(
    r: &mut R,
    buf: &'a mut Vec<u8>,
) -> Result<TaggedFcall<'a>, Error> {
    read_to_buf(r, buf)?;
    TaggedFcall::decode(&buf[..])
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A client for the 9P2000.L network filesystem protocol
//!
//! This crate implements the client half of 9P2000.L, the Linux-dialect
//! variant of the 9P protocol from Plan 9. It consumes a byte-oriented
//! message transport (a virtio ring, a TCP socket, anything implementing
//! the [`transport`] traits) and exposes a POSIX-like filesystem object
//! layer suitable for wiring into a host VFS.
//!
//! # Submodules
//!
//! - `fcall` - Protocol message definitions and encoding/decoding
//! - `cursor` - Bounded write sinks for message encoding
//! - `pool` - Bitmap allocators for the fid and tag namespaces
//! - `transport` - Transport layer traits and message framing
//! - `client` - Session engine: handshake, attach, request/response
//! - `fs` - Inodes, open-file and directory cursors
//! - `mount` - Mount-option parsing and the transport registry

#![no_std]

extern crate alloc;

mod error;

pub mod client;
pub mod cursor;
pub mod fcall;
pub mod fs;
pub mod mount;
pub mod pool;
pub mod transport;

#[cfg(test)]
mod tests;

pub use client::Client;
pub use error::Error;
pub use fs::{DirHandle, Dirent, FileHandle, Filesystem, FsInfo, Inode};
pub use mount::{mount, register_transport, unregister_transport, MountOptions};
pub use transport::Transport;

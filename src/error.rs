// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Error type and the 9P errno translation table

use thiserror::Error;

use crate::fcall::Rlerror;

/// Error type for 9P operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// I/O error during transport, or a remote EIO
    #[error("I/O error")]
    Io,

    /// Invalid input (e.g., malformed protocol message or argument)
    #[error("Invalid input")]
    InvalidInput,

    /// Response type or tag did not match the request
    #[error("Invalid response from server")]
    InvalidResponse,

    /// Path not found
    #[error("Path not found")]
    NotFound,

    /// File already exists
    #[error("File already exists")]
    AlreadyExists,

    /// Permission denied
    #[error("Permission denied")]
    PermissionDenied,

    /// Not a directory
    #[error("Not a directory")]
    NotADirectory,

    /// Is a directory
    #[error("Is a directory")]
    IsADirectory,

    /// Name too long
    #[error("Name too long")]
    NameTooLong,

    /// Directory not empty
    #[error("Directory not empty")]
    NotEmpty,

    /// No space left on the remote filesystem
    #[error("No space left on device")]
    NoSpace,

    /// Remote descriptor table full, or the local fid pool is exhausted
    #[error("Too many open files")]
    TooManyOpenFiles,

    /// Cross-device link
    #[error("Cross-device link")]
    CrossDevice,

    /// Device not ready
    #[error("Device not ready")]
    DeviceNotReady,

    /// Session is mounted read-only
    #[error("Read-only file system")]
    ReadOnly,

    /// Value too large for the receiving buffer
    #[error("Value too large for buffer")]
    Overflow,

    /// Operation not supported
    #[error("Operation not supported")]
    NotSupported,

    /// Tag space exhausted; too many requests in flight
    #[error("Too many outstanding requests")]
    TooManyRequests,

    /// Session is not connected
    #[error("Not connected")]
    Disconnected,

    /// Unrecognized remote errno
    #[error("Remote error {0}")]
    Remote(u32),
}

/// Convert a remote error code to our Error type
///
/// 9P2000.L carries Linux errno values; the rows here are the codes a
/// server is expected to produce. Anything else is surfaced verbatim.
impl From<Rlerror> for Error {
    fn from(err: Rlerror) -> Self {
        const EPERM: u32 = 1;
        const ENOENT: u32 = 2;
        const EIO: u32 = 5;
        const ENXIO: u32 = 6;
        const EACCES: u32 = 13;
        const EEXIST: u32 = 17;
        const EXDEV: u32 = 18;
        const ENODEV: u32 = 19;
        const ENOTDIR: u32 = 20;
        const EISDIR: u32 = 21;
        const EINVAL: u32 = 22;
        const ENFILE: u32 = 23;
        const EMFILE: u32 = 24;
        const ENOSPC: u32 = 28;
        const ESPIPE: u32 = 29;
        const EROFS: u32 = 30;
        const ENAMETOOLONG: u32 = 36;
        const ENOTEMPTY: u32 = 39;
        const ENODATA: u32 = 61;
        const EOVERFLOW: u32 = 75;
        const EOPNOTSUPP: u32 = 95;

        match err.ecode {
            EPERM | EACCES => Error::PermissionDenied,
            ENOENT | ENODATA => Error::NotFound,
            EIO => Error::Io,
            ENXIO | ENODEV => Error::DeviceNotReady,
            EEXIST => Error::AlreadyExists,
            EXDEV => Error::CrossDevice,
            ENOTDIR => Error::NotADirectory,
            EISDIR => Error::IsADirectory,
            EINVAL | ESPIPE => Error::InvalidInput,
            ENFILE | EMFILE => Error::TooManyOpenFiles,
            ENOSPC => Error::NoSpace,
            EROFS => Error::ReadOnly,
            ENAMETOOLONG => Error::NameTooLong,
            ENOTEMPTY => Error::NotEmpty,
            EOVERFLOW => Error::Overflow,
            EOPNOTSUPP => Error::NotSupported,
            other => Error::Remote(other),
        }
    }
}

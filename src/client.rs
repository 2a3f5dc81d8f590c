// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! 9P session engine
//!
//! [`Client`] owns a transport and provides synchronous 9P2000.L protocol
//! operations: the version handshake, attach, and one method per request
//! type. A single request mutex is held across each send/receive pair;
//! the server sees requests in mutex-acquisition order and at most one
//! message is on the wire per session. Each request still carries a
//! unique tag from the tag allocator.

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use spin::Mutex;

use crate::fcall::{
    self, Fcall, FcallStr, Fid, GetattrMask, LOpenFlags, Qid, SetAttr, SetattrMask, Statfs,
    TaggedFcall, HEADER_SIZE, MAXWELEM, NOFID, NONUNAME, NOTAG, VERSION_9P2000L,
};
use crate::pool::{FidPool, TagPool, DEFAULT_POOL_CAPACITY};
use crate::transport::{self, Read, Write};
use crate::Error;

/// Transport plus the encode/decode buffers it fills
///
/// All three live behind the request mutex; a response buffer never
/// outlives the exchange that produced it.
struct IoState<T> {
    transport: T,
    wbuf: Vec<u8>,
    rbuf: Vec<u8>,
}

/// 9P client session
pub struct Client<T: Read + Write> {
    /// Maximum message size negotiated with the server
    msize: u32,
    /// Largest read/write payload in a single request
    io_unit: u32,
    /// Request mutex: one request/response exchange at a time
    io: Mutex<IoState<T>>,
    fids: FidPool,
    tags: TagPool,
    /// Fid bound to the attach root; `NOFID` until attach succeeds
    root_fid: Fid,
    root_qid: Option<Qid>,
    /// Cleared when the transport fails; the session is then dead and
    /// every request is refused until a fresh client is connected
    alive: AtomicBool,
}

impl<T: Read + Write> Client<T> {
    /// Create a new 9P client and perform version negotiation
    ///
    /// Proposes `msize` and the `9P2000.L` version string with `NOTAG`;
    /// the negotiated size is the smaller of the proposal and the server's
    /// answer. A server speaking any other dialect is refused with
    /// [`Error::NotSupported`].
    pub fn new(transport: T, msize: u32) -> Result<Self, Error> {
        let mut io = IoState {
            transport,
            wbuf: Vec::with_capacity(msize as usize),
            rbuf: Vec::with_capacity(msize as usize),
        };

        transport::write_message(
            &mut io.transport,
            &mut io.wbuf,
            &TaggedFcall {
                tag: NOTAG,
                fcall: Fcall::Tversion(fcall::Tversion {
                    msize,
                    version: VERSION_9P2000L.into(),
                }),
            },
        )?;

        let reply = transport::read_message(&mut io.transport, &mut io.rbuf)?;
        let msize = match reply {
            TaggedFcall {
                tag: NOTAG,
                fcall: Fcall::Rversion(fcall::Rversion {
                    msize: server_msize,
                    version,
                }),
            } => {
                if version.as_bytes() != VERSION_9P2000L {
                    warn!(
                        "server dialect {:?} is not 9P2000.L",
                        core::str::from_utf8(version.as_bytes()).unwrap_or("<binary>")
                    );
                    return Err(Error::NotSupported);
                }
                server_msize.min(msize)
            }
            TaggedFcall {
                fcall: Fcall::Rlerror(e),
                ..
            } => return Err(e.into()),
            _ => return Err(Error::InvalidResponse),
        };

        // A message must at least fit the header and one count field.
        if msize <= HEADER_SIZE as u32 + 4 {
            return Err(Error::InvalidResponse);
        }

        debug!("negotiated msize {msize}");
        Ok(Client {
            msize,
            io_unit: msize - HEADER_SIZE as u32 - 4,
            io: Mutex::new(io),
            fids: FidPool::new(DEFAULT_POOL_CAPACITY),
            tags: TagPool::new(DEFAULT_POOL_CAPACITY),
            root_fid: NOFID,
            root_qid: None,
            alive: AtomicBool::new(true),
        })
    }

    /// Negotiated maximum message size
    pub fn msize(&self) -> u32 {
        self.msize
    }

    /// Largest payload carried by a single read or write request
    pub fn io_unit(&self) -> u32 {
        self.io_unit
    }

    /// Fid bound to the attach root
    pub fn root_fid(&self) -> Fid {
        self.root_fid
    }

    /// Qid of the attach root
    pub fn root_qid(&self) -> Option<Qid> {
        self.root_qid
    }

    /// Whether attach has completed
    pub fn is_connected(&self) -> bool {
        self.root_qid.is_some()
    }

    /// Number of fids currently allocated
    pub fn fids_in_use(&self) -> u32 {
        self.fids.in_use()
    }

    /// Allocate a fresh fid, unused on the server
    pub fn allocate_fid(&self) -> Result<Fid, Error> {
        self.fids.allocate().ok_or(Error::TooManyOpenFiles)
    }

    /// Release a fid back to the pool without clunking
    ///
    /// Use this when the fid was never bound on the server (e.g., after a
    /// failed walk) or has already been invalidated.
    pub fn release_fid(&self, fid: Fid) {
        self.fids.release(fid);
    }

    /// Attach to the filesystem tree named by `aname`
    ///
    /// No authentication: `afid` is always absent and the user is
    /// anonymous. The fid allocated here names the root for the lifetime
    /// of the session.
    pub fn attach(&mut self, aname: &str) -> Result<Qid, Error> {
        if let Some(qid) = self.root_qid {
            return Ok(qid);
        }

        let fid = self.allocate_fid()?;
        let result = self.rpc_with(
            Fcall::Tattach(fcall::Tattach {
                fid,
                afid: NOFID,
                uname: "".into(),
                aname: aname.as_bytes().into(),
                n_uname: NONUNAME,
            }),
            |reply| match reply {
                Fcall::Rattach(fcall::Rattach { qid }) => Ok(*qid),
                Fcall::Rlerror(e) => Err((*e).into()),
                _ => Err(Error::InvalidResponse),
            },
        );

        match result {
            Ok(qid) => {
                self.root_fid = fid;
                self.root_qid = Some(qid);
                Ok(qid)
            }
            Err(e) => {
                self.fids.release(fid);
                Err(e)
            }
        }
    }

    /// Tear the session down, clunking the root fid
    ///
    /// Further use requires a fresh client.
    pub fn disconnect(&mut self) {
        if self.root_qid.is_none() {
            return;
        }
        let _ = self.clunk(self.root_fid);
        self.root_fid = NOFID;
        self.root_qid = None;
    }

    /// Send one request and hand the decoded response to `f` while the
    /// receive buffer is still held
    ///
    /// This is the zero-copy path: rread/rreaddir payloads borrow from the
    /// response buffer and `f` copies them straight into caller storage.
    /// The tag is released on every exit, and a response whose tag does
    /// not match the request is a protocol violation.
    fn rpc_with<R>(
        &self,
        fcall: Fcall<'_>,
        f: impl FnOnce(&Fcall<'_>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(Error::Disconnected);
        }
        let tag = self.tags.allocate().ok_or(Error::TooManyRequests)?;

        let mut io = self.io.lock();
        let IoState {
            transport,
            wbuf,
            rbuf,
        } = &mut *io;

        let wire = transport::write_message(transport, wbuf, &TaggedFcall { tag, fcall })
            .and_then(|()| transport::read_message(transport, rbuf));
        let result = match wire {
            Ok(reply) if reply.tag != tag => Err(Error::InvalidResponse),
            Ok(reply) => f(&reply.fcall),
            Err(e) => {
                // Transport failure is connection-fatal.
                self.alive.store(false, Ordering::Release);
                Err(e)
            }
        };

        drop(io);
        self.tags.release(tag);
        result
    }

    /// Send one request and return an owned copy of the response
    fn rpc(&self, fcall: Fcall<'_>) -> Result<Fcall<'static>, Error> {
        self.rpc_with(fcall, |reply| Ok(reply.clone_static()))
    }

    /// Walk up to MAXWELEM names from `fid` into a freshly allocated fid.
    ///
    /// On failure the new fid is released; the server guarantees not to
    /// bind it on a failed walk.
    fn walk_chunk(&self, fid: Fid, wnames: &[FcallStr<'_>]) -> Result<(Vec<Qid>, Fid), Error> {
        debug_assert!(wnames.len() <= MAXWELEM);
        let new_fid = self.allocate_fid()?;
        let result = match self.rpc(Fcall::Twalk(fcall::Twalk {
            fid,
            new_fid,
            wnames: wnames.to_vec(),
        }))? {
            Fcall::Rwalk(fcall::Rwalk { wqids }) => Ok((wqids, new_fid)),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        };
        if result.is_err() {
            self.fids.release(new_fid);
        }
        result
    }

    /// Walk a sequence of path components from `fid`
    ///
    /// Returns the qids for each component and a new fid for the final
    /// location. Zero components clone the source fid. A walk the server
    /// answers with fewer qids than names is path-resolution failure:
    /// the result is [`Error::NotFound`] and no fid stays bound.
    pub fn walk(&self, fid: Fid, wnames: &[&str]) -> Result<(Vec<Qid>, Fid), Error> {
        let wnames: Vec<FcallStr<'_>> = wnames.iter().map(|s| (*s).into()).collect();
        if wnames.is_empty() {
            return self.walk_chunk(fid, &wnames);
        }

        let mut wqids = Vec::with_capacity(wnames.len());
        let mut from = fid;
        for chunk in wnames.chunks(MAXWELEM) {
            let (mut chunk_qids, new_fid) = match self.walk_chunk(from, chunk) {
                Ok(r) => r,
                Err(e) => {
                    if from != fid {
                        let _ = self.clunk(from);
                    }
                    return Err(e);
                }
            };
            let advanced = chunk_qids.len();
            wqids.append(&mut chunk_qids);
            if from != fid {
                let _ = self.clunk(from);
            }
            from = new_fid;
            if advanced < chunk.len() {
                // Partial walk: the server does not bind new_fid, so it
                // only goes back to the pool.
                self.fids.release(from);
                return Err(Error::NotFound);
            }
        }
        Ok((wqids, from))
    }

    /// Walk a POSIX-style path from `fid`, collapsing empty components
    ///
    /// `""`, `"/"` and `"///"` all clone the source fid.
    pub fn walk_path(&self, fid: Fid, path: &str) -> Result<(Vec<Qid>, Fid), Error> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        self.walk(fid, &components)
    }

    /// Clone a fid (walk with zero names)
    pub fn clone_fid(&self, fid: Fid) -> Result<Fid, Error> {
        let (_, new_fid) = self.walk(fid, &[])?;
        Ok(new_fid)
    }

    /// Open a walked fid
    ///
    /// A zero `iounit` from the server falls back to the session's.
    pub fn open(&self, fid: Fid, flags: LOpenFlags) -> Result<(Qid, u32), Error> {
        match self.rpc(Fcall::Tlopen(fcall::Tlopen { fid, flags }))? {
            Fcall::Rlopen(fcall::Rlopen { qid, iounit }) => {
                Ok((qid, if iounit > 0 { iounit } else { self.io_unit }))
            }
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Create and open a file in the directory bound to `dfid`
    ///
    /// On success `dfid` represents the new, open file rather than the
    /// directory.
    pub fn create(
        &self,
        dfid: Fid,
        name: &str,
        flags: LOpenFlags,
        mode: u32,
        gid: u32,
    ) -> Result<(Qid, u32), Error> {
        match self.rpc(Fcall::Tlcreate(fcall::Tlcreate {
            fid: dfid,
            name: name.into(),
            flags,
            mode,
            gid,
        }))? {
            Fcall::Rlcreate(fcall::Rlcreate { qid, iounit }) => {
                Ok((qid, if iounit > 0 { iounit } else { self.io_unit }))
            }
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Read one chunk from an open fid into `buf`
    ///
    /// The requested count is clamped to the session io_unit. Returns the
    /// number of bytes the server produced; zero means end of file.
    pub fn read(&self, fid: Fid, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let count = buf.len().min(self.io_unit as usize) as u32;
        self.rpc_with(
            Fcall::Tread(fcall::Tread { fid, offset, count }),
            |reply| match reply {
                Fcall::Rread(fcall::Rread { data }) => {
                    if data.len() > buf.len() {
                        return Err(Error::InvalidResponse);
                    }
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Fcall::Rlerror(e) => Err((*e).into()),
                _ => Err(Error::InvalidResponse),
            },
        )
    }

    /// Write one chunk to an open fid
    ///
    /// The payload is clamped to the session io_unit. Returns the byte
    /// count the server accepted.
    pub fn write(&self, fid: Fid, offset: u64, data: &[u8]) -> Result<usize, Error> {
        let count = data.len().min(self.io_unit as usize);
        match self.rpc(Fcall::Twrite(fcall::Twrite {
            fid,
            offset,
            data: Cow::Borrowed(&data[..count]),
        }))? {
            Fcall::Rwrite(fcall::Rwrite { count }) => Ok(count as usize),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Clunk (release) a fid's server-side binding
    ///
    /// The fid returns to the pool whether or not the server reports an
    /// error; a failed clunk still invalidates the binding.
    pub fn clunk(&self, fid: Fid) -> Result<(), Error> {
        let result = match self.rpc(Fcall::Tclunk(fcall::Tclunk { fid }))? {
            Fcall::Rclunk(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        };
        self.fids.release(fid);
        result
    }

    /// Remove the file bound to `fid` and clunk it, even on failure
    pub fn remove(&self, fid: Fid) -> Result<(), Error> {
        let result = match self.rpc(Fcall::Tremove(fcall::Tremove { fid }))? {
            Fcall::Rremove(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        };
        self.fids.release(fid);
        result
    }

    /// Get file attributes
    pub fn getattr(&self, fid: Fid, req_mask: GetattrMask) -> Result<fcall::Rgetattr, Error> {
        match self.rpc(Fcall::Tgetattr(fcall::Tgetattr { fid, req_mask }))? {
            Fcall::Rgetattr(r) => Ok(r),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Set file attributes
    pub fn setattr(&self, fid: Fid, valid: SetattrMask, stat: SetAttr) -> Result<(), Error> {
        match self.rpc(Fcall::Tsetattr(fcall::Tsetattr { fid, valid, stat }))? {
            Fcall::Rsetattr(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Read one window of packed directory entries at `offset`
    ///
    /// The raw entry stream is appended to `buf` (cleared first); decode
    /// it with [`fcall::DirEntryReader`]. An empty window means end of
    /// directory.
    pub fn readdir(&self, fid: Fid, offset: u64, count: u32, buf: &mut Vec<u8>) -> Result<(), Error> {
        let count = count.min(self.io_unit);
        buf.clear();
        self.rpc_with(
            Fcall::Treaddir(fcall::Treaddir { fid, offset, count }),
            |reply| match reply {
                Fcall::Rreaddir(fcall::Rreaddir { data }) => {
                    if data.len() > count as usize {
                        return Err(Error::InvalidResponse);
                    }
                    buf.extend_from_slice(data);
                    Ok(())
                }
                Fcall::Rlerror(e) => Err((*e).into()),
                _ => Err(Error::InvalidResponse),
            },
        )
    }

    /// Create a directory under the directory bound to `dfid`
    pub fn mkdir(&self, dfid: Fid, name: &str, mode: u32, gid: u32) -> Result<Qid, Error> {
        match self.rpc(Fcall::Tmkdir(fcall::Tmkdir {
            dfid,
            name: name.into(),
            mode,
            gid,
        }))? {
            Fcall::Rmkdir(fcall::Rmkdir { qid }) => Ok(qid),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Unlink `name` in the directory bound to `dfid`
    ///
    /// Pass [`fcall::AT_REMOVEDIR`] in `flags` to remove a directory.
    /// The child's fid, if any, is not consumed.
    pub fn unlinkat(&self, dfid: Fid, name: &str, flags: u32) -> Result<(), Error> {
        match self.rpc(Fcall::Tunlinkat(fcall::Tunlinkat {
            dfid,
            name: name.into(),
            flags,
        }))? {
            Fcall::Runlinkat(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Rename `oldname` in `olddfid` to `newname` in `newdfid`
    pub fn renameat(
        &self,
        olddfid: Fid,
        oldname: &str,
        newdfid: Fid,
        newname: &str,
    ) -> Result<(), Error> {
        match self.rpc(Fcall::Trenameat(fcall::Trenameat {
            olddfid,
            oldname: oldname.into(),
            newdfid,
            newname: newname.into(),
        }))? {
            Fcall::Rrenameat(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Filesystem statistics for the tree containing `fid`
    pub fn statfs(&self, fid: Fid) -> Result<Statfs, Error> {
        match self.rpc(Fcall::Tstatfs(fcall::Tstatfs { fid }))? {
            Fcall::Rstatfs(fcall::Rstatfs { statfs }) => Ok(statfs),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Flush dirty server-side state for an open fid
    pub fn fsync(&self, fid: Fid, datasync: bool) -> Result<(), Error> {
        match self.rpc(Fcall::Tfsync(fcall::Tfsync {
            fid,
            datasync: u32::from(datasync),
        }))? {
            Fcall::Rfsync(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Read the target of the symlink bound to `fid`
    pub fn readlink(&self, fid: Fid) -> Result<String, Error> {
        self.rpc_with(
            Fcall::Treadlink(fcall::Treadlink { fid }),
            |reply| match reply {
                Fcall::Rreadlink(fcall::Rreadlink { target }) => {
                    Ok(String::from_utf8_lossy(target.as_bytes()).into_owned())
                }
                Fcall::Rlerror(e) => Err((*e).into()),
                _ => Err(Error::InvalidResponse),
            },
        )
    }

    /// Create a symlink named `name` under `dfid` pointing at `target`
    pub fn symlink(&self, dfid: Fid, name: &str, target: &str, gid: u32) -> Result<Qid, Error> {
        match self.rpc(Fcall::Tsymlink(fcall::Tsymlink {
            fid: dfid,
            name: name.into(),
            symtgt: target.into(),
            gid,
        }))? {
            Fcall::Rsymlink(fcall::Rsymlink { qid }) => Ok(qid),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Hard-link the file bound to `fid` as `name` under `dfid`
    pub fn link(&self, dfid: Fid, fid: Fid, name: &str) -> Result<(), Error> {
        match self.rpc(Fcall::Tlink(fcall::Tlink {
            dfid,
            fid,
            name: name.into(),
        }))? {
            Fcall::Rlink(_) => Ok(()),
            Fcall::Rlerror(e) => Err(e.into()),
            _ => Err(Error::InvalidResponse),
        }
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Filesystem object layer
//!
//! Maps protocol fids and qids onto host-level objects: [`Inode`]s keyed
//! by the qid path, [`FileHandle`] cursors for open files and
//! [`DirHandle`] cursors for directory iteration. Every qid-identified
//! file has exactly one live inode, but may hold many fids: one naming
//! the inode itself plus one per active cursor, each obtained by
//! zero-name walk from the inode's fid.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use log::{debug, warn};
use spin::Mutex;

use crate::client::Client;
use crate::fcall::{
    DirEntryReader, Fid, GetattrMask, LOpenFlags, Qid, QidType, SetAttr, SetattrMask, Stat,
    Statfs, AT_REMOVEDIR,
};
use crate::transport::{Read, Write};
use crate::Error;

/// POSIX file type mask and types, as carried in the 9P mode word
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// Size of the buffer a directory cursor refills from the server
const DIR_BUFFER_SIZE: u32 = 4096;

/// Cached attributes, cleared by every local mutating operation
#[derive(Debug)]
struct CachedStat {
    mode: u32,
    size: u64,
    valid: bool,
}

/// Client-side object representing one remote file
///
/// The fid here names the file for stat/lookup/mkdir-style operations; it
/// is never opened. Cursors clone it first.
#[derive(Debug)]
pub struct Inode {
    id: u64,
    fid: Fid,
    qid: Qid,
    cached: Mutex<CachedStat>,
}

impl Inode {
    fn new(qid: Qid, fid: Fid) -> Self {
        // Initial mode from the qid type, refined by the first getattr.
        let mode = if qid.typ.contains(QidType::DIR) {
            S_IFDIR | 0o755
        } else if qid.typ.contains(QidType::SYMLINK) {
            S_IFLNK | 0o777
        } else {
            S_IFREG | 0o644
        };
        Inode {
            id: qid.path,
            fid,
            qid,
            cached: Mutex::new(CachedStat {
                mode,
                size: 0,
                valid: false,
            }),
        }
    }

    /// Stable inode identifier, derived from the qid path
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The qid as last observed
    pub fn qid(&self) -> Qid {
        self.qid
    }

    /// Cached file mode (type and permission bits)
    pub fn mode(&self) -> u32 {
        self.cached.lock().mode
    }

    /// Cached file size
    pub fn size(&self) -> u64 {
        self.cached.lock().size
    }

    /// Whether the cached attributes are current
    pub fn has_cached_stat(&self) -> bool {
        self.cached.lock().valid
    }

    pub fn is_dir(&self) -> bool {
        self.mode() & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode() & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode() & S_IFMT == S_IFLNK
    }

    fn store_stat(&self, mode: u32, size: u64) {
        let mut cached = self.cached.lock();
        cached.mode = mode;
        cached.size = size;
        cached.valid = true;
    }

    fn invalidate(&self) {
        self.cached.lock().valid = false;
    }
}

/// Open-file cursor
///
/// The fid is a clone of the inode's, bound to an open file description
/// on the server. Release it with [`Filesystem::release`].
#[derive(Debug)]
pub struct FileHandle {
    inode: Arc<Inode>,
    fid: Fid,
    flags: LOpenFlags,
    position: AtomicU64,
    iounit: u32,
}

impl FileHandle {
    /// The inode this handle was opened from
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// Flags the file was opened with
    pub fn flags(&self) -> LOpenFlags {
        self.flags
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Move the cursor
    pub fn set_position(&self, pos: u64) {
        self.position.store(pos, Ordering::SeqCst);
    }
}

/// Directory-iteration cursor state
///
/// `offset` is the opaque cookie from the last entry the server emitted,
/// never a byte count computed locally.
#[derive(Debug)]
struct DirState {
    offset: u64,
    buffer: Vec<u8>,
    pos: usize,
    eof: bool,
}

/// Directory-iteration cursor
///
/// Release it with [`Filesystem::release_dir`].
#[derive(Debug)]
pub struct DirHandle {
    inode: Arc<Inode>,
    fid: Fid,
    state: Mutex<DirState>,
}

impl DirHandle {
    /// The directory inode this handle iterates
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }
}

/// One decoded directory entry, in host form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dirent {
    /// Inode identifier of the entry (qid path)
    pub ino: u64,
    /// Server cookie naming the position after this entry
    pub offset: u64,
    /// Entry type byte as reported by the server
    pub typ: u8,
    pub name: String,
}

/// Volume-level information, as reported to the host
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
pub struct FsInfo {
    /// Block and file counts from the server
    pub statfs: Statfs,
    /// Preferred I/O size: the session's single-request payload limit
    pub io_unit: u32,
}

/// Owns a walked fid until it is handed off
///
/// Walk/open/create sequences have to clunk and release on every early
/// exit; dropping the guard does exactly that unless [`disarm`] was
/// called after a successful handoff.
///
/// [`disarm`]: FidGuard::disarm
struct FidGuard<'a, T: Read + Write> {
    client: &'a Client<T>,
    fid: Fid,
    armed: bool,
}

impl<'a, T: Read + Write> FidGuard<'a, T> {
    fn new(client: &'a Client<T>, fid: Fid) -> Self {
        FidGuard {
            client,
            fid,
            armed: true,
        }
    }

    fn fid(&self) -> Fid {
        self.fid
    }

    fn disarm(mut self) -> Fid {
        self.armed = false;
        self.fid
    }
}

impl<T: Read + Write> Drop for FidGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.client.clunk(self.fid);
        }
    }
}

/// A mounted 9P2000.L filesystem
///
/// Owns the session and the canonical inode table. One instance per
/// transport; host VFS entry points may call in from multiple threads.
pub struct Filesystem<T: Read + Write> {
    client: Client<T>,
    root: Arc<Inode>,
    inodes: Mutex<HashMap<u64, Weak<Inode>>>,
    read_only: bool,
}

impl<T: Read + Write> core::fmt::Debug for Filesystem<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Filesystem")
            .field("root", &self.root)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<T: Read + Write> Filesystem<T> {
    /// Negotiate, attach and build the root inode
    pub fn new(transport: T, msize: u32, aname: &str, read_only: bool) -> Result<Self, Error> {
        let mut client = Client::new(transport, msize)?;
        let root_qid = client.attach(aname)?;

        let root = Arc::new(Inode::new(root_qid, client.root_fid()));
        let attr = client.getattr(root.fid, GetattrMask::BASIC)?;
        root.store_stat(attr.stat.mode, attr.stat.size);

        let mut inodes = HashMap::new();
        inodes.insert(root.id, Arc::downgrade(&root));

        debug!("mounted aname {aname:?}, root inode {}", root.id);
        Ok(Filesystem {
            client,
            root,
            inodes: Mutex::new(inodes),
            read_only,
        })
    }

    /// The root inode
    pub fn root(&self) -> &Arc<Inode> {
        &self.root
    }

    /// The underlying session engine
    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<(), Error> {
        if self.read_only {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn ensure_dir(inode: &Inode) -> Result<(), Error> {
        if inode.is_dir() {
            Ok(())
        } else {
            Err(Error::NotADirectory)
        }
    }

    /// Clone an inode's fid into a guard
    fn clone_guard(&self, fid: Fid) -> Result<FidGuard<'_, T>, Error> {
        let new_fid = self.client.clone_fid(fid)?;
        Ok(FidGuard::new(&self.client, new_fid))
    }

    /// Canonicalise a freshly walked fid to an inode
    ///
    /// If an inode for this qid path already exists the fresh fid is
    /// clunked and the existing object returned; otherwise the fid is
    /// handed to a new inode, published in the table.
    fn publish(&self, guard: FidGuard<'_, T>, qid: Qid) -> Result<Arc<Inode>, Error> {
        let existing = self.inodes.lock().get(&qid.path).and_then(Weak::upgrade);
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let inode = Arc::new(Inode::new(qid, guard.fid()));
        let attr = self.client.getattr(inode.fid, GetattrMask::BASIC)?;
        inode.store_stat(attr.stat.mode, attr.stat.size);

        // Re-check under the lock, then drop it before the guard can clunk.
        let raced = {
            let mut table = self.inodes.lock();
            match table.get(&qid.path).and_then(Weak::upgrade) {
                Some(existing) => Some(existing),
                None => {
                    table.insert(qid.path, Arc::downgrade(&inode));
                    None
                }
            }
        };
        if let Some(existing) = raced {
            // Lost a race with a concurrent lookup; keep the winner.
            return Ok(existing);
        }
        guard.disarm();
        Ok(inode)
    }

    /// Resolve one name in a directory to an inode
    pub fn lookup(&self, dir: &Arc<Inode>, name: &str) -> Result<Arc<Inode>, Error> {
        Self::ensure_dir(dir)?;
        if name == "." {
            return Ok(Arc::clone(dir));
        }

        let (qids, fid) = self.client.walk(dir.fid, &[name])?;
        let guard = FidGuard::new(&self.client, fid);
        let qid = *qids.last().ok_or(Error::InvalidResponse)?;
        self.publish(guard, qid)
    }

    /// Open a file or directory for I/O
    pub fn open(&self, inode: &Arc<Inode>, flags: LOpenFlags) -> Result<FileHandle, Error> {
        if wants_write(flags) {
            self.ensure_writable()?;
        }

        let guard = self.clone_guard(inode.fid)?;
        let (_, iounit) = self.client.open(guard.fid(), flags)?;
        Ok(FileHandle {
            inode: Arc::clone(inode),
            fid: guard.disarm(),
            flags,
            position: AtomicU64::new(0),
            iounit,
        })
    }

    /// Close an open-file cursor, clunking its fid
    pub fn release(&self, handle: FileHandle) -> Result<(), Error> {
        self.client.clunk(handle.fid)
    }

    /// Read through an open-file cursor
    ///
    /// `offset` positions the read explicitly; `None` reads at the cursor
    /// and advances it. The transfer is chunked at the handle's iounit; a
    /// zero-byte reply means end of file. An error after partial progress
    /// reports the bytes already transferred.
    pub fn read(
        &self,
        handle: &FileHandle,
        buf: &mut [u8],
        offset: Option<u64>,
    ) -> Result<usize, Error> {
        let base = offset.unwrap_or_else(|| handle.position());
        let mut total = 0usize;

        while total < buf.len() {
            let chunk = (buf.len() - total).min(handle.iounit as usize);
            match self
                .client
                .read(handle.fid, base + total as u64, &mut buf[total..total + chunk])
            {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if total > 0 => {
                    warn!("read failed after {total} bytes: {e}");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if offset.is_none() {
            handle.position.fetch_add(total as u64, Ordering::SeqCst);
        }
        Ok(total)
    }

    /// Write through an open-file cursor
    ///
    /// Chunking and partial-progress reporting mirror [`read`]; every
    /// write invalidates the inode's cached attributes.
    ///
    /// [`read`]: Filesystem::read
    pub fn write(
        &self,
        handle: &FileHandle,
        buf: &[u8],
        offset: Option<u64>,
    ) -> Result<usize, Error> {
        self.ensure_writable()?;
        let base = offset.unwrap_or_else(|| handle.position());
        let mut total = 0usize;

        while total < buf.len() {
            let chunk = (buf.len() - total).min(handle.iounit as usize);
            match self
                .client
                .write(handle.fid, base + total as u64, &buf[total..total + chunk])
            {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if total > 0 => {
                    warn!("write failed after {total} bytes: {e}");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if offset.is_none() {
            handle.position.fetch_add(total as u64, Ordering::SeqCst);
        }
        if total > 0 {
            handle.inode.invalidate();
        }
        Ok(total)
    }

    /// Create and open a file in a directory
    ///
    /// lcreate both creates and opens: the returned handle holds the fid
    /// the server bound to the new open file, and a separate walk gives
    /// the published inode its own unopened fid.
    pub fn create(
        &self,
        dir: &Arc<Inode>,
        name: &str,
        flags: LOpenFlags,
        mode: u32,
    ) -> Result<(Arc<Inode>, FileHandle), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(dir)?;

        let open_guard = self.clone_guard(dir.fid)?;
        let (qid, iounit) = self
            .client
            .create(open_guard.fid(), name, flags, mode, 0)?;

        let (_, inode_fid) = self.client.walk(dir.fid, &[name])?;
        let inode = self.publish(FidGuard::new(&self.client, inode_fid), qid)?;

        let handle = FileHandle {
            inode: Arc::clone(&inode),
            fid: open_guard.disarm(),
            flags,
            position: AtomicU64::new(0),
            iounit,
        };
        Ok((inode, handle))
    }

    /// Unlink a file from a directory
    pub fn remove(&self, dir: &Arc<Inode>, name: &str) -> Result<(), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(dir)?;
        self.client.unlinkat(dir.fid, name, 0)
    }

    /// Remove an empty directory
    pub fn remove_dir(&self, dir: &Arc<Inode>, name: &str) -> Result<(), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(dir)?;
        self.client.unlinkat(dir.fid, name, AT_REMOVEDIR)
    }

    /// Rename an entry, possibly across directories
    pub fn rename(
        &self,
        from_dir: &Arc<Inode>,
        from_name: &str,
        to_dir: &Arc<Inode>,
        to_name: &str,
    ) -> Result<(), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(from_dir)?;
        Self::ensure_dir(to_dir)?;
        self.client
            .renameat(from_dir.fid, from_name, to_dir.fid, to_name)
    }

    /// Fetch attributes, refreshing the inode's cache
    pub fn read_stat(&self, inode: &Arc<Inode>) -> Result<Stat, Error> {
        let attr = self.client.getattr(inode.fid, GetattrMask::ALL)?;
        inode.store_stat(attr.stat.mode, attr.stat.size);
        Ok(attr.stat)
    }

    /// Update attributes; the cached stat is invalidated
    pub fn write_stat(
        &self,
        inode: &Arc<Inode>,
        valid: SetattrMask,
        attrs: SetAttr,
    ) -> Result<(), Error> {
        self.ensure_writable()?;
        self.client.setattr(inode.fid, valid, attrs)?;
        inode.invalidate();
        Ok(())
    }

    /// Open a directory for iteration
    pub fn open_dir(&self, inode: &Arc<Inode>) -> Result<DirHandle, Error> {
        Self::ensure_dir(inode)?;

        let guard = self.clone_guard(inode.fid)?;
        self.client.open(guard.fid(), LOpenFlags::O_RDONLY)?;
        Ok(DirHandle {
            inode: Arc::clone(inode),
            fid: guard.disarm(),
            state: Mutex::new(DirState {
                offset: 0,
                buffer: Vec::new(),
                pos: 0,
                eof: false,
            }),
        })
    }

    /// Read up to `max` entries from a directory cursor
    ///
    /// An empty result means the directory is exhausted. The cursor's
    /// server offset always comes from the last entry the server emitted.
    pub fn read_dir(&self, handle: &DirHandle, max: usize) -> Result<Vec<Dirent>, Error> {
        let mut entries = Vec::new();
        let mut st = handle.state.lock();

        while entries.len() < max {
            if st.pos >= st.buffer.len() {
                if st.eof {
                    break;
                }
                let DirState { offset, buffer, pos, eof } = &mut *st;
                self.client
                    .readdir(handle.fid, *offset, DIR_BUFFER_SIZE, buffer)?;
                *pos = 0;
                if buffer.is_empty() {
                    *eof = true;
                    break;
                }
            }

            let DirState { offset, buffer, pos, .. } = &mut *st;
            let mut reader = DirEntryReader::new(&buffer[*pos..]);
            while entries.len() < max {
                match reader.next() {
                    Some(Ok(entry)) => {
                        *offset = entry.offset;
                        entries.push(Dirent {
                            ino: entry.qid.path,
                            offset: entry.offset,
                            typ: entry.typ,
                            name: String::from_utf8_lossy(entry.name.as_bytes()).into_owned(),
                        });
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
            *pos = buffer.len() - reader.remaining();
        }

        Ok(entries)
    }

    /// Reset a directory cursor to the beginning
    pub fn rewind_dir(&self, handle: &DirHandle) {
        let mut st = handle.state.lock();
        st.offset = 0;
        st.buffer.clear();
        st.pos = 0;
        st.eof = false;
    }

    /// Close a directory cursor, clunking its fid
    pub fn release_dir(&self, handle: DirHandle) -> Result<(), Error> {
        self.client.clunk(handle.fid)
    }

    /// Read a symlink's target
    pub fn read_link(&self, inode: &Arc<Inode>) -> Result<String, Error> {
        if !inode.is_symlink() {
            return Err(Error::InvalidInput);
        }
        self.client.readlink(inode.fid)
    }

    /// Create a symlink in a directory
    pub fn create_symlink(
        &self,
        dir: &Arc<Inode>,
        name: &str,
        target: &str,
    ) -> Result<(), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(dir)?;
        self.client.symlink(dir.fid, name, target, 0)?;
        Ok(())
    }

    /// Create a directory
    pub fn create_dir(&self, dir: &Arc<Inode>, name: &str, mode: u32) -> Result<(), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(dir)?;
        self.client.mkdir(dir.fid, name, mode, 0)?;
        Ok(())
    }

    /// Hard-link an existing file under a new name
    pub fn create_link(
        &self,
        dir: &Arc<Inode>,
        name: &str,
        target: &Arc<Inode>,
    ) -> Result<(), Error> {
        self.ensure_writable()?;
        Self::ensure_dir(dir)?;
        self.client.link(dir.fid, target.fid, name)
    }

    /// Flush server-side state for one inode
    ///
    /// A no-op on read-only sessions.
    pub fn sync(&self, inode: &Arc<Inode>) -> Result<(), Error> {
        if self.read_only {
            return Ok(());
        }
        self.client.fsync(inode.fid, false)
    }

    /// Filesystem statistics off the root, plus the session io_unit
    pub fn statfs(&self) -> Result<FsInfo, Error> {
        let statfs = self.client.statfs(self.root.fid)?;
        Ok(FsInfo {
            statfs,
            io_unit: self.client.io_unit(),
        })
    }

    /// Evict an inode the host VFS no longer references
    ///
    /// The inode leaves the canonical table and its fid is clunked unless
    /// it is the root attachment. Outstanding cursors keep their own fids
    /// and are unaffected.
    pub fn forget(&self, inode: &Arc<Inode>) {
        let mut table = self.inodes.lock();
        if let Some(weak) = table.get(&inode.id) {
            if weak.as_ptr() == Arc::as_ptr(inode) {
                table.remove(&inode.id);
            }
        }
        drop(table);

        if inode.fid != self.client.root_fid() {
            let _ = self.client.clunk(inode.fid);
        }
    }

    /// Unmount: clunk the root and tear the session down
    pub fn unmount(mut self) {
        self.client.disconnect();
    }
}

impl<T: Read + Write> Drop for Filesystem<T> {
    fn drop(&mut self) {
        self.client.disconnect();
    }
}

/// Whether open flags request write access
fn wants_write(flags: LOpenFlags) -> bool {
    let accmode = flags.bits() & 0x3;
    accmode != 0
        || flags.intersects(LOpenFlags::O_TRUNC | LOpenFlags::O_APPEND | LOpenFlags::O_CREAT)
}

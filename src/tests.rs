// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Protocol and filesystem tests against an in-memory 9P server
//!
//! The server below speaks 9P2000.L over the crate's own codec and keeps
//! a small tree in memory, so the whole suite runs hermetically. Tests
//! observe the request stream through a shared handle to assert on wire
//! behavior (request counts, chunk sizes, fid rollback).

extern crate std;

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::client::Client;
use crate::fcall::{
    self, DirEntry, Fcall, FcallType, Fid, LOpenFlags, Qid, QidType, SetattrMask, TaggedFcall,
    AT_REMOVEDIR, VERSION_9P2000L,
};
use crate::fs::{Filesystem, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use crate::mount::{self, MountOptions};
use crate::transport::{Read, Transport, Write};
use crate::Error;

const ENOENT: u32 = 2;
const EBADF: u32 = 9;
const ENOTDIR: u32 = 20;
const EISDIR: u32 = 21;
const ENOTEMPTY: u32 = 39;
const EOPNOTSUPP: u32 = 95;

const ROOT_PATH: u64 = 1;

// ---------------------------------------------------------------------------
// In-memory 9P server
// ---------------------------------------------------------------------------

struct Node {
    qid: Qid,
    mode: u32,
    data: Vec<u8>,
    /// Name → qid path; populated for directories only
    children: BTreeMap<String, u64>,
    parent: u64,
    target: String,
}

struct FidState {
    path: u64,
    open: bool,
}

struct TestServer {
    msize: u32,
    nodes: BTreeMap<u64, Node>,
    fids: BTreeMap<Fid, FidState>,
    next_path: u64,
    /// Message type of every request received, in order
    request_log: Vec<u8>,
    /// `count` field of every Tread received
    tread_counts: Vec<u32>,
}

fn qid_for(mode: u32, path: u64) -> Qid {
    let typ = match mode & S_IFMT {
        S_IFDIR => QidType::DIR,
        S_IFLNK => QidType::SYMLINK,
        _ => QidType::FILE,
    };
    Qid {
        typ,
        version: 0,
        path,
    }
}

fn dirent_type(mode: u32) -> u8 {
    match mode & S_IFMT {
        S_IFDIR => 4,
        S_IFLNK => 10,
        _ => 8,
    }
}

impl TestServer {
    fn new(msize: u32) -> Self {
        let mut nodes = BTreeMap::new();
        let mode = S_IFDIR | 0o755;
        nodes.insert(
            ROOT_PATH,
            Node {
                qid: qid_for(mode, ROOT_PATH),
                mode,
                data: Vec::new(),
                children: BTreeMap::new(),
                parent: ROOT_PATH,
                target: String::new(),
            },
        );
        TestServer {
            msize,
            nodes,
            fids: BTreeMap::new(),
            next_path: 2,
            request_log: Vec::new(),
            tread_counts: Vec::new(),
        }
    }

    fn alloc_node(&mut self, parent: u64, name: &str, mode: u32) -> u64 {
        let path = self.next_path;
        self.next_path += 1;
        self.nodes.insert(
            path,
            Node {
                qid: qid_for(mode, path),
                mode,
                data: Vec::new(),
                children: BTreeMap::new(),
                parent,
                target: String::new(),
            },
        );
        self.nodes
            .get_mut(&parent)
            .unwrap()
            .children
            .insert(name.to_string(), path);
        path
    }

    fn seed_file(&mut self, name: &str, content: &[u8]) -> u64 {
        let path = self.alloc_node(ROOT_PATH, name, S_IFREG | 0o644);
        self.nodes.get_mut(&path).unwrap().data = content.to_vec();
        path
    }

    fn seed_dir(&mut self, name: &str) -> u64 {
        self.alloc_node(ROOT_PATH, name, S_IFDIR | 0o755)
    }

    fn requests_of_type(&self, typ: FcallType) -> usize {
        self.request_log.iter().filter(|&&t| t == typ as u8).count()
    }

    fn stat_of(node: &Node) -> fcall::Stat {
        fcall::Stat {
            mode: node.mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            rdev: 0,
            size: node.data.len() as u64,
            blksize: 4096,
            blocks: (node.data.len() as u64).div_ceil(512),
            ..Default::default()
        }
    }

    fn lerror(tag: u16, ecode: u32) -> TaggedFcall<'static> {
        TaggedFcall {
            tag,
            fcall: Fcall::Rlerror(fcall::Rlerror { ecode }),
        }
    }

    fn handle(&mut self, req: TaggedFcall<'_>) -> TaggedFcall<'static> {
        let tag = req.tag;
        let reply = match req.fcall {
            Fcall::Tversion(v) => {
                self.request_log.push(FcallType::Tversion as u8);
                Fcall::Rversion(fcall::Rversion {
                    msize: v.msize.min(self.msize),
                    version: fcall::FcallStr::Owned(VERSION_9P2000L.to_vec()),
                })
            }
            Fcall::Tattach(v) => {
                self.request_log.push(FcallType::Tattach as u8);
                self.fids.insert(
                    v.fid,
                    FidState {
                        path: ROOT_PATH,
                        open: false,
                    },
                );
                Fcall::Rattach(fcall::Rattach {
                    qid: self.nodes[&ROOT_PATH].qid,
                })
            }
            Fcall::Twalk(v) => {
                self.request_log.push(FcallType::Twalk as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let mut cur = state.path;
                let mut wqids = Vec::new();
                for (i, wname) in v.wnames.iter().enumerate() {
                    let name = core::str::from_utf8(wname.as_bytes()).unwrap_or("");
                    let node = &self.nodes[&cur];
                    let next = if name == ".." {
                        Some(node.parent)
                    } else {
                        node.children.get(name).copied()
                    };
                    match next {
                        Some(path) => {
                            cur = path;
                            wqids.push(self.nodes[&path].qid);
                        }
                        None if i == 0 => return Self::lerror(tag, ENOENT),
                        None => {
                            // Partial walk: new_fid stays unbound.
                            return TaggedFcall {
                                tag,
                                fcall: Fcall::Rwalk(fcall::Rwalk { wqids }),
                            };
                        }
                    }
                }
                self.fids.insert(
                    v.new_fid,
                    FidState {
                        path: cur,
                        open: false,
                    },
                );
                Fcall::Rwalk(fcall::Rwalk { wqids })
            }
            Fcall::Tlopen(v) => {
                self.request_log.push(FcallType::Tlopen as u8);
                let Some(state) = self.fids.get_mut(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                state.open = true;
                let qid = self.nodes[&state.path].qid;
                Fcall::Rlopen(fcall::Rlopen { qid, iounit: 0 })
            }
            Fcall::Tlcreate(v) => {
                self.request_log.push(FcallType::Tlcreate as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let dir = state.path;
                if self.nodes[&dir].mode & S_IFMT != S_IFDIR {
                    return Self::lerror(tag, ENOTDIR);
                }
                let name = core::str::from_utf8(v.name.as_bytes()).unwrap_or("");
                let path = self.alloc_node(dir, name, S_IFREG | (v.mode & 0o777));
                // The fid now represents the new, open file.
                self.fids.insert(
                    v.fid,
                    FidState { path, open: true },
                );
                Fcall::Rlcreate(fcall::Rlcreate {
                    qid: self.nodes[&path].qid,
                    iounit: 0,
                })
            }
            Fcall::Tread(v) => {
                self.request_log.push(FcallType::Tread as u8);
                self.tread_counts.push(v.count);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                if !state.open {
                    return Self::lerror(tag, EBADF);
                }
                let node = &self.nodes[&state.path];
                let start = (v.offset as usize).min(node.data.len());
                let end = (start + v.count as usize).min(node.data.len());
                Fcall::Rread(fcall::Rread {
                    data: Cow::Owned(node.data[start..end].to_vec()),
                })
            }
            Fcall::Twrite(v) => {
                self.request_log.push(FcallType::Twrite as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                if !state.open {
                    return Self::lerror(tag, EBADF);
                }
                let path = state.path;
                let node = self.nodes.get_mut(&path).unwrap();
                let end = v.offset as usize + v.data.len();
                if node.data.len() < end {
                    node.data.resize(end, 0);
                }
                node.data[v.offset as usize..end].copy_from_slice(&v.data);
                Fcall::Rwrite(fcall::Rwrite {
                    count: v.data.len() as u32,
                })
            }
            Fcall::Tclunk(v) => {
                self.request_log.push(FcallType::Tclunk as u8);
                self.fids.remove(&v.fid);
                Fcall::Rclunk(fcall::Rclunk {})
            }
            Fcall::Tremove(v) => {
                self.request_log.push(FcallType::Tremove as u8);
                let Some(state) = self.fids.remove(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let parent = self.nodes[&state.path].parent;
                let path = state.path;
                self.nodes
                    .get_mut(&parent)
                    .unwrap()
                    .children
                    .retain(|_, p| *p != path);
                self.nodes.remove(&path);
                Fcall::Rremove(fcall::Rremove {})
            }
            Fcall::Tgetattr(v) => {
                self.request_log.push(FcallType::Tgetattr as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let node = &self.nodes[&state.path];
                Fcall::Rgetattr(fcall::Rgetattr {
                    valid: v.req_mask,
                    qid: node.qid,
                    stat: Self::stat_of(node),
                })
            }
            Fcall::Tsetattr(v) => {
                self.request_log.push(FcallType::Tsetattr as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let path = state.path;
                let node = self.nodes.get_mut(&path).unwrap();
                if v.valid.contains(SetattrMask::SIZE) {
                    node.data.resize(v.stat.size as usize, 0);
                }
                if v.valid.contains(SetattrMask::MODE) {
                    node.mode = (node.mode & S_IFMT) | (v.stat.mode & 0o7777);
                }
                Fcall::Rsetattr(fcall::Rsetattr {})
            }
            Fcall::Treaddir(v) => {
                self.request_log.push(FcallType::Treaddir as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                if !state.open {
                    return Self::lerror(tag, EBADF);
                }
                let node = &self.nodes[&state.path];
                if node.mode & S_IFMT != S_IFDIR {
                    return Self::lerror(tag, ENOTDIR);
                }

                let mut listing: Vec<(&str, u64)> =
                    vec![(".", state.path), ("..", node.parent)];
                for (name, path) in &node.children {
                    listing.push((name.as_str(), *path));
                }

                let mut data = Vec::new();
                for (i, (name, path)) in listing.iter().enumerate().skip(v.offset as usize) {
                    let child = &self.nodes[path];
                    let entry = DirEntry {
                        qid: child.qid,
                        offset: (i + 1) as u64,
                        typ: dirent_type(child.mode),
                        name: fcall::FcallStr::Borrowed(name.as_bytes()),
                    };
                    if data.len() + entry.size() > v.count as usize {
                        break;
                    }
                    entry.encode_into(&mut data).unwrap();
                }
                Fcall::Rreaddir(fcall::Rreaddir {
                    data: Cow::Owned(data),
                })
            }
            Fcall::Tmkdir(v) => {
                self.request_log.push(FcallType::Tmkdir as u8);
                let Some(state) = self.fids.get(&v.dfid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let dir = state.path;
                let name = core::str::from_utf8(v.name.as_bytes()).unwrap_or("");
                let path = self.alloc_node(dir, name, S_IFDIR | (v.mode & 0o777));
                Fcall::Rmkdir(fcall::Rmkdir {
                    qid: self.nodes[&path].qid,
                })
            }
            Fcall::Tunlinkat(v) => {
                self.request_log.push(FcallType::Tunlinkat as u8);
                let Some(state) = self.fids.get(&v.dfid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let dir = state.path;
                let name = core::str::from_utf8(v.name.as_bytes()).unwrap_or("");
                let Some(&child) = self.nodes[&dir].children.get(name) else {
                    return Self::lerror(tag, ENOENT);
                };
                let child_node = &self.nodes[&child];
                let is_dir = child_node.mode & S_IFMT == S_IFDIR;
                if v.flags & AT_REMOVEDIR != 0 {
                    if !is_dir {
                        return Self::lerror(tag, ENOTDIR);
                    }
                    if !child_node.children.is_empty() {
                        return Self::lerror(tag, ENOTEMPTY);
                    }
                } else if is_dir {
                    return Self::lerror(tag, EISDIR);
                }
                self.nodes.get_mut(&dir).unwrap().children.remove(name);
                self.nodes.remove(&child);
                Fcall::Runlinkat(fcall::Runlinkat {})
            }
            Fcall::Trenameat(v) => {
                self.request_log.push(FcallType::Trenameat as u8);
                let (Some(old_state), Some(new_state)) =
                    (self.fids.get(&v.olddfid), self.fids.get(&v.newdfid))
                else {
                    return Self::lerror(tag, ENOENT);
                };
                let (old_dir, new_dir) = (old_state.path, new_state.path);
                let oldname = core::str::from_utf8(v.oldname.as_bytes()).unwrap_or("");
                let newname = core::str::from_utf8(v.newname.as_bytes()).unwrap_or("");
                let Some(child) = self
                    .nodes
                    .get_mut(&old_dir)
                    .unwrap()
                    .children
                    .remove(oldname)
                else {
                    return Self::lerror(tag, ENOENT);
                };
                self.nodes
                    .get_mut(&new_dir)
                    .unwrap()
                    .children
                    .insert(newname.to_string(), child);
                self.nodes.get_mut(&child).unwrap().parent = new_dir;
                Fcall::Rrenameat(fcall::Rrenameat {})
            }
            Fcall::Tstatfs(_) => {
                self.request_log.push(FcallType::Tstatfs as u8);
                Fcall::Rstatfs(fcall::Rstatfs {
                    statfs: fcall::Statfs {
                        typ: 0x01021997, // V9FS_MAGIC
                        bsize: 4096,
                        blocks: 1000,
                        bfree: 500,
                        bavail: 500,
                        files: 100,
                        ffree: 50,
                        fsid: 0,
                        namelen: 255,
                    },
                })
            }
            Fcall::Tfsync(_) => {
                self.request_log.push(FcallType::Tfsync as u8);
                Fcall::Rfsync(fcall::Rfsync {})
            }
            Fcall::Treadlink(v) => {
                self.request_log.push(FcallType::Treadlink as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let node = &self.nodes[&state.path];
                Fcall::Rreadlink(fcall::Rreadlink {
                    target: fcall::FcallStr::Owned(node.target.as_bytes().to_vec()),
                })
            }
            Fcall::Tsymlink(v) => {
                self.request_log.push(FcallType::Tsymlink as u8);
                let Some(state) = self.fids.get(&v.fid) else {
                    return Self::lerror(tag, ENOENT);
                };
                let dir = state.path;
                let name = core::str::from_utf8(v.name.as_bytes()).unwrap_or("");
                let target = core::str::from_utf8(v.symtgt.as_bytes()).unwrap_or("");
                let path = self.alloc_node(dir, name, S_IFLNK | 0o777);
                self.nodes.get_mut(&path).unwrap().target = target.to_string();
                Fcall::Rsymlink(fcall::Rsymlink {
                    qid: self.nodes[&path].qid,
                })
            }
            Fcall::Tlink(v) => {
                self.request_log.push(FcallType::Tlink as u8);
                let (Some(dir_state), Some(file_state)) =
                    (self.fids.get(&v.dfid), self.fids.get(&v.fid))
                else {
                    return Self::lerror(tag, ENOENT);
                };
                let (dir, file) = (dir_state.path, file_state.path);
                let name = core::str::from_utf8(v.name.as_bytes()).unwrap_or("");
                self.nodes
                    .get_mut(&dir)
                    .unwrap()
                    .children
                    .insert(name.to_string(), file);
                Fcall::Rlink(fcall::Rlink {})
            }
            _ => return Self::lerror(tag, EOPNOTSUPP),
        };
        TaggedFcall {
            tag,
            fcall: reply,
        }
    }
}

// ---------------------------------------------------------------------------
// Loopback transport: hands each complete request to the server
// ---------------------------------------------------------------------------

struct Loopback {
    server: Arc<Mutex<TestServer>>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
}

impl Loopback {
    fn new(server: Arc<Mutex<TestServer>>) -> Self {
        Loopback {
            server,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
        }
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.inbox.extend_from_slice(buf);
        loop {
            if self.inbox.len() < 4 {
                break;
            }
            let size = u32::from_le_bytes(self.inbox[..4].try_into().unwrap()) as usize;
            if size < fcall::HEADER_SIZE {
                return Err(Error::InvalidInput);
            }
            if self.inbox.len() < size {
                break;
            }
            let message: Vec<u8> = self.inbox.drain(..size).collect();
            let request = TaggedFcall::decode(&message)?;
            let reply = self.server.lock().handle(request);
            let mut encoded = Vec::new();
            reply.encode_to_buf(&mut encoded).unwrap();
            self.outbox.extend(encoded);
        }
        Ok(buf.len())
    }
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.outbox.is_empty() {
            return Err(Error::Io);
        }
        let n = buf.len().min(self.outbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbox.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Transport for Loopback {
    fn max_msize(&self) -> u32 {
        65536
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

fn new_server(msize: u32) -> (Arc<Mutex<TestServer>>, Loopback) {
    let server = Arc::new(Mutex::new(TestServer::new(msize)));
    let transport = Loopback::new(Arc::clone(&server));
    (server, transport)
}

fn mount_rw(server_msize: u32, proposed_msize: u32) -> (Arc<Mutex<TestServer>>, Filesystem<Loopback>) {
    let (server, transport) = new_server(server_msize);
    let fs = Filesystem::new(transport, proposed_msize, "", false).unwrap();
    (server, fs)
}

// ---------------------------------------------------------------------------
// Session establishment
// ---------------------------------------------------------------------------

#[test]
fn version_handshake_negotiates_msize() {
    let (_, transport) = new_server(4096);
    let client = Client::new(transport, 8192).unwrap();
    assert_eq!(client.msize(), 4096);
    assert_eq!(client.io_unit(), 4085);
    // Attach is still pending.
    assert!(!client.is_connected());
}

#[test]
fn attach_binds_the_root() {
    let (server, fs) = mount_rw(65536, 8192);
    assert_eq!(fs.root().id(), ROOT_PATH);
    assert!(fs.root().is_dir());
    assert!(fs.client().is_connected());
    // The root holds the first fid allocated after init.
    assert_eq!(fs.client().root_fid(), 0);
    assert_eq!(fs.client().fids_in_use(), 1);
    assert_eq!(server.lock().requests_of_type(FcallType::Tattach), 1);
}

#[test]
fn lookup_of_missing_file_releases_the_fid() {
    let (server, fs) = mount_rw(65536, 8192);
    let fids_before = fs.client().fids_in_use();
    assert_eq!(fs.lookup(fs.root(), "nope").unwrap_err(), Error::NotFound);
    assert_eq!(fs.client().fids_in_use(), fids_before);
    // The failed walk reached the server; nothing else was issued on the
    // failure path.
    assert_eq!(server.lock().requests_of_type(FcallType::Twalk), 1);
    assert_eq!(server.lock().requests_of_type(FcallType::Tclunk), 0);
}

#[test]
fn partial_walk_is_not_found_and_unwinds() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_dir("a");

    let fids_before = fs.client().fids_in_use();
    let err = fs
        .client()
        .walk(fs.client().root_fid(), &["a", "nope", "c"])
        .unwrap_err();
    assert_eq!(err, Error::NotFound);
    assert_eq!(fs.client().fids_in_use(), fids_before);
    // No fid stayed bound on the server beyond the root.
    assert_eq!(server.lock().fids.len(), 1);
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

#[test]
fn open_and_read_small_file_in_one_request() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("hello.txt", b"Hello, world!");

    let inode = fs.lookup(fs.root(), "hello.txt").unwrap();
    let handle = fs.open(&inode, LOpenFlags::O_RDONLY).unwrap();

    let mut buf = [0u8; 13];
    let n = fs.read(&handle, &mut buf, Some(0)).unwrap();
    assert_eq!(n, 13);
    assert_eq!(&buf, b"Hello, world!");
    assert_eq!(server.lock().requests_of_type(FcallType::Tread), 1);

    fs.release(handle).unwrap();
}

#[test]
fn chunked_read_issues_ceil_len_over_iounit_requests() {
    // msize 4107 → io_unit 4096.
    let (server, fs) = mount_rw(65536, 4107);
    assert_eq!(fs.client().io_unit(), 4096);

    let content: Vec<u8> = (0..10000u32).map(|i| i as u8).collect();
    server.lock().seed_file("big.bin", &content);

    let inode = fs.lookup(fs.root(), "big.bin").unwrap();
    let handle = fs.open(&inode, LOpenFlags::O_RDONLY).unwrap();

    let mut buf = vec![0u8; 10000];
    let n = fs.read(&handle, &mut buf, None).unwrap();
    assert_eq!(n, 10000);
    assert_eq!(buf, content);
    assert_eq!(handle.position(), 10000);

    assert_eq!(server.lock().tread_counts, vec![4096, 4096, 1808]);
    fs.release(handle).unwrap();
}

#[test]
fn chunked_write_round_trips() {
    let (server, fs) = mount_rw(65536, 4107);
    server.lock().seed_file("out.bin", b"");

    let inode = fs.lookup(fs.root(), "out.bin").unwrap();
    let handle = fs.open(&inode, LOpenFlags::O_WRONLY).unwrap();

    let content: Vec<u8> = (0..9000u32).map(|i| (i * 7) as u8).collect();
    let n = fs.write(&handle, &content, Some(0)).unwrap();
    assert_eq!(n, 9000);
    // ceil(9000 / 4096) requests
    assert_eq!(server.lock().requests_of_type(FcallType::Twrite), 3);
    assert_eq!(server.lock().nodes_data("out.bin"), content);

    // The cached stat was invalidated by the write.
    assert!(!inode.has_cached_stat());
    fs.release(handle).unwrap();
}

#[test]
fn read_past_eof_returns_zero() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("short.txt", b"abc");

    let inode = fs.lookup(fs.root(), "short.txt").unwrap();
    let handle = fs.open(&inode, LOpenFlags::O_RDONLY).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(fs.read(&handle, &mut buf, Some(0)).unwrap(), 3);
    assert_eq!(fs.read(&handle, &mut buf, Some(100)).unwrap(), 0);
    fs.release(handle).unwrap();
}

#[test]
fn cursor_position_advances_without_explicit_offset() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("seek.txt", b"ABCDEFGHIJ");

    let inode = fs.lookup(fs.root(), "seek.txt").unwrap();
    let handle = fs.open(&inode, LOpenFlags::O_RDONLY).unwrap();

    handle.set_position(5);
    let mut buf = [0u8; 10];
    let n = fs.read(&handle, &mut buf, None).unwrap();
    assert_eq!(&buf[..n], b"FGHIJ");
    assert_eq!(handle.position(), 10);
    fs.release(handle).unwrap();
}

#[test]
fn create_write_and_read_back() {
    let (_server, fs) = mount_rw(65536, 8192);
    let (inode, handle) = fs
        .create(
            fs.root(),
            "fresh.txt",
            LOpenFlags::O_WRONLY | LOpenFlags::O_CREAT,
            0o644,
        )
        .unwrap();
    assert!(inode.is_file());

    fs.write(&handle, b"created content", Some(0)).unwrap();
    fs.release(handle).unwrap();

    let again = fs.lookup(fs.root(), "fresh.txt").unwrap();
    assert!(Arc::ptr_eq(&inode, &again));

    let handle = fs.open(&again, LOpenFlags::O_RDONLY).unwrap();
    let mut buf = [0u8; 15];
    assert_eq!(fs.read(&handle, &mut buf, Some(0)).unwrap(), 15);
    assert_eq!(&buf, b"created content");
    fs.release(handle).unwrap();
}

// ---------------------------------------------------------------------------
// Inode canonicalisation
// ---------------------------------------------------------------------------

#[test]
fn repeated_lookups_share_one_inode() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("same.txt", b"x");

    let first = fs.lookup(fs.root(), "same.txt").unwrap();
    let fids_after_first = fs.client().fids_in_use();
    let second = fs.lookup(fs.root(), "same.txt").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // The duplicate walk's fid was clunked and released.
    assert_eq!(fs.client().fids_in_use(), fids_after_first);
    assert!(server.lock().requests_of_type(FcallType::Tclunk) >= 1);
}

#[test]
fn dot_lookup_returns_the_same_inode() {
    let (_, fs) = mount_rw(65536, 8192);
    let root_again = fs.lookup(fs.root(), ".").unwrap();
    assert!(Arc::ptr_eq(fs.root(), &root_again));
}

#[test]
fn forget_evicts_and_clunks() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("gone.txt", b"x");

    let inode = fs.lookup(fs.root(), "gone.txt").unwrap();
    let fids_before = fs.client().fids_in_use();
    fs.forget(&inode);
    assert_eq!(fs.client().fids_in_use(), fids_before - 1);

    // A later lookup builds a fresh inode.
    let again = fs.lookup(fs.root(), "gone.txt").unwrap();
    assert!(!Arc::ptr_eq(&inode, &again));
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

#[test]
fn directory_iteration_and_rewind() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_dir("a");
    server.lock().seed_file("b", b"contents");

    let handle = fs.open_dir(fs.root()).unwrap();
    let entries = fs.read_dir(&handle, 32).unwrap();

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "a", "b"]);

    // Server offsets are distinct and strictly increasing.
    let offsets: Vec<u64> = entries.iter().map(|e| e.offset).collect();
    assert_eq!(offsets, vec![1, 2, 3, 4]);

    // Types: directories 4, files 8.
    assert_eq!(entries[2].typ, 4);
    assert_eq!(entries[3].typ, 8);

    // Exhausted.
    assert!(fs.read_dir(&handle, 32).unwrap().is_empty());

    fs.rewind_dir(&handle);
    let again = fs.read_dir(&handle, 32).unwrap();
    assert_eq!(again, entries);

    fs.release_dir(handle).unwrap();
}

#[test]
fn read_dir_respects_the_caller_batch_size() {
    let (server, fs) = mount_rw(65536, 8192);
    for i in 0..5 {
        server.lock().seed_file(&format!("f{i}"), b"");
    }

    let handle = fs.open_dir(fs.root()).unwrap();
    let mut all = Vec::new();
    loop {
        let batch = fs.read_dir(&handle, 3).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 3);
        all.extend(batch);
    }
    // ".", "..", f0..f4
    assert_eq!(all.len(), 7);
    fs.release_dir(handle).unwrap();
}

#[test]
fn open_dir_on_a_file_is_rejected_locally() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("plain.txt", b"x");
    let inode = fs.lookup(fs.root(), "plain.txt").unwrap();
    assert_eq!(fs.open_dir(&inode).unwrap_err(), Error::NotADirectory);
}

#[test]
fn mkdir_rmdir_and_not_empty() {
    let (_server, fs) = mount_rw(65536, 8192);
    fs.create_dir(fs.root(), "sub", 0o755).unwrap();

    let sub = fs.lookup(fs.root(), "sub").unwrap();
    assert!(sub.is_dir());

    fs.create_dir(&sub, "nested", 0o755).unwrap();
    assert_eq!(
        fs.remove_dir(fs.root(), "sub").unwrap_err(),
        Error::NotEmpty
    );

    fs.remove_dir(&sub, "nested").unwrap();
    fs.remove_dir(fs.root(), "sub").unwrap();
    assert_eq!(fs.lookup(fs.root(), "sub").unwrap_err(), Error::NotFound);
}

#[test]
fn unlink_uses_the_directory_fid() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("victim.txt", b"x");

    fs.remove(fs.root(), "victim.txt").unwrap();
    assert_eq!(
        fs.lookup(fs.root(), "victim.txt").unwrap_err(),
        Error::NotFound
    );
    // Removing a directory without AT_REMOVEDIR is refused remotely.
    server.lock().seed_dir("d");
    assert_eq!(fs.remove(fs.root(), "d").unwrap_err(), Error::IsADirectory);
}

#[test]
fn rename_moves_between_directories() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("old.txt", b"data");
    server.lock().seed_dir("dst");

    let dst = fs.lookup(fs.root(), "dst").unwrap();
    fs.rename(fs.root(), "old.txt", &dst, "new.txt").unwrap();

    assert_eq!(fs.lookup(fs.root(), "old.txt").unwrap_err(), Error::NotFound);
    let moved = fs.lookup(&dst, "new.txt").unwrap();
    assert!(moved.is_file());
}

// ---------------------------------------------------------------------------
// Attributes, symlinks, statfs, sync
// ---------------------------------------------------------------------------

#[test]
fn read_stat_refreshes_the_cache() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("stat.txt", b"1234567890");

    let inode = fs.lookup(fs.root(), "stat.txt").unwrap();
    let stat = fs.read_stat(&inode).unwrap();
    assert_eq!(stat.size, 10);
    assert_eq!(stat.mode & S_IFMT, S_IFREG);
    assert!(inode.has_cached_stat());
    assert_eq!(inode.size(), 10);
}

#[test]
fn write_stat_truncates_and_invalidates() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("trunc.txt", b"Hello, World!");

    let inode = fs.lookup(fs.root(), "trunc.txt").unwrap();
    fs.write_stat(
        &inode,
        SetattrMask::SIZE,
        fcall::SetAttr {
            size: 5,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(!inode.has_cached_stat());

    let stat = fs.read_stat(&inode).unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(server.lock().nodes_data("trunc.txt"), b"Hello");
}

#[test]
fn symlink_and_readlink() {
    let (_, fs) = mount_rw(65536, 8192);
    fs.create_symlink(fs.root(), "ln", "/target/path").unwrap();

    let inode = fs.lookup(fs.root(), "ln").unwrap();
    assert!(inode.is_symlink());
    assert_eq!(fs.read_link(&inode).unwrap(), "/target/path");

    // readlink on a regular file is rejected locally.
    fs.create(fs.root(), "reg", LOpenFlags::O_CREAT, 0o644)
        .map(|(_, h)| fs.release(h))
        .unwrap()
        .unwrap();
    let reg = fs.lookup(fs.root(), "reg").unwrap();
    assert_eq!(fs.read_link(&reg).unwrap_err(), Error::InvalidInput);
}

#[test]
fn hard_link_shares_the_inode_identity() {
    let (server, fs) = mount_rw(65536, 8192);
    server.lock().seed_file("orig", b"shared");

    let orig = fs.lookup(fs.root(), "orig").unwrap();
    fs.create_link(fs.root(), "alias", &orig).unwrap();

    let alias = fs.lookup(fs.root(), "alias").unwrap();
    // Same qid path → same canonical inode.
    assert!(Arc::ptr_eq(&orig, &alias));
}

#[test]
fn statfs_reports_root_numbers_and_io_unit() {
    let (_, fs) = mount_rw(65536, 8192);
    let info = fs.statfs().unwrap();
    assert_eq!(info.statfs.bsize, 4096);
    assert_eq!(info.statfs.blocks, 1000);
    assert_eq!(info.statfs.namelen, 255);
    // msize 8192 → single-request payload limit 8181.
    assert_eq!(info.io_unit, 8181);
    assert_eq!(info.io_unit, fs.client().io_unit());
}

#[test]
fn sync_issues_fsync() {
    let (server, fs) = mount_rw(65536, 8192);
    fs.sync(fs.root()).unwrap();
    assert_eq!(server.lock().requests_of_type(FcallType::Tfsync), 1);
}

// ---------------------------------------------------------------------------
// Read-only sessions
// ---------------------------------------------------------------------------

#[test]
fn read_only_session_rejects_mutation_without_requests() {
    let (server, transport) = new_server(65536);
    server.lock().seed_file("ro.txt", b"data");
    let fs = Filesystem::new(transport, 8192, "", true).unwrap();

    let inode = fs.lookup(fs.root(), "ro.txt").unwrap();
    let handle = fs.open(&inode, LOpenFlags::O_RDONLY).unwrap();
    let requests_before = server.lock().request_log.len();

    assert_eq!(
        fs.write(&handle, b"nope", Some(0)).unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.open(&inode, LOpenFlags::O_WRONLY).unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.create(fs.root(), "new", LOpenFlags::O_CREAT, 0o644)
            .map(|_| ())
            .unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.remove(fs.root(), "ro.txt").unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.create_dir(fs.root(), "d", 0o755).unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.create_symlink(fs.root(), "l", "t").unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.rename(fs.root(), "ro.txt", fs.root(), "x").unwrap_err(),
        Error::ReadOnly
    );
    assert_eq!(
        fs.write_stat(&inode, SetattrMask::SIZE, Default::default())
            .unwrap_err(),
        Error::ReadOnly
    );

    // None of the rejected operations reached the wire.
    assert_eq!(server.lock().request_log.len(), requests_before);

    // Sync is a no-op rather than an error.
    fs.sync(&inode).unwrap();
    assert_eq!(server.lock().request_log.len(), requests_before);

    fs.release(handle).unwrap();
}

// ---------------------------------------------------------------------------
// Connection failure
// ---------------------------------------------------------------------------

/// A transport that fails every send after the first `allowed` messages.
struct FlakyTransport {
    inner: Loopback,
    allowed: usize,
    sent: usize,
}

impl Write for FlakyTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.sent >= self.allowed {
            return Err(Error::Io);
        }
        self.sent += 1;
        self.inner.write(buf)
    }
}

impl Read for FlakyTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.inner.read(buf)
    }
}

#[test]
fn transport_failure_is_connection_fatal() {
    let (_, inner) = new_server(65536);
    let transport = FlakyTransport {
        inner,
        allowed: 1, // version handshake only
        sent: 0,
    };
    let mut client = Client::new(transport, 8192).unwrap();

    assert_eq!(client.attach("").unwrap_err(), Error::Io);
    // The session latched dead: nothing further reaches the wire.
    assert_eq!(client.attach("").unwrap_err(), Error::Disconnected);
    // Rollback released the attach fids on both paths.
    assert_eq!(client.fids_in_use(), 0);
}

// ---------------------------------------------------------------------------
// Unmount
// ---------------------------------------------------------------------------

#[test]
fn unmount_clunks_the_root() {
    let (server, fs) = mount_rw(65536, 8192);
    fs.unmount();
    let server = server.lock();
    assert_eq!(server.requests_of_type(FcallType::Tclunk), 1);
    assert!(server.fids.is_empty());
}

// ---------------------------------------------------------------------------
// Mount glue and the transport registry
// ---------------------------------------------------------------------------

static REGISTRY_TEST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn mount_by_tag_claims_the_transport() {
    let _serial = REGISTRY_TEST_LOCK.lock();

    let (server, transport) = new_server(65536);
    server.lock().seed_file("via_mount.txt", b"hi");
    mount::register_transport("mounttest", Box::new(transport)).unwrap();

    let fs = mount::mount("tag=mounttest,aname=/export,msize=16384", false).unwrap();
    let inode = fs.lookup(fs.root(), "via_mount.txt").unwrap();
    assert!(inode.is_file());

    // The transport was claimed: a second mount finds nothing.
    assert_eq!(
        mount::mount("tag=mounttest", false).unwrap_err(),
        Error::DeviceNotReady
    );
}

#[test]
fn registry_fills_up_and_unregisters() {
    let _serial = REGISTRY_TEST_LOCK.lock();

    let mut registered = Vec::new();
    let mut filled = false;
    for i in 0..9 {
        let tag = format!("fill{i}");
        let (_, transport) = new_server(65536);
        match mount::register_transport(&tag, Box::new(transport)) {
            Ok(()) => registered.push(tag),
            Err(e) => {
                assert_eq!(e, Error::TooManyOpenFiles);
                filled = true;
                break;
            }
        }
    }
    assert!(filled, "registry never reported exhaustion");
    for tag in &registered {
        assert!(mount::unregister_transport(tag).is_some());
    }
    assert!(mount::unregister_transport("fill0").is_none());
}

#[test]
fn mount_options_reject_a_missing_tag() {
    assert_eq!(
        MountOptions::parse("aname=/x,msize=9000"),
        Err(Error::InvalidInput)
    );
}

impl TestServer {
    /// Content of a root-level file, for post-hoc assertions
    fn nodes_data(&self, name: &str) -> Vec<u8> {
        let path = self.nodes[&ROOT_PATH].children[name];
        self.nodes[&path].data.clone()
    }
}

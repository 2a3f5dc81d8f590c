// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! 9P2000.L protocol message definitions and encoding/decoding
//!
//! This module implements the message set of the 9P2000.L protocol as used
//! by a client. See <https://9p.io/sys/man/5/intro> and
//! <https://github.com/chaos/diod/blob/master/protocol.md>
//!
//! Every message begins with a 7-byte header `size[4] type[1] tag[2]` where
//! `size` is the total message length including the header itself. All
//! integers are little-endian. Strings carry a u16 length prefix, blobs a
//! u32 length prefix; neither is NUL-terminated on the wire.

use alloc::borrow::Cow;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::transport::Write;
use crate::Error;

/// File identifier type
pub type Fid = u32;

/// Special tag which `Tversion`/`Rversion` must use as `tag`
pub const NOTAG: u16 = !0;

/// Special value which `Tattach` with no auth must use as `afid`
pub const NOFID: u32 = !0;

/// Special uid which `Tattach` uses as `n_uname` to indicate no uid is
/// specified
pub const NONUNAME: u32 = !0;

/// The version string this client negotiates; other dialects are refused
pub const VERSION_9P2000L: &[u8] = b"9P2000.L";

/// Size of the message header: size[4] type[1] tag[2]
pub const HEADER_SIZE: usize = 7;

/// Size of a qid on the wire
pub const QID_SIZE: usize = 13;

/// Maximum elements in a single walk
pub const MAXWELEM: usize = 13;

/// `Tunlinkat` flag selecting directory removal
pub const AT_REMOVEDIR: u32 = 0x200;

bitflags! {
    /// Flags passed to Tlopen/Tlcreate.
    ///
    /// Same as Linux's open flags.
    /// https://elixir.bootlin.com/linux/v6.12/source/include/net/9p/9p.h#L263
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LOpenFlags: u32 {
        const O_RDONLY    = 0;
        const O_WRONLY    = 1;
        const O_RDWR    = 2;

        const O_CREAT = 0o100;
        const O_EXCL = 0o200;
        const O_NOCTTY = 0o400;
        const O_TRUNC = 0o1000;
        const O_APPEND = 0o2000;
        const O_NONBLOCK = 0o4000;
        const O_DSYNC = 0o10000;
        const FASYNC = 0o20000;
        const O_DIRECT = 0o40000;
        const O_LARGEFILE = 0o100000;
        const O_DIRECTORY = 0o200000;
        const O_NOFOLLOW = 0o400000;
        const O_NOATIME = 0o1000000;
        const O_CLOEXEC = 0o2000000;
        const O_SYNC = 0o4000000;
    }
}

bitflags! {
    /// Bits in Qid.typ
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct QidType: u8 {
        /// Type bit for directories
        const DIR       = 0x80;
        /// Type bit for append only files
        const APPEND    = 0x40;
        /// Type bit for exclusive use files
        const EXCL      = 0x20;
        /// Type bit for mounted channel
        const MOUNT     = 0x10;
        /// Type bit for authentication file
        const AUTH      = 0x08;
        /// Type bit for not-backed-up file
        const TMP       = 0x04;
        /// Type bit for symbolic links
        const SYMLINK   = 0x02;
        /// Type bit for hard links
        const LINK      = 0x01;
        /// Plain file
        const FILE      = 0x00;
    }
}

bitflags! {
    /// Bits in `mask` and `valid` of `Tgetattr` and `Rgetattr`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GetattrMask: u64 {
        const MODE          = 0x00000001;
        const NLINK         = 0x00000002;
        const UID           = 0x00000004;
        const GID           = 0x00000008;
        const RDEV          = 0x00000010;
        const ATIME         = 0x00000020;
        const MTIME         = 0x00000040;
        const CTIME         = 0x00000080;
        const INO           = 0x00000100;
        const SIZE          = 0x00000200;
        const BLOCKS        = 0x00000400;

        const BTIME         = 0x00000800;
        const GEN           = 0x00001000;
        const DATA_VERSION  = 0x00002000;

        /// Mask for fields up to BLOCKS
        const BASIC         = 0x000007ff;
        /// Mask for all fields above
        const ALL           = 0x00003fff;
    }
}

bitflags! {
    /// Bits in `valid` of `Tsetattr`.
    ///
    /// If a time bit is set without the corresponding SET bit, the current
    /// system time on the server is used instead of the value sent in the
    /// request.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SetattrMask: u32 {
        const MODE      = 0x00000001;
        const UID       = 0x00000002;
        const GID       = 0x00000004;
        const SIZE      = 0x00000008;
        const ATIME     = 0x00000010;
        const MTIME     = 0x00000020;
        const CTIME     = 0x00000040;
        const ATIME_SET = 0x00000080;
        const MTIME_SET = 0x00000100;
    }
}

/// String type used in 9P protocol messages
#[derive(Clone, Debug)]
pub enum FcallStr<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

impl PartialEq for FcallStr<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for FcallStr<'_> {}

impl<'a> FcallStr<'a> {
    /// Get the bytes of the string
    pub fn as_bytes(&'a self) -> &'a [u8] {
        match self {
            FcallStr::Owned(b) => b,
            FcallStr::Borrowed(b) => b,
        }
    }

    /// Create a static (owned) copy of this string
    pub fn clone_static(&self) -> FcallStr<'static> {
        FcallStr::Owned(self.as_bytes().to_vec())
    }

    /// Get the length of the string
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the string is empty
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl<'a, T: ?Sized + AsRef<[u8]>> From<&'a T> for FcallStr<'a> {
    fn from(b: &'a T) -> FcallStr<'a> {
        FcallStr::Borrowed(b.as_ref())
    }
}

/// 9P message types
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FcallType {
    // 9P2000.L
    Rlerror = 7,
    Tstatfs = 8,
    Rstatfs = 9,
    Tlopen = 12,
    Rlopen = 13,
    Tlcreate = 14,
    Rlcreate = 15,
    Tsymlink = 16,
    Rsymlink = 17,
    Treadlink = 22,
    Rreadlink = 23,
    Tgetattr = 24,
    Rgetattr = 25,
    Tsetattr = 26,
    Rsetattr = 27,
    Treaddir = 40,
    Rreaddir = 41,
    Tfsync = 50,
    Rfsync = 51,
    Tlink = 70,
    Rlink = 71,
    Tmkdir = 72,
    Rmkdir = 73,
    Trenameat = 74,
    Rrenameat = 75,
    Tunlinkat = 76,
    Runlinkat = 77,

    // 9P2000
    Tversion = 100,
    Rversion = 101,
    Tattach = 104,
    Rattach = 105,
    Twalk = 110,
    Rwalk = 111,
    Tread = 116,
    Rread = 117,
    Twrite = 118,
    Rwrite = 119,
    Tclunk = 120,
    Rclunk = 121,
    Tremove = 122,
    Rremove = 123,
}

impl FcallType {
    /// Convert a u8 to FcallType
    pub fn from_u8(v: u8) -> Option<FcallType> {
        match v {
            // 9P2000.L
            7 => Some(FcallType::Rlerror),
            8 => Some(FcallType::Tstatfs),
            9 => Some(FcallType::Rstatfs),
            12 => Some(FcallType::Tlopen),
            13 => Some(FcallType::Rlopen),
            14 => Some(FcallType::Tlcreate),
            15 => Some(FcallType::Rlcreate),
            16 => Some(FcallType::Tsymlink),
            17 => Some(FcallType::Rsymlink),
            22 => Some(FcallType::Treadlink),
            23 => Some(FcallType::Rreadlink),
            24 => Some(FcallType::Tgetattr),
            25 => Some(FcallType::Rgetattr),
            26 => Some(FcallType::Tsetattr),
            27 => Some(FcallType::Rsetattr),
            40 => Some(FcallType::Treaddir),
            41 => Some(FcallType::Rreaddir),
            50 => Some(FcallType::Tfsync),
            51 => Some(FcallType::Rfsync),
            70 => Some(FcallType::Tlink),
            71 => Some(FcallType::Rlink),
            72 => Some(FcallType::Tmkdir),
            73 => Some(FcallType::Rmkdir),
            74 => Some(FcallType::Trenameat),
            75 => Some(FcallType::Rrenameat),
            76 => Some(FcallType::Tunlinkat),
            77 => Some(FcallType::Runlinkat),

            // 9P2000
            100 => Some(FcallType::Tversion),
            101 => Some(FcallType::Rversion),
            104 => Some(FcallType::Tattach),
            105 => Some(FcallType::Rattach),
            110 => Some(FcallType::Twalk),
            111 => Some(FcallType::Rwalk),
            116 => Some(FcallType::Tread),
            117 => Some(FcallType::Rread),
            118 => Some(FcallType::Twrite),
            119 => Some(FcallType::Rwrite),
            120 => Some(FcallType::Tclunk),
            121 => Some(FcallType::Rclunk),
            122 => Some(FcallType::Tremove),
            123 => Some(FcallType::Rremove),
            _ => None,
        }
    }
}

/// Unique identifier for a file
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct Qid {
    pub typ: QidType,
    pub version: u32,
    pub path: u64,
}

/// File system statistics
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
pub struct Statfs {
    pub typ: u32,
    pub bsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub fsid: u64,
    pub namelen: u32,
}

/// Time structure
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
pub struct Time {
    pub sec: u64,
    pub nsec: u64,
}

/// File attributes from an `Rgetattr`
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: Time,
    pub mtime: Time,
    pub ctime: Time,
    pub btime: Time,
    pub generation: u64,
    pub data_version: u64,
}

/// Attributes carried by a `Tsetattr`
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Time,
    pub mtime: Time,
}

/// Directory entry inside an `Rreaddir` payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry<'a> {
    pub qid: Qid,
    /// Opaque server cookie naming the position after this entry
    pub offset: u64,
    pub typ: u8,
    pub name: FcallStr<'a>,
}

impl DirEntry<'_> {
    /// Size of this entry when encoded
    pub fn size(&self) -> usize {
        QID_SIZE + 8 + 1 + 2 + self.name.len()
    }

    /// Append the wire form of this entry to a readdir payload
    pub fn encode_into<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        encode_qid(w, &self.qid)?;
        encode_u64(w, self.offset)?;
        encode_u8(w, self.typ)?;
        encode_str(w, &self.name)
    }
}

/// Lazy decoder for the packed entry stream of an `Rreaddir` payload
///
/// Yields entries until the window is exhausted. A length prefix that
/// crosses the window ends the iteration with [`Error::InvalidInput`];
/// entries already yielded remain valid.
pub struct DirEntryReader<'a> {
    buf: &'a [u8],
}

impl<'a> DirEntryReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        DirEntryReader { buf }
    }

    /// Bytes not yet consumed by the iterator
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

impl<'a> Iterator for DirEntryReader<'a> {
    type Item = Result<DirEntry<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let mut decoder = FcallDecoder { buf: self.buf };
        match decoder.decode_direntry() {
            Ok(entry) => {
                self.buf = decoder.buf;
                Some(Ok(entry))
            }
            Err(e) => {
                // Poison the window so the iterator fuses after an error.
                self.buf = &[];
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// Response/Request structures
// ============================================================================

/// Error response
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct Rlerror {
    pub ecode: u32,
}

/// Version request
#[derive(Clone, Debug)]
pub struct Tversion<'a> {
    pub msize: u32,
    pub version: FcallStr<'a>,
}

impl<'a> Tversion<'a> {
    pub fn clone_static(&'a self) -> Tversion<'static> {
        Tversion {
            msize: self.msize,
            version: self.version.clone_static(),
        }
    }
}

/// Version response
#[derive(Clone, Debug)]
pub struct Rversion<'a> {
    pub msize: u32,
    pub version: FcallStr<'a>,
}

impl<'a> Rversion<'a> {
    pub fn clone_static(&'a self) -> Rversion<'static> {
        Rversion {
            msize: self.msize,
            version: self.version.clone_static(),
        }
    }
}

/// Attach request
#[derive(Clone, Debug)]
pub struct Tattach<'a> {
    pub fid: u32,
    pub afid: u32,
    pub uname: FcallStr<'a>,
    pub aname: FcallStr<'a>,
    pub n_uname: u32,
}

impl Tattach<'_> {
    pub fn clone_static(&self) -> Tattach<'static> {
        Tattach {
            fid: self.fid,
            afid: self.afid,
            n_uname: self.n_uname,
            uname: self.uname.clone_static(),
            aname: self.aname.clone_static(),
        }
    }
}

/// Attach response
#[derive(Clone, Debug, Copy)]
pub struct Rattach {
    pub qid: Qid,
}

/// Walk request
#[derive(Clone, Debug)]
pub struct Twalk<'a> {
    pub fid: u32,
    pub new_fid: u32,
    pub wnames: Vec<FcallStr<'a>>,
}

impl<'a> Twalk<'a> {
    pub fn clone_static(&'a self) -> Twalk<'static> {
        Twalk {
            fid: self.fid,
            new_fid: self.new_fid,
            wnames: self.wnames.iter().map(|n| n.clone_static()).collect(),
        }
    }
}

/// Walk response
///
/// The protocol allows `wqids.len()` to be shorter than the request's name
/// count; the session engine treats that as path resolution failure.
#[derive(Clone, Debug)]
pub struct Rwalk {
    pub wqids: Vec<Qid>,
}

/// Open request
#[derive(Clone, Debug, Copy)]
pub struct Tlopen {
    pub fid: u32,
    pub flags: LOpenFlags,
}

/// Open response
#[derive(Clone, Debug, Copy)]
pub struct Rlopen {
    pub qid: Qid,
    pub iounit: u32,
}

/// Create request
#[derive(Clone, Debug)]
pub struct Tlcreate<'a> {
    pub fid: u32,
    pub name: FcallStr<'a>,
    pub flags: LOpenFlags,
    pub mode: u32,
    pub gid: u32,
}

impl<'a> Tlcreate<'a> {
    pub fn clone_static(&'a self) -> Tlcreate<'static> {
        Tlcreate {
            fid: self.fid,
            flags: self.flags,
            gid: self.gid,
            mode: self.mode,
            name: self.name.clone_static(),
        }
    }
}

/// Create response
#[derive(Clone, Debug, Copy)]
pub struct Rlcreate {
    pub qid: Qid,
    pub iounit: u32,
}

/// Read request
#[derive(Clone, Debug, Copy)]
pub struct Tread {
    pub fid: u32,
    pub offset: u64,
    pub count: u32,
}

/// Read response
#[derive(Clone, Debug)]
pub struct Rread<'a> {
    pub data: Cow<'a, [u8]>,
}

impl<'a> Rread<'a> {
    pub fn clone_static(&'a self) -> Rread<'static> {
        Rread {
            data: Cow::from(self.data.clone().into_owned()),
        }
    }
}

/// Write request
#[derive(Clone, Debug)]
pub struct Twrite<'a> {
    pub fid: u32,
    pub offset: u64,
    pub data: Cow<'a, [u8]>,
}

impl<'a> Twrite<'a> {
    pub fn clone_static(&'a self) -> Twrite<'static> {
        Twrite {
            fid: self.fid,
            offset: self.offset,
            data: Cow::from(self.data.clone().into_owned()),
        }
    }
}

/// Write response
#[derive(Clone, Debug, Copy)]
pub struct Rwrite {
    pub count: u32,
}

/// Clunk request
#[derive(Clone, Debug, Copy)]
pub struct Tclunk {
    pub fid: u32,
}

/// Clunk response
#[derive(Clone, Debug, Copy)]
pub struct Rclunk {}

/// Remove request
#[derive(Clone, Debug, Copy)]
pub struct Tremove {
    pub fid: u32,
}

/// Remove response
#[derive(Clone, Debug, Copy)]
pub struct Rremove {}

/// Getattr request
#[derive(Clone, Debug, Copy)]
pub struct Tgetattr {
    pub fid: u32,
    pub req_mask: GetattrMask,
}

/// Getattr response
#[derive(Clone, Debug, Copy)]
pub struct Rgetattr {
    pub valid: GetattrMask,
    pub qid: Qid,
    pub stat: Stat,
}

/// Setattr request
#[derive(Clone, Debug, Copy)]
pub struct Tsetattr {
    pub fid: u32,
    pub valid: SetattrMask,
    pub stat: SetAttr,
}

/// Setattr response
#[derive(Clone, Debug, Copy)]
pub struct Rsetattr {}

/// Readdir request
#[derive(Clone, Debug, Copy)]
pub struct Treaddir {
    pub fid: u32,
    pub offset: u64,
    pub count: u32,
}

/// Readdir response
///
/// `data` is the raw packed entry window; decode it with
/// [`DirEntryReader`].
#[derive(Clone, Debug)]
pub struct Rreaddir<'a> {
    pub data: Cow<'a, [u8]>,
}

impl<'a> Rreaddir<'a> {
    pub fn clone_static(&'a self) -> Rreaddir<'static> {
        Rreaddir {
            data: Cow::from(self.data.clone().into_owned()),
        }
    }
}

/// Mkdir request
#[derive(Clone, Debug)]
pub struct Tmkdir<'a> {
    pub dfid: u32,
    pub name: FcallStr<'a>,
    pub mode: u32,
    pub gid: u32,
}

impl<'a> Tmkdir<'a> {
    pub fn clone_static(&'a self) -> Tmkdir<'static> {
        Tmkdir {
            dfid: self.dfid,
            gid: self.gid,
            mode: self.mode,
            name: self.name.clone_static(),
        }
    }
}

/// Mkdir response
#[derive(Clone, Debug, Copy)]
pub struct Rmkdir {
    pub qid: Qid,
}

/// Unlinkat request
#[derive(Clone, Debug)]
pub struct Tunlinkat<'a> {
    pub dfid: u32,
    pub name: FcallStr<'a>,
    pub flags: u32,
}

impl<'a> Tunlinkat<'a> {
    pub fn clone_static(&'a self) -> Tunlinkat<'static> {
        Tunlinkat {
            dfid: self.dfid,
            flags: self.flags,
            name: self.name.clone_static(),
        }
    }
}

/// Unlinkat response
#[derive(Clone, Debug, Copy)]
pub struct Runlinkat {}

/// Renameat request
#[derive(Clone, Debug)]
pub struct Trenameat<'a> {
    pub olddfid: u32,
    pub oldname: FcallStr<'a>,
    pub newdfid: u32,
    pub newname: FcallStr<'a>,
}

impl<'a> Trenameat<'a> {
    pub fn clone_static(&'a self) -> Trenameat<'static> {
        Trenameat {
            olddfid: self.olddfid,
            newdfid: self.newdfid,
            oldname: self.oldname.clone_static(),
            newname: self.newname.clone_static(),
        }
    }
}

/// Renameat response
#[derive(Clone, Debug, Copy)]
pub struct Rrenameat {}

/// Statfs request
#[derive(Clone, Debug, Copy)]
pub struct Tstatfs {
    pub fid: u32,
}

/// Statfs response
#[derive(Clone, Debug, Copy)]
pub struct Rstatfs {
    pub statfs: Statfs,
}

/// Fsync request
#[derive(Clone, Debug, Copy)]
pub struct Tfsync {
    pub fid: u32,
    pub datasync: u32,
}

/// Fsync response
#[derive(Clone, Debug, Copy)]
pub struct Rfsync {}

/// Readlink request
#[derive(Clone, Debug, Copy)]
pub struct Treadlink {
    pub fid: u32,
}

/// Readlink response
#[derive(Clone, Debug)]
pub struct Rreadlink<'a> {
    pub target: FcallStr<'a>,
}

impl<'a> Rreadlink<'a> {
    pub fn clone_static(&'a self) -> Rreadlink<'static> {
        Rreadlink {
            target: self.target.clone_static(),
        }
    }
}

/// Symlink request
#[derive(Clone, Debug)]
pub struct Tsymlink<'a> {
    pub fid: u32,
    pub name: FcallStr<'a>,
    pub symtgt: FcallStr<'a>,
    pub gid: u32,
}

impl<'a> Tsymlink<'a> {
    pub fn clone_static(&'a self) -> Tsymlink<'static> {
        Tsymlink {
            fid: self.fid,
            name: self.name.clone_static(),
            symtgt: self.symtgt.clone_static(),
            gid: self.gid,
        }
    }
}

/// Symlink response
#[derive(Clone, Debug, Copy)]
pub struct Rsymlink {
    pub qid: Qid,
}

/// Link request
#[derive(Clone, Debug)]
pub struct Tlink<'a> {
    pub dfid: u32,
    pub fid: u32,
    pub name: FcallStr<'a>,
}

impl<'a> Tlink<'a> {
    pub fn clone_static(&'a self) -> Tlink<'static> {
        Tlink {
            dfid: self.dfid,
            fid: self.fid,
            name: self.name.clone_static(),
        }
    }
}

/// Link response
#[derive(Clone, Debug, Copy)]
pub struct Rlink {}

// ============================================================================
// Fcall enum and conversions
// ============================================================================

/// 9P protocol message
#[derive(Clone, Debug)]
pub enum Fcall<'a> {
    Rlerror(Rlerror),
    Tversion(Tversion<'a>),
    Rversion(Rversion<'a>),
    Tattach(Tattach<'a>),
    Rattach(Rattach),
    Twalk(Twalk<'a>),
    Rwalk(Rwalk),
    Tlopen(Tlopen),
    Rlopen(Rlopen),
    Tlcreate(Tlcreate<'a>),
    Rlcreate(Rlcreate),
    Tread(Tread),
    Rread(Rread<'a>),
    Twrite(Twrite<'a>),
    Rwrite(Rwrite),
    Tclunk(Tclunk),
    Rclunk(Rclunk),
    Tremove(Tremove),
    Rremove(Rremove),
    Tgetattr(Tgetattr),
    Rgetattr(Rgetattr),
    Tsetattr(Tsetattr),
    Rsetattr(Rsetattr),
    Treaddir(Treaddir),
    Rreaddir(Rreaddir<'a>),
    Tmkdir(Tmkdir<'a>),
    Rmkdir(Rmkdir),
    Tunlinkat(Tunlinkat<'a>),
    Runlinkat(Runlinkat),
    Trenameat(Trenameat<'a>),
    Rrenameat(Rrenameat),
    Tstatfs(Tstatfs),
    Rstatfs(Rstatfs),
    Tfsync(Tfsync),
    Rfsync(Rfsync),
    Treadlink(Treadlink),
    Rreadlink(Rreadlink<'a>),
    Tsymlink(Tsymlink<'a>),
    Rsymlink(Rsymlink),
    Tlink(Tlink<'a>),
    Rlink(Rlink),
}

impl Fcall<'_> {
    /// Create a static (owned) copy of this Fcall
    pub fn clone_static(&self) -> Fcall<'static> {
        match self {
            Fcall::Rlerror(v) => Fcall::Rlerror(*v),
            Fcall::Tversion(v) => Fcall::Tversion(v.clone_static()),
            Fcall::Rversion(v) => Fcall::Rversion(v.clone_static()),
            Fcall::Tattach(v) => Fcall::Tattach(v.clone_static()),
            Fcall::Rattach(v) => Fcall::Rattach(*v),
            Fcall::Twalk(v) => Fcall::Twalk(v.clone_static()),
            Fcall::Rwalk(v) => Fcall::Rwalk(v.clone()),
            Fcall::Tlopen(v) => Fcall::Tlopen(*v),
            Fcall::Rlopen(v) => Fcall::Rlopen(*v),
            Fcall::Tlcreate(v) => Fcall::Tlcreate(v.clone_static()),
            Fcall::Rlcreate(v) => Fcall::Rlcreate(*v),
            Fcall::Tread(v) => Fcall::Tread(*v),
            Fcall::Rread(v) => Fcall::Rread(v.clone_static()),
            Fcall::Twrite(v) => Fcall::Twrite(v.clone_static()),
            Fcall::Rwrite(v) => Fcall::Rwrite(*v),
            Fcall::Tclunk(v) => Fcall::Tclunk(*v),
            Fcall::Rclunk(v) => Fcall::Rclunk(*v),
            Fcall::Tremove(v) => Fcall::Tremove(*v),
            Fcall::Rremove(v) => Fcall::Rremove(*v),
            Fcall::Tgetattr(v) => Fcall::Tgetattr(*v),
            Fcall::Rgetattr(v) => Fcall::Rgetattr(*v),
            Fcall::Tsetattr(v) => Fcall::Tsetattr(*v),
            Fcall::Rsetattr(v) => Fcall::Rsetattr(*v),
            Fcall::Treaddir(v) => Fcall::Treaddir(*v),
            Fcall::Rreaddir(v) => Fcall::Rreaddir(v.clone_static()),
            Fcall::Tmkdir(v) => Fcall::Tmkdir(v.clone_static()),
            Fcall::Rmkdir(v) => Fcall::Rmkdir(*v),
            Fcall::Tunlinkat(v) => Fcall::Tunlinkat(v.clone_static()),
            Fcall::Runlinkat(v) => Fcall::Runlinkat(*v),
            Fcall::Trenameat(v) => Fcall::Trenameat(v.clone_static()),
            Fcall::Rrenameat(v) => Fcall::Rrenameat(*v),
            Fcall::Tstatfs(v) => Fcall::Tstatfs(*v),
            Fcall::Rstatfs(v) => Fcall::Rstatfs(*v),
            Fcall::Tfsync(v) => Fcall::Tfsync(*v),
            Fcall::Rfsync(v) => Fcall::Rfsync(*v),
            Fcall::Treadlink(v) => Fcall::Treadlink(*v),
            Fcall::Rreadlink(v) => Fcall::Rreadlink(v.clone_static()),
            Fcall::Tsymlink(v) => Fcall::Tsymlink(v.clone_static()),
            Fcall::Rsymlink(v) => Fcall::Rsymlink(*v),
            Fcall::Tlink(v) => Fcall::Tlink(v.clone_static()),
            Fcall::Rlink(v) => Fcall::Rlink(*v),
        }
    }
}

// Implement From for all message types without borrowed fields
macro_rules! impl_from_for_fcall {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl<'a> From<$ty> for Fcall<'a> {
                fn from(v: $ty) -> Fcall<'a> {
                    Fcall::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_fcall! {
    Rlerror(Rlerror),
    Rattach(Rattach),
    Rwalk(Rwalk),
    Tlopen(Tlopen),
    Rlopen(Rlopen),
    Rlcreate(Rlcreate),
    Tread(Tread),
    Rwrite(Rwrite),
    Tclunk(Tclunk),
    Rclunk(Rclunk),
    Tremove(Tremove),
    Rremove(Rremove),
    Tgetattr(Tgetattr),
    Rgetattr(Rgetattr),
    Tsetattr(Tsetattr),
    Rsetattr(Rsetattr),
    Treaddir(Treaddir),
    Rmkdir(Rmkdir),
    Runlinkat(Runlinkat),
    Rrenameat(Rrenameat),
    Tstatfs(Tstatfs),
    Rstatfs(Rstatfs),
    Tfsync(Tfsync),
    Rfsync(Rfsync),
    Treadlink(Treadlink),
    Rsymlink(Rsymlink),
    Rlink(Rlink),
}

// Message types with borrowed fields need the lifetime tied to the Fcall
macro_rules! impl_from_for_fcall_borrowed {
    ($($variant:ident($ty:ident)),* $(,)?) => {
        $(
            impl<'a> From<$ty<'a>> for Fcall<'a> {
                fn from(v: $ty<'a>) -> Fcall<'a> {
                    Fcall::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_fcall_borrowed! {
    Tversion(Tversion),
    Rversion(Rversion),
    Tattach(Tattach),
    Twalk(Twalk),
    Tlcreate(Tlcreate),
    Rread(Rread),
    Twrite(Twrite),
    Rreaddir(Rreaddir),
    Tmkdir(Tmkdir),
    Tunlinkat(Tunlinkat),
    Trenameat(Trenameat),
    Rreadlink(Rreadlink),
    Tsymlink(Tsymlink),
    Tlink(Tlink),
}

/// Tagged 9P message
#[derive(Clone, Debug)]
pub struct TaggedFcall<'a> {
    pub tag: u16,
    pub fcall: Fcall<'a>,
}

impl<'a> TaggedFcall<'a> {
    /// Encode the message to a buffer
    ///
    /// Four bytes are reserved for `size` up front and back-filled with the
    /// final write position once the body is encoded.
    pub fn encode_to_buf(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.clear();
        buf.resize(4, 0);

        encode_fcall(buf, self.tag, &self.fcall)?;

        let size = u32::try_from(buf.len()).map_err(|_| Error::Overflow)?;
        buf[0..4].copy_from_slice(&size.to_le_bytes());
        Ok(())
    }

    /// Decode a message from a buffer holding one complete message
    pub fn decode(buf: &'a [u8]) -> Result<TaggedFcall<'a>, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidInput);
        }
        let mut decoder = FcallDecoder { buf: &buf[4..] };
        decoder.decode()
    }
}

// ============================================================================
// Encoding functions
// ============================================================================

fn encode_u8<W: Write>(w: &mut W, v: u8) -> Result<(), Error> {
    w.write_all(&[v])
}

fn encode_u16<W: Write>(w: &mut W, v: u16) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes())
}

fn encode_u32<W: Write>(w: &mut W, v: u32) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes())
}

fn encode_u64<W: Write>(w: &mut W, v: u64) -> Result<(), Error> {
    w.write_all(&v.to_le_bytes())
}

fn encode_str<W: Write>(w: &mut W, v: &FcallStr<'_>) -> Result<(), Error> {
    let len = u16::try_from(v.len()).map_err(|_| Error::NameTooLong)?;
    encode_u16(w, len)?;
    w.write_all(v.as_bytes())
}

fn encode_data_buf<W: Write>(w: &mut W, v: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(v.len()).map_err(|_| Error::Overflow)?;
    encode_u32(w, len)?;
    w.write_all(v)
}

fn encode_vec_str<W: Write>(w: &mut W, v: &[FcallStr<'_>]) -> Result<(), Error> {
    encode_u16(w, v.len() as u16)?;
    for s in v {
        encode_str(w, s)?;
    }
    Ok(())
}

fn encode_vec_qid<W: Write>(w: &mut W, v: &[Qid]) -> Result<(), Error> {
    encode_u16(w, v.len() as u16)?;
    for q in v {
        encode_qid(w, q)?;
    }
    Ok(())
}

fn encode_qid<W: Write>(w: &mut W, v: &Qid) -> Result<(), Error> {
    encode_u8(w, v.typ.bits())?;
    encode_u32(w, v.version)?;
    encode_u64(w, v.path)
}

fn encode_statfs<W: Write>(w: &mut W, v: &Statfs) -> Result<(), Error> {
    encode_u32(w, v.typ)?;
    encode_u32(w, v.bsize)?;
    encode_u64(w, v.blocks)?;
    encode_u64(w, v.bfree)?;
    encode_u64(w, v.bavail)?;
    encode_u64(w, v.files)?;
    encode_u64(w, v.ffree)?;
    encode_u64(w, v.fsid)?;
    encode_u32(w, v.namelen)
}

fn encode_time<W: Write>(w: &mut W, v: &Time) -> Result<(), Error> {
    encode_u64(w, v.sec)?;
    encode_u64(w, v.nsec)
}

fn encode_stat<W: Write>(w: &mut W, v: &Stat) -> Result<(), Error> {
    encode_u32(w, v.mode)?;
    encode_u32(w, v.uid)?;
    encode_u32(w, v.gid)?;
    encode_u64(w, v.nlink)?;
    encode_u64(w, v.rdev)?;
    encode_u64(w, v.size)?;
    encode_u64(w, v.blksize)?;
    encode_u64(w, v.blocks)?;
    encode_time(w, &v.atime)?;
    encode_time(w, &v.mtime)?;
    encode_time(w, &v.ctime)?;
    encode_time(w, &v.btime)?;
    encode_u64(w, v.generation)?;
    encode_u64(w, v.data_version)
}

fn encode_setattr<W: Write>(w: &mut W, v: &SetAttr) -> Result<(), Error> {
    encode_u32(w, v.mode)?;
    encode_u32(w, v.uid)?;
    encode_u32(w, v.gid)?;
    encode_u64(w, v.size)?;
    encode_time(w, &v.atime)?;
    encode_time(w, &v.mtime)
}

fn encode_fcall<W: Write>(w: &mut W, tag: u16, fcall: &Fcall<'_>) -> Result<(), Error> {
    match fcall {
        Fcall::Rlerror(v) => {
            encode_u8(w, FcallType::Rlerror as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.ecode)?;
        }
        Fcall::Tversion(v) => {
            encode_u8(w, FcallType::Tversion as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.msize)?;
            encode_str(w, &v.version)?;
        }
        Fcall::Rversion(v) => {
            encode_u8(w, FcallType::Rversion as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.msize)?;
            encode_str(w, &v.version)?;
        }
        Fcall::Tattach(v) => {
            encode_u8(w, FcallType::Tattach as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u32(w, v.afid)?;
            encode_str(w, &v.uname)?;
            encode_str(w, &v.aname)?;
            encode_u32(w, v.n_uname)?;
        }
        Fcall::Rattach(v) => {
            encode_u8(w, FcallType::Rattach as u8)?;
            encode_u16(w, tag)?;
            encode_qid(w, &v.qid)?;
        }
        Fcall::Twalk(v) => {
            encode_u8(w, FcallType::Twalk as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u32(w, v.new_fid)?;
            encode_vec_str(w, &v.wnames)?;
        }
        Fcall::Rwalk(v) => {
            encode_u8(w, FcallType::Rwalk as u8)?;
            encode_u16(w, tag)?;
            encode_vec_qid(w, &v.wqids)?;
        }
        Fcall::Tlopen(v) => {
            encode_u8(w, FcallType::Tlopen as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u32(w, v.flags.bits())?;
        }
        Fcall::Rlopen(v) => {
            encode_u8(w, FcallType::Rlopen as u8)?;
            encode_u16(w, tag)?;
            encode_qid(w, &v.qid)?;
            encode_u32(w, v.iounit)?;
        }
        Fcall::Tlcreate(v) => {
            encode_u8(w, FcallType::Tlcreate as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_str(w, &v.name)?;
            encode_u32(w, v.flags.bits())?;
            encode_u32(w, v.mode)?;
            encode_u32(w, v.gid)?;
        }
        Fcall::Rlcreate(v) => {
            encode_u8(w, FcallType::Rlcreate as u8)?;
            encode_u16(w, tag)?;
            encode_qid(w, &v.qid)?;
            encode_u32(w, v.iounit)?;
        }
        Fcall::Tread(v) => {
            encode_u8(w, FcallType::Tread as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u64(w, v.offset)?;
            encode_u32(w, v.count)?;
        }
        Fcall::Rread(v) => {
            encode_u8(w, FcallType::Rread as u8)?;
            encode_u16(w, tag)?;
            encode_data_buf(w, &v.data)?;
        }
        Fcall::Twrite(v) => {
            encode_u8(w, FcallType::Twrite as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u64(w, v.offset)?;
            encode_data_buf(w, &v.data)?;
        }
        Fcall::Rwrite(v) => {
            encode_u8(w, FcallType::Rwrite as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.count)?;
        }
        Fcall::Tclunk(v) => {
            encode_u8(w, FcallType::Tclunk as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
        }
        Fcall::Rclunk(_) => {
            encode_u8(w, FcallType::Rclunk as u8)?;
            encode_u16(w, tag)?;
        }
        Fcall::Tremove(v) => {
            encode_u8(w, FcallType::Tremove as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
        }
        Fcall::Rremove(_) => {
            encode_u8(w, FcallType::Rremove as u8)?;
            encode_u16(w, tag)?;
        }
        Fcall::Tgetattr(v) => {
            encode_u8(w, FcallType::Tgetattr as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u64(w, v.req_mask.bits())?;
        }
        Fcall::Rgetattr(v) => {
            encode_u8(w, FcallType::Rgetattr as u8)?;
            encode_u16(w, tag)?;
            encode_u64(w, v.valid.bits())?;
            encode_qid(w, &v.qid)?;
            encode_stat(w, &v.stat)?;
        }
        Fcall::Tsetattr(v) => {
            encode_u8(w, FcallType::Tsetattr as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u32(w, v.valid.bits())?;
            encode_setattr(w, &v.stat)?;
        }
        Fcall::Rsetattr(_) => {
            encode_u8(w, FcallType::Rsetattr as u8)?;
            encode_u16(w, tag)?;
        }
        Fcall::Treaddir(v) => {
            encode_u8(w, FcallType::Treaddir as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u64(w, v.offset)?;
            encode_u32(w, v.count)?;
        }
        Fcall::Rreaddir(v) => {
            encode_u8(w, FcallType::Rreaddir as u8)?;
            encode_u16(w, tag)?;
            encode_data_buf(w, &v.data)?;
        }
        Fcall::Tmkdir(v) => {
            encode_u8(w, FcallType::Tmkdir as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.dfid)?;
            encode_str(w, &v.name)?;
            encode_u32(w, v.mode)?;
            encode_u32(w, v.gid)?;
        }
        Fcall::Rmkdir(v) => {
            encode_u8(w, FcallType::Rmkdir as u8)?;
            encode_u16(w, tag)?;
            encode_qid(w, &v.qid)?;
        }
        Fcall::Tunlinkat(v) => {
            encode_u8(w, FcallType::Tunlinkat as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.dfid)?;
            encode_str(w, &v.name)?;
            encode_u32(w, v.flags)?;
        }
        Fcall::Runlinkat(_) => {
            encode_u8(w, FcallType::Runlinkat as u8)?;
            encode_u16(w, tag)?;
        }
        Fcall::Trenameat(v) => {
            encode_u8(w, FcallType::Trenameat as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.olddfid)?;
            encode_str(w, &v.oldname)?;
            encode_u32(w, v.newdfid)?;
            encode_str(w, &v.newname)?;
        }
        Fcall::Rrenameat(_) => {
            encode_u8(w, FcallType::Rrenameat as u8)?;
            encode_u16(w, tag)?;
        }
        Fcall::Tstatfs(v) => {
            encode_u8(w, FcallType::Tstatfs as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
        }
        Fcall::Rstatfs(v) => {
            encode_u8(w, FcallType::Rstatfs as u8)?;
            encode_u16(w, tag)?;
            encode_statfs(w, &v.statfs)?;
        }
        Fcall::Tfsync(v) => {
            encode_u8(w, FcallType::Tfsync as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_u32(w, v.datasync)?;
        }
        Fcall::Rfsync(_) => {
            encode_u8(w, FcallType::Rfsync as u8)?;
            encode_u16(w, tag)?;
        }
        Fcall::Treadlink(v) => {
            encode_u8(w, FcallType::Treadlink as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
        }
        Fcall::Rreadlink(v) => {
            encode_u8(w, FcallType::Rreadlink as u8)?;
            encode_u16(w, tag)?;
            encode_str(w, &v.target)?;
        }
        Fcall::Tsymlink(v) => {
            encode_u8(w, FcallType::Tsymlink as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.fid)?;
            encode_str(w, &v.name)?;
            encode_str(w, &v.symtgt)?;
            encode_u32(w, v.gid)?;
        }
        Fcall::Rsymlink(v) => {
            encode_u8(w, FcallType::Rsymlink as u8)?;
            encode_u16(w, tag)?;
            encode_qid(w, &v.qid)?;
        }
        Fcall::Tlink(v) => {
            encode_u8(w, FcallType::Tlink as u8)?;
            encode_u16(w, tag)?;
            encode_u32(w, v.dfid)?;
            encode_u32(w, v.fid)?;
            encode_str(w, &v.name)?;
        }
        Fcall::Rlink(_) => {
            encode_u8(w, FcallType::Rlink as u8)?;
            encode_u16(w, tag)?;
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

struct FcallDecoder<'b> {
    buf: &'b [u8],
}

impl<'b> FcallDecoder<'b> {
    fn decode_u8(&mut self) -> Result<u8, Error> {
        if let Some(v) = self.buf.first() {
            self.buf = &self.buf[1..];
            Ok(*v)
        } else {
            Err(Error::InvalidInput)
        }
    }

    fn decode_u16(&mut self) -> Result<u16, Error> {
        if self.buf.len() >= 2 {
            let v = u16::from_le_bytes(self.buf[0..2].try_into().unwrap());
            self.buf = &self.buf[2..];
            Ok(v)
        } else {
            Err(Error::InvalidInput)
        }
    }

    fn decode_u32(&mut self) -> Result<u32, Error> {
        if self.buf.len() >= 4 {
            let v = u32::from_le_bytes(self.buf[0..4].try_into().unwrap());
            self.buf = &self.buf[4..];
            Ok(v)
        } else {
            Err(Error::InvalidInput)
        }
    }

    fn decode_u64(&mut self) -> Result<u64, Error> {
        if self.buf.len() >= 8 {
            let v = u64::from_le_bytes(self.buf[0..8].try_into().unwrap());
            self.buf = &self.buf[8..];
            Ok(v)
        } else {
            Err(Error::InvalidInput)
        }
    }

    fn decode_str(&mut self) -> Result<FcallStr<'b>, Error> {
        let n = self.decode_u16()? as usize;
        if self.buf.len() >= n {
            let v = FcallStr::Borrowed(&self.buf[..n]);
            self.buf = &self.buf[n..];
            Ok(v)
        } else {
            Err(Error::InvalidInput)
        }
    }

    fn decode_data_buf(&mut self) -> Result<Cow<'b, [u8]>, Error> {
        let n = self.decode_u32()? as usize;
        if self.buf.len() >= n {
            let v = &self.buf[..n];
            self.buf = &self.buf[n..];
            Ok(Cow::from(v))
        } else {
            Err(Error::InvalidInput)
        }
    }

    fn decode_vec_qid(&mut self) -> Result<Vec<Qid>, Error> {
        let len = self.decode_u16()?;
        let mut v = Vec::with_capacity(len as usize);
        for _ in 0..len {
            v.push(self.decode_qid()?);
        }
        Ok(v)
    }

    fn decode_qid(&mut self) -> Result<Qid, Error> {
        Ok(Qid {
            typ: QidType::from_bits_truncate(self.decode_u8()?),
            version: self.decode_u32()?,
            path: self.decode_u64()?,
        })
    }

    fn decode_statfs(&mut self) -> Result<Statfs, Error> {
        Ok(Statfs {
            typ: self.decode_u32()?,
            bsize: self.decode_u32()?,
            blocks: self.decode_u64()?,
            bfree: self.decode_u64()?,
            bavail: self.decode_u64()?,
            files: self.decode_u64()?,
            ffree: self.decode_u64()?,
            fsid: self.decode_u64()?,
            namelen: self.decode_u32()?,
        })
    }

    fn decode_time(&mut self) -> Result<Time, Error> {
        Ok(Time {
            sec: self.decode_u64()?,
            nsec: self.decode_u64()?,
        })
    }

    fn decode_stat(&mut self) -> Result<Stat, Error> {
        Ok(Stat {
            mode: self.decode_u32()?,
            uid: self.decode_u32()?,
            gid: self.decode_u32()?,
            nlink: self.decode_u64()?,
            rdev: self.decode_u64()?,
            size: self.decode_u64()?,
            blksize: self.decode_u64()?,
            blocks: self.decode_u64()?,
            atime: self.decode_time()?,
            mtime: self.decode_time()?,
            ctime: self.decode_time()?,
            btime: self.decode_time()?,
            generation: self.decode_u64()?,
            data_version: self.decode_u64()?,
        })
    }

    fn decode_setattr(&mut self) -> Result<SetAttr, Error> {
        Ok(SetAttr {
            mode: self.decode_u32()?,
            uid: self.decode_u32()?,
            gid: self.decode_u32()?,
            size: self.decode_u64()?,
            atime: self.decode_time()?,
            mtime: self.decode_time()?,
        })
    }

    fn decode_direntry(&mut self) -> Result<DirEntry<'b>, Error> {
        Ok(DirEntry {
            qid: self.decode_qid()?,
            offset: self.decode_u64()?,
            typ: self.decode_u8()?,
            name: self.decode_str()?,
        })
    }

    fn decode(&mut self) -> Result<TaggedFcall<'b>, Error> {
        let msg_type = FcallType::from_u8(self.decode_u8()?);
        let tag = self.decode_u16()?;
        let fcall = match msg_type {
            Some(FcallType::Rlerror) => Fcall::Rlerror(Rlerror {
                ecode: self.decode_u32()?,
            }),
            Some(FcallType::Tversion) => Fcall::Tversion(Tversion {
                msize: self.decode_u32()?,
                version: self.decode_str()?,
            }),
            Some(FcallType::Rversion) => Fcall::Rversion(Rversion {
                msize: self.decode_u32()?,
                version: self.decode_str()?,
            }),
            Some(FcallType::Tattach) => Fcall::Tattach(Tattach {
                fid: self.decode_u32()?,
                afid: self.decode_u32()?,
                uname: self.decode_str()?,
                aname: self.decode_str()?,
                n_uname: self.decode_u32()?,
            }),
            Some(FcallType::Rattach) => Fcall::Rattach(Rattach {
                qid: self.decode_qid()?,
            }),
            Some(FcallType::Twalk) => Fcall::Twalk(Twalk {
                fid: self.decode_u32()?,
                new_fid: self.decode_u32()?,
                wnames: {
                    let len = self.decode_u16()?;
                    let mut wnames = Vec::with_capacity(len as usize);
                    for _ in 0..len {
                        wnames.push(self.decode_str()?);
                    }
                    wnames
                },
            }),
            Some(FcallType::Rwalk) => Fcall::Rwalk(Rwalk {
                wqids: self.decode_vec_qid()?,
            }),
            Some(FcallType::Tlopen) => Fcall::Tlopen(Tlopen {
                fid: self.decode_u32()?,
                flags: LOpenFlags::from_bits_truncate(self.decode_u32()?),
            }),
            Some(FcallType::Rlopen) => Fcall::Rlopen(Rlopen {
                qid: self.decode_qid()?,
                iounit: self.decode_u32()?,
            }),
            Some(FcallType::Tlcreate) => Fcall::Tlcreate(Tlcreate {
                fid: self.decode_u32()?,
                name: self.decode_str()?,
                flags: LOpenFlags::from_bits_truncate(self.decode_u32()?),
                mode: self.decode_u32()?,
                gid: self.decode_u32()?,
            }),
            Some(FcallType::Rlcreate) => Fcall::Rlcreate(Rlcreate {
                qid: self.decode_qid()?,
                iounit: self.decode_u32()?,
            }),
            Some(FcallType::Tread) => Fcall::Tread(Tread {
                fid: self.decode_u32()?,
                offset: self.decode_u64()?,
                count: self.decode_u32()?,
            }),
            Some(FcallType::Rread) => Fcall::Rread(Rread {
                data: self.decode_data_buf()?,
            }),
            Some(FcallType::Twrite) => Fcall::Twrite(Twrite {
                fid: self.decode_u32()?,
                offset: self.decode_u64()?,
                data: self.decode_data_buf()?,
            }),
            Some(FcallType::Rwrite) => Fcall::Rwrite(Rwrite {
                count: self.decode_u32()?,
            }),
            Some(FcallType::Tclunk) => Fcall::Tclunk(Tclunk {
                fid: self.decode_u32()?,
            }),
            Some(FcallType::Rclunk) => Fcall::Rclunk(Rclunk {}),
            Some(FcallType::Tremove) => Fcall::Tremove(Tremove {
                fid: self.decode_u32()?,
            }),
            Some(FcallType::Rremove) => Fcall::Rremove(Rremove {}),
            Some(FcallType::Tgetattr) => Fcall::Tgetattr(Tgetattr {
                fid: self.decode_u32()?,
                req_mask: GetattrMask::from_bits_truncate(self.decode_u64()?),
            }),
            Some(FcallType::Rgetattr) => Fcall::Rgetattr(Rgetattr {
                valid: GetattrMask::from_bits_truncate(self.decode_u64()?),
                qid: self.decode_qid()?,
                stat: self.decode_stat()?,
            }),
            Some(FcallType::Tsetattr) => Fcall::Tsetattr(Tsetattr {
                fid: self.decode_u32()?,
                valid: SetattrMask::from_bits_truncate(self.decode_u32()?),
                stat: self.decode_setattr()?,
            }),
            Some(FcallType::Rsetattr) => Fcall::Rsetattr(Rsetattr {}),
            Some(FcallType::Treaddir) => Fcall::Treaddir(Treaddir {
                fid: self.decode_u32()?,
                offset: self.decode_u64()?,
                count: self.decode_u32()?,
            }),
            Some(FcallType::Rreaddir) => Fcall::Rreaddir(Rreaddir {
                data: self.decode_data_buf()?,
            }),
            Some(FcallType::Tmkdir) => Fcall::Tmkdir(Tmkdir {
                dfid: self.decode_u32()?,
                name: self.decode_str()?,
                mode: self.decode_u32()?,
                gid: self.decode_u32()?,
            }),
            Some(FcallType::Rmkdir) => Fcall::Rmkdir(Rmkdir {
                qid: self.decode_qid()?,
            }),
            Some(FcallType::Tunlinkat) => Fcall::Tunlinkat(Tunlinkat {
                dfid: self.decode_u32()?,
                name: self.decode_str()?,
                flags: self.decode_u32()?,
            }),
            Some(FcallType::Runlinkat) => Fcall::Runlinkat(Runlinkat {}),
            Some(FcallType::Trenameat) => Fcall::Trenameat(Trenameat {
                olddfid: self.decode_u32()?,
                oldname: self.decode_str()?,
                newdfid: self.decode_u32()?,
                newname: self.decode_str()?,
            }),
            Some(FcallType::Rrenameat) => Fcall::Rrenameat(Rrenameat {}),
            Some(FcallType::Tstatfs) => Fcall::Tstatfs(Tstatfs {
                fid: self.decode_u32()?,
            }),
            Some(FcallType::Rstatfs) => Fcall::Rstatfs(Rstatfs {
                statfs: self.decode_statfs()?,
            }),
            Some(FcallType::Tfsync) => Fcall::Tfsync(Tfsync {
                fid: self.decode_u32()?,
                datasync: self.decode_u32()?,
            }),
            Some(FcallType::Rfsync) => Fcall::Rfsync(Rfsync {}),
            Some(FcallType::Treadlink) => Fcall::Treadlink(Treadlink {
                fid: self.decode_u32()?,
            }),
            Some(FcallType::Rreadlink) => Fcall::Rreadlink(Rreadlink {
                target: self.decode_str()?,
            }),
            Some(FcallType::Tsymlink) => Fcall::Tsymlink(Tsymlink {
                fid: self.decode_u32()?,
                name: self.decode_str()?,
                symtgt: self.decode_str()?,
                gid: self.decode_u32()?,
            }),
            Some(FcallType::Rsymlink) => Fcall::Rsymlink(Rsymlink {
                qid: self.decode_qid()?,
            }),
            Some(FcallType::Tlink) => Fcall::Tlink(Tlink {
                dfid: self.decode_u32()?,
                fid: self.decode_u32()?,
                name: self.decode_str()?,
            }),
            Some(FcallType::Rlink) => Fcall::Rlink(Rlink {}),
            None => return Err(Error::InvalidInput),
        };
        Ok(TaggedFcall { tag, fcall })
    }
}

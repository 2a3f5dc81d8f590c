// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Mount glue: option parsing and the transport registry
//!
//! Transport drivers register an instance under a mount tag at probe
//! time; `mount` looks the tag up in the mount-argument string, claims
//! the transport for exclusive use by one session and drives session
//! setup. Options are a comma-separated `key=value` list with keys
//! `tag` (required), `aname` and `msize`; unrecognized keys are ignored.

use alloc::boxed::Box;
use alloc::string::{String, ToString};

use log::{debug, warn};
use spin::Mutex;

use crate::fs::Filesystem;
use crate::transport::Transport;
use crate::Error;

/// Smallest negotiable message size
pub const MIN_MSIZE: u32 = 8192;

/// Largest negotiable message size
pub const MAX_MSIZE: u32 = 65536;

/// Proposed message size when the mount string does not override it
pub const DEFAULT_MSIZE: u32 = 8192;

/// Fixed registry capacity; one slot per probed transport
const MAX_TRANSPORTS: usize = 8;

/// Parsed mount-argument string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountOptions {
    /// Mount tag selecting the registered transport
    pub tag: String,
    /// 9P attach name presented to the server
    pub aname: String,
    /// Proposed msize, clamped to `MIN_MSIZE..=MAX_MSIZE`
    pub msize: u32,
}

impl MountOptions {
    /// Parse `key=value[,key=value]*`
    ///
    /// A missing `tag` fails with [`Error::InvalidInput`]; a valueless or
    /// unparsable `msize` keeps the default.
    pub fn parse(args: &str) -> Result<Self, Error> {
        let mut tag = None;
        let mut aname = String::new();
        let mut msize = DEFAULT_MSIZE;

        for opt in args.split(',') {
            let opt = opt.trim();
            if opt.is_empty() {
                continue;
            }
            let (key, value) = match opt.split_once('=') {
                Some(kv) => kv,
                None => (opt, ""),
            };
            match key {
                "tag" => tag = Some(value.to_string()),
                "aname" => aname = value.to_string(),
                "msize" => {
                    if let Ok(v) = value.parse::<u32>() {
                        msize = v.clamp(MIN_MSIZE, MAX_MSIZE);
                    }
                }
                _ => {}
            }
        }

        let tag = tag.filter(|t| !t.is_empty()).ok_or(Error::InvalidInput)?;
        Ok(MountOptions { tag, aname, msize })
    }
}

struct Slot {
    tag: String,
    transport: Box<dyn Transport>,
}

static REGISTRY: Mutex<[Option<Slot>; MAX_TRANSPORTS]> =
    Mutex::new([const { None }; MAX_TRANSPORTS]);

/// Register a transport under a mount tag
///
/// Called by a transport driver at device-probe time. Fails with
/// [`Error::TooManyOpenFiles`] when every slot is taken.
pub fn register_transport(tag: &str, transport: Box<dyn Transport>) -> Result<(), Error> {
    if tag.is_empty() {
        return Err(Error::InvalidInput);
    }
    let mut registry = REGISTRY.lock();
    for slot in registry.iter_mut() {
        if slot.is_none() {
            debug!("registered transport for tag {tag:?}");
            *slot = Some(Slot {
                tag: tag.to_string(),
                transport,
            });
            return Ok(());
        }
    }
    warn!("transport registry full, dropping tag {tag:?}");
    Err(Error::TooManyOpenFiles)
}

/// Remove a registered transport by tag, returning it if present
pub fn unregister_transport(tag: &str) -> Option<Box<dyn Transport>> {
    let mut registry = REGISTRY.lock();
    for slot in registry.iter_mut() {
        if slot.as_ref().is_some_and(|s| s.tag == tag) {
            debug!("unregistered transport for tag {tag:?}");
            return slot.take().map(|s| s.transport);
        }
    }
    None
}

/// Claim a registered transport for exclusive use by one session
///
/// The slot is emptied: a transport serves at most one session, enforced
/// here by ownership transfer.
fn claim_transport(tag: &str) -> Option<Box<dyn Transport>> {
    unregister_transport(tag)
}

/// Mount the filesystem named by a mount-argument string
///
/// Parses the options, claims the transport registered under `tag`,
/// negotiates `min(msize, transport capability)` and attaches to `aname`.
pub fn mount(args: &str, read_only: bool) -> Result<Filesystem<Box<dyn Transport>>, Error> {
    let options = MountOptions::parse(args)?;
    let transport = claim_transport(&options.tag).ok_or_else(|| {
        warn!("no transport registered for tag {:?}", options.tag);
        Error::DeviceNotReady
    })?;

    let msize = options.msize.min(transport.max_msize());
    debug!(
        "mounting tag {:?} via {} (msize {msize})",
        options.tag,
        transport.name()
    );
    Filesystem::new(transport, msize, &options.aname, read_only)
}

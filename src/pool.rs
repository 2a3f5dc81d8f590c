// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Recyclable handle pools backed by bitmaps
//!
//! The fid and tag namespaces are both managed by [`HandlePool`]: a
//! fixed-capacity bitmap with wrap-around scanning from a rotating hint for
//! O(n/64) amortized allocation and O(1) release. [`FidPool`] and
//! [`TagPool`] wrap it behind a lock and pin down the protocol-reserved
//! values.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::fcall::{Fid, NOTAG};

/// Default capacity of the fid and tag pools
pub const DEFAULT_POOL_CAPACITY: u32 = 256;

/// A fixed-capacity pool of recyclable `u32` handles.
///
/// Each handle is tracked by a single bit (set means in-use, clear means
/// free). Allocation scans from the position after the last allocation,
/// wrapping around word-at-a-time.
pub struct HandlePool {
    /// Bitmap: bit set = handle in use.
    /// Word `w`, bit `b` → handle `w * 64 + b`.
    bitmap: Vec<u64>,
    /// Last allocated handle; the next scan starts from `hint + 1`.
    /// `u32::MAX` before the first allocation, causing the scan to start
    /// at 0.
    hint: u32,
    /// Number of handles the pool tracks (`0..capacity`).
    capacity: u32,
}

impl HandlePool {
    /// Create a pool tracking handles `0..capacity`.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let words = (capacity as usize).div_ceil(64);
        HandlePool {
            bitmap: vec![0u64; words],
            hint: u32::MAX,
            capacity,
        }
    }

    /// Allocate the next available handle.
    ///
    /// Returns `None` when every handle is in use.
    pub fn allocate(&mut self) -> Option<u32> {
        let cap = self.capacity;
        if cap == 0 {
            return None;
        }
        let start = if self.hint >= cap - 1 { 0 } else { self.hint + 1 };
        self.find_free(start, cap)
    }

    /// Mark a handle as free so it can be reused.
    ///
    /// Releasing an out-of-range or already-free handle is a no-op.
    pub fn release(&mut self, handle: u32) {
        if handle >= self.capacity {
            return;
        }
        let word = handle as usize / 64;
        let bit = handle % 64;
        self.bitmap[word] &= !(1u64 << bit);
    }

    /// Number of handles currently allocated.
    pub fn in_use(&self) -> u32 {
        self.bitmap.iter().map(|w| w.count_ones()).sum()
    }

    /// Whether a handle is currently allocated.
    pub fn is_allocated(&self, handle: u32) -> bool {
        if handle >= self.capacity {
            return false;
        }
        self.bitmap[handle as usize / 64] & (1u64 << (handle % 64)) != 0
    }

    /// Scan for a free handle starting at `start`, wrapping around through
    /// `cap` total handles.
    fn find_free(&mut self, start: u32, cap: u32) -> Option<u32> {
        debug_assert!(cap > 0 && start < cap);

        let n = self.bitmap.len();
        let s_word = start as usize / 64;
        let s_bit = start % 64;

        // Scan words in order: s_word, s_word+1, ..., n-1, 0, ..., s_word.
        // First visit of s_word considers only bits >= s_bit; the final
        // wrap to s_word (i == n) considers only bits < s_bit.
        for i in 0..=n {
            let wi = (s_word + i) % n;

            let occupied_mask = if i == 0 && s_bit > 0 {
                (1u64 << s_bit) - 1
            } else if i == n {
                if s_bit == 0 {
                    // Already fully scanned on the first visit
                    continue;
                }
                !((1u64 << s_bit) - 1)
            } else {
                0
            };

            let masked = self.bitmap[wi] | occupied_mask;
            if masked == u64::MAX {
                continue;
            }

            let bit = (!masked).trailing_zeros();
            let handle = wi as u32 * 64 + bit;
            if handle < cap {
                self.bitmap[wi] |= 1u64 << bit;
                self.hint = handle;
                return Some(handle);
            }
        }

        None
    }
}

/// Fid allocator with thread-safe access
///
/// The first fid handed out after init is reserved by the session for the
/// root attach.
pub struct FidPool {
    inner: Mutex<HandlePool>,
}

impl Default for FidPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl FidPool {
    /// Create a fid pool tracking `capacity` fids
    pub fn new(capacity: u32) -> Self {
        FidPool {
            inner: Mutex::new(HandlePool::new(capacity)),
        }
    }

    /// Allocate a fid; `None` when the namespace is exhausted
    pub fn allocate(&self) -> Option<Fid> {
        self.inner.lock().allocate()
    }

    /// Release a fid for reuse
    pub fn release(&self, fid: Fid) {
        self.inner.lock().release(fid);
    }

    /// Number of fids currently allocated
    pub fn in_use(&self) -> u32 {
        self.inner.lock().in_use()
    }
}

/// Tag allocator with thread-safe access
///
/// `NOTAG` is reserved for the version handshake and never handed out;
/// the capacity is clamped below it.
pub struct TagPool {
    inner: Mutex<HandlePool>,
}

impl Default for TagPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl TagPool {
    /// Create a tag pool tracking `capacity` tags
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.min(NOTAG as u32);
        TagPool {
            inner: Mutex::new(HandlePool::new(capacity)),
        }
    }

    /// Allocate a tag; `None` when every tag is held by an outstanding
    /// request
    pub fn allocate(&self) -> Option<u16> {
        self.inner.lock().allocate().map(|tag| tag as u16)
    }

    /// Release a tag for reuse
    pub fn release(&self, tag: u16) {
        if tag == NOTAG {
            return;
        }
        self.inner.lock().release(tag as u32);
    }

    /// Number of tags currently held
    pub fn in_use(&self) -> u32 {
        self.inner.lock().in_use()
    }
}

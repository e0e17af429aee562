//! Raw CDBUS frames and the shared frame store.
//!
//! A frame is the bus-layer unit: `[src_mac, dst_mac, len]` followed by up
//! to 253 payload bytes. CRC and byte framing belong to the driver and
//! never reach this crate.
//!
//! [`FramePool`] is the one structure in the stack that may be touched
//! from interrupt context: drivers refill the receive side and drain the
//! transmit side from their IRQ handlers, so every operation runs under a
//! [`BlockingMutex`] over a caller-chosen [`ScopedRawMutex`]. Everything
//! above this boundary is single-threaded and unlocked.

use heapless::Deque;
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

/// Fixed frame capacity: 3-byte bus header plus 253 payload bytes.
pub const FRAME_MAX: usize = 256;

/// Offset of the payload within a frame buffer.
pub const FRAME_HDR: usize = 3;

/// One bus frame. Ownership is singular: a frame is always held by
/// exactly one of pool, driver or codec, and moves by value.
#[derive(Clone)]
pub struct RawFrame {
    pub dat: [u8; FRAME_MAX],
}

// ---- impl RawFrame ----

impl RawFrame {
    pub const fn new() -> Self {
        Self {
            dat: [0; FRAME_MAX],
        }
    }

    #[inline]
    pub fn src_mac(&self) -> u8 {
        self.dat[0]
    }

    #[inline]
    pub fn dst_mac(&self) -> u8 {
        self.dat[1]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dat[2] as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dat[2] == 0
    }

    /// The CDNET payload (everything after the bus header).
    #[inline]
    pub fn payload(&self) -> &[u8] {
        let end = FRAME_HDR + self.len().min(FRAME_MAX - FRAME_HDR);
        &self.dat[FRAME_HDR..end]
    }

    pub fn set_header(&mut self, src_mac: u8, dst_mac: u8, len: usize) {
        debug_assert!(len <= FRAME_MAX - FRAME_HDR);
        self.dat[0] = src_mac;
        self.dat[1] = dst_mac;
        self.dat[2] = len as u8;
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::new()
    }
}

struct PoolInner<const N: usize> {
    free: Deque<RawFrame, N>,
    /// Frames handed out before the free list ever saw them. Lets `new()`
    /// stay const without pre-filling N buffers.
    spawned: usize,
}

/// A bounded store of [`RawFrame`]s shared between a driver and the
/// protocol engine.
pub struct FramePool<R: ScopedRawMutex, const N: usize> {
    inner: BlockingMutex<R, PoolInner<N>>,
}

// ---- impl FramePool ----

impl<R, const N: usize> FramePool<R, N>
where
    R: ScopedRawMutex + ConstInit,
{
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(PoolInner {
                free: Deque::new(),
                spawned: 0,
            }),
        }
    }
}

impl<R, const N: usize> FramePool<R, N>
where
    R: ScopedRawMutex,
{
    /// Take a free frame, or `None` when all `N` are in flight.
    pub fn alloc(&self) -> Option<RawFrame> {
        self.inner.with_lock(|inner| {
            if let Some(f) = inner.free.pop_front() {
                return Some(f);
            }
            if inner.spawned < N {
                inner.spawned += 1;
                return Some(RawFrame::new());
            }
            None
        })
    }

    /// Return a frame. Never fails: at most `N` frames exist.
    pub fn free(&self, frame: RawFrame) {
        self.inner.with_lock(|inner| {
            let _ = inner.free.push_back(frame);
        });
    }

    /// Number of frames immediately available.
    pub fn free_count(&self) -> usize {
        self.inner
            .with_lock(|inner| inner.free.len() + (N - inner.spawned))
    }
}

impl<R, const N: usize> Default for FramePool<R, N>
where
    R: ScopedRawMutex + ConstInit,
{
    fn default() -> Self {
        Self::new()
    }
}

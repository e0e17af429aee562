//! An in-memory frame device pair.
//!
//! Two [`LoopbackDev`] handles share one [`LoopbackCore`]: whatever side
//! A transmits, side B receives, and vice versa. Frames come from a
//! single shared [`FramePool`], so pool pressure behaves like a real
//! driver's. Used by the integration tests to wire two stacks
//! back-to-back; also handy for bring-up of application code before a
//! bus exists.
//!
//! Like the structures it is built from, the core is all `BlockingMutex`
//! guarded and usable from a `static`.

use heapless::Deque;
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

use crate::{FramePool, RawFrame};

use super::FrameDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

pub struct LoopbackCore<R: ScopedRawMutex, const N: usize> {
    pool: FramePool<R, N>,
    a_to_b: BlockingMutex<R, Deque<RawFrame, N>>,
    b_to_a: BlockingMutex<R, Deque<RawFrame, N>>,
}

// ---- impl LoopbackCore ----

impl<R, const N: usize> LoopbackCore<R, N>
where
    R: ScopedRawMutex + ConstInit,
{
    pub const fn new() -> Self {
        Self {
            pool: FramePool::new(),
            a_to_b: BlockingMutex::new(Deque::new()),
            b_to_a: BlockingMutex::new(Deque::new()),
        }
    }
}

impl<R, const N: usize> LoopbackCore<R, N>
where
    R: ScopedRawMutex,
{
    /// The two endpoints of the link.
    pub fn split(&self) -> (LoopbackDev<'_, R, N>, LoopbackDev<'_, R, N>) {
        (
            LoopbackDev {
                core: self,
                side: Side::A,
            },
            LoopbackDev {
                core: self,
                side: Side::B,
            },
        )
    }
}

impl<R, const N: usize> Default for LoopbackCore<R, N>
where
    R: ScopedRawMutex + ConstInit,
{
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoopbackDev<'a, R: ScopedRawMutex, const N: usize> {
    core: &'a LoopbackCore<R, N>,
    side: Side,
}

// ---- impl LoopbackDev ----

impl<R, const N: usize> FrameDevice for LoopbackDev<'_, R, N>
where
    R: ScopedRawMutex,
{
    fn alloc(&mut self) -> Option<RawFrame> {
        self.core.pool.alloc()
    }

    fn pop_rx(&mut self) -> Option<RawFrame> {
        let q = match self.side {
            Side::A => &self.core.b_to_a,
            Side::B => &self.core.a_to_b,
        };
        q.with_lock(|q| q.pop_front())
    }

    fn free(&mut self, frame: RawFrame) {
        self.core.pool.free(frame);
    }

    fn push_tx(&mut self, frame: RawFrame) {
        let q = match self.side {
            Side::A => &self.core.a_to_b,
            Side::B => &self.core.b_to_a,
        };
        // A full link queue behaves like a collision-lost frame.
        if let Err(frame) = q.with_lock(|q| q.push_back(frame)) {
            self.core.pool.free(frame);
        }
    }

    fn set_filter(&mut self, _mac: u8) {}
}

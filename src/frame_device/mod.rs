//! The Frame Device
//!
//! The stack is generic over a "frame device": the driver-side object that
//! owns the physical link and its frame buffers. The bus controller chip
//! driver, the bit-banged UART-bus driver and the test loopback all sit
//! behind this one trait; the protocol engine stays agnostic.
//!
//! The contract is four buffer hand-offs plus link configuration. All
//! calls are non-blocking: `None` from [`alloc`]/[`pop_rx`] means "nothing
//! right now, poll again later". A driver that fills or drains its queues
//! from interrupt context is expected to guard them itself — the provided
//! [`FramePool`] does exactly that.
//!
//! Ownership of a [`RawFrame`] transfers on every call: a frame given to
//! [`push_tx`] or [`free`] is gone, a frame returned by [`alloc`] or
//! [`pop_rx`] is the caller's to release exactly once.
//!
//! [`alloc`]: FrameDevice::alloc
//! [`pop_rx`]: FrameDevice::pop_rx
//! [`push_tx`]: FrameDevice::push_tx
//! [`free`]: FrameDevice::free
//! [`FramePool`]: crate::FramePool

use crate::RawFrame;

pub mod loopback;
pub mod null;

pub trait ConstInit {
    const INIT: Self;
}

pub trait FrameDevice {
    /// Take a free frame buffer, if one is available.
    fn alloc(&mut self) -> Option<RawFrame>;

    /// Dequeue the next received frame.
    fn pop_rx(&mut self) -> Option<RawFrame>;

    /// Return a frame buffer to the free store.
    fn free(&mut self, frame: RawFrame);

    /// Hand a frame to the driver for transmission.
    fn push_tx(&mut self, frame: RawFrame);

    /// Configure the receive address filter (the local mac).
    fn set_filter(&mut self, mac: u8);

    /// Configure the bus bit rates (idle, data).
    fn set_bit_rate(&mut self, low: u32, high: u32) {
        let _ = (low, high);
    }

    fn bit_rate(&self) -> (u32, u32) {
        (115_200, 115_200)
    }
}

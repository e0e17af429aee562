//! A frame device connected to nothing: no buffers, no link. Useful as a
//! placeholder interface while only local delivery is exercised.

use crate::RawFrame;

use super::{ConstInit, FrameDevice};

#[derive(Debug)]
pub struct NullFrameDevice {
    _priv: (),
}

impl NullFrameDevice {
    pub const fn new() -> Self {
        Self { _priv: () }
    }
}

impl Default for NullFrameDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstInit for NullFrameDevice {
    const INIT: Self = Self { _priv: () };
}

impl FrameDevice for NullFrameDevice {
    fn alloc(&mut self) -> Option<RawFrame> {
        None
    }

    fn pop_rx(&mut self) -> Option<RawFrame> {
        None
    }

    fn free(&mut self, _frame: RawFrame) {}

    fn push_tx(&mut self, _frame: RawFrame) {}

    fn set_filter(&mut self, _mac: u8) {}
}

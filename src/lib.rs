#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod address;
pub mod frame;
pub mod frame_device;
pub mod net_stack;
pub mod packet;
pub mod seq;
pub mod socket;
pub mod wire_frames;

pub use address::Addr;
pub use frame::{FramePool, RawFrame, FRAME_MAX};
pub use frame_device::FrameDevice;
pub use net_stack::{NetStack, SendError, SendOpts};
pub use packet::{Packet, PktHandle};
pub use socket::{BindError, SocketHandle};

/// The "unspecified" port sentinel.
///
/// A port equal to this value is never carried on the wire; it marks the
/// side of a port pair that a given header layout leaves implicit.
pub const DEF_PORT: u16 = 0xCDCD;

/// Local mac sentinel: address not yet assigned, receive promiscuously.
pub const MAC_UNSET: u8 = 0xFF;

/// Bus broadcast mac (frame destination).
pub const MAC_BCAST: u8 = 0xFF;

/// Largest packet payload, in bytes. One more byte of header makes a
/// full-size L0 reply exactly fill a frame.
pub const MAX_DAT: usize = 252;

/// Ticks (milliseconds) without an ack before a port-0 check is sent.
pub const SEQ_TIMEOUT_MS: u32 = 5;

/// Every n-th sequenced data packet requests an immediate ack.
pub const SEQ_TX_ACK_CNT: u8 = 3;

/// Unanswered port-0 retries tolerated before the peer record is flushed.
pub const SEQ_TX_RETRY_MAX: u8 = 3;

/// Sent-but-unacknowledged window per peer.
pub const SEQ_TX_PEND_MAX: usize = 6;

/// Packet arena size. Everything downstream (queues, wait lists) is sized
/// so the arena can never be oversubscribed.
pub const PACKET_POOL_SIZE: usize = 16;

/// Socket table size.
pub const SOCKETS_MAX: usize = 8;

/// Per-socket inbound queue depth.
pub const SOCK_RX_MAX: usize = 8;

/// Outbound peer records per interface.
pub const SEQ_TX_RECS: usize = 4;

/// Inbound peer records per interface.
pub const SEQ_RX_RECS: usize = 8;

/// Interfaces per stack.
pub const IFACES_MAX: usize = 2;

/// Ephemeral "request" port range, allocated by [`NetStack::bind_ephemeral`].
pub const EPHEMERAL_FIRST: u16 = 0xF000;
pub const EPHEMERAL_LAST: u16 = 0xFFFE;

/// Wire-format level. Distinguished purely by the top bits of the first
/// payload byte, so a decoder needs no side context to classify a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Minimal header, single-net, ports up to 63, no sequencing.
    L0,
    /// Explicit header: multi modes, optional sequencing, variable-width ports.
    L1,
    /// Fragmentable payloads, mandatory sequencing, no port bytes.
    L2,
}

/// L1 addressing mode: which address bytes are carried explicitly versus
/// implied by the bus frame's own src/dst mac fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multi {
    None,
    /// Destination is a 16-bit multicast group id.
    Cast,
    /// Cross-net unicast: full src/dst net+mac carried explicitly.
    Net,
    /// Cross-net multicast.
    CastNet,
}

impl Multi {
    pub(crate) fn from_bits(net: bool, cast: bool) -> Self {
        match (net, cast) {
            (false, false) => Multi::None,
            (false, true) => Multi::Cast,
            (true, false) => Multi::Net,
            (true, true) => Multi::CastNet,
        }
    }

    #[inline]
    pub fn is_cast(&self) -> bool {
        matches!(self, Multi::Cast | Multi::CastNet)
    }

    #[inline]
    pub fn is_net(&self) -> bool {
        matches!(self, Multi::Net | Multi::CastNet)
    }
}

/// L2 fragmentation state, two header bits. Reassembly order comes from
/// the sequence number; there is no separate fragment index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frag {
    None,
    First,
    More,
    Last,
}

impl Frag {
    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Frag::None => 0b00,
            Frag::First => 0b01,
            Frag::More => 0b10,
            Frag::Last => 0b11,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Frag::None,
            0b01 => Frag::First,
            0b10 => Frag::More,
            _ => Frag::Last,
        }
    }
}

/// Diagnostic counters. Every drop path increments exactly one of these;
/// nothing else is surfaced to the application on loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    /// Frames taken from the device receive queue.
    pub rx_frames: u32,
    /// Frames handed to the device transmit queue.
    pub tx_frames: u32,
    /// Frames rejected by the wire codec.
    pub rx_fmt_err: u32,
    /// Receive deferred: packet arena exhausted.
    pub rx_no_pkt: u32,
    /// Decoded packet had no matching socket.
    pub rx_no_sock: u32,
    /// Matching socket's inbound queue was full.
    pub rx_sock_full: u32,
    /// Sequenced packet outside the expected sequence number.
    pub rx_seq_drop: u32,
    /// Malformed port-0 control payload.
    pub rx_p0_err: u32,
    /// Transmit deferred or reply dropped: no free frame.
    pub tx_no_frame: u32,
    /// Peer records flushed after retry exhaustion.
    pub seq_flush: u32,
    /// Port-0 control retransmissions.
    pub p0_retry: u32,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            rx_frames: 0,
            tx_frames: 0,
            rx_fmt_err: 0,
            rx_no_pkt: 0,
            rx_no_sock: 0,
            rx_sock_full: 0,
            rx_seq_drop: 0,
            rx_p0_err: 0,
            tx_no_frame: 0,
            seq_flush: 0,
            p0_retry: 0,
        }
    }
}

//! The socket table.
//!
//! Sockets here are plain port bindings with a bounded inbound queue,
//! owned by the stack object itself rather than by pinned nodes in a
//! global registry: binding returns a [`SocketHandle`] the application
//! uses for send/receive calls against its [`NetStack`].
//!
//! Dispatch matches an inbound packet's destination port *exactly* — at
//! most one socket per port, and a bind on a taken port fails. "Request"
//! sockets get an interval instead: [`NetStack::bind_ephemeral`] allocates
//! the lowest free port of the ephemeral range, so interval semantics live
//! in allocation while the receive path stays an exact match.
//!
//! [`NetStack`]: crate::NetStack
//! [`NetStack::bind_ephemeral`]: crate::NetStack::bind_ephemeral

use crate::{
    packet::PktQueue, EPHEMERAL_FIRST, EPHEMERAL_LAST, SOCKETS_MAX, SOCK_RX_MAX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BindError {
    /// Another socket already owns this port.
    PortInUse,
    /// Socket table exhausted.
    TableFull,
    /// Every port of the ephemeral range is taken.
    NoFreePort,
}

/// A bound socket. Obtained from `bind`/`bind_ephemeral`, redeemed
/// against the same stack for `send`/`recv`/`unbind`.
#[derive(Debug, PartialEq, Eq)]
pub struct SocketHandle {
    pub(crate) idx: u8,
    pub(crate) port: u16,
}

impl SocketHandle {
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

pub(crate) struct SockRec {
    pub port: u16,
    pub rx: PktQueue<SOCK_RX_MAX>,
}

pub(crate) struct SocketTable {
    socks: [Option<SockRec>; SOCKETS_MAX],
}

// ---- impl SocketTable ----

impl SocketTable {
    const NONE: Option<SockRec> = None;

    pub const fn new() -> Self {
        Self {
            socks: [Self::NONE; SOCKETS_MAX],
        }
    }

    pub fn bind(&mut self, port: u16) -> Result<SocketHandle, BindError> {
        if self.lookup(port).is_some() {
            return Err(BindError::PortInUse);
        }
        let Some(idx) = self.socks.iter().position(|s| s.is_none()) else {
            return Err(BindError::TableFull);
        };
        self.socks[idx] = Some(SockRec {
            port,
            rx: PktQueue::new(),
        });
        Ok(SocketHandle {
            idx: idx as u8,
            port,
        })
    }

    pub fn bind_ephemeral(&mut self) -> Result<SocketHandle, BindError> {
        for port in EPHEMERAL_FIRST..=EPHEMERAL_LAST {
            match self.bind(port) {
                Err(BindError::PortInUse) => continue,
                other => return other,
            }
        }
        Err(BindError::NoFreePort)
    }

    /// The socket a given destination port delivers to, if any.
    pub fn lookup(&mut self, port: u16) -> Option<&mut SockRec> {
        self.socks
            .iter_mut()
            .flatten()
            .find(|s| s.port == port)
    }

    pub fn get(&mut self, hdl: &SocketHandle) -> Option<&mut SockRec> {
        self.socks[hdl.idx as usize]
            .as_mut()
            .filter(|s| s.port == hdl.port)
    }

    /// Drop the binding, returning its queue for the caller to drain back
    /// into the packet pool.
    pub fn unbind(&mut self, hdl: SocketHandle) -> Option<SockRec> {
        match &self.socks[hdl.idx as usize] {
            Some(s) if s.port == hdl.port => self.socks[hdl.idx as usize].take(),
            _ => None,
        }
    }
}

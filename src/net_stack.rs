//! The network stack context object.
//!
//! One [`NetStack`] owns everything a node needs: the packet arena, the
//! socket table, up to [`IFACES_MAX`] interfaces (each an address, a
//! frame device and the per-peer sequencing state for that link), and the
//! diagnostic counters. There is no global registry: multiple independent
//! stacks can coexist, which is also how the tests wire two nodes
//! back-to-back in one process.
//!
//! The stack is driven by non-blocking polls from a run loop:
//!
//! * [`poll_rx`] drains received frames, decodes them, and classifies
//!   each packet: port-0 control first, then sequenced traffic through
//!   the sequencing engine, then direct delivery to the bound socket.
//! * [`poll_tx`] drains the direct (unsequenced + control) queue, then
//!   runs one pass of the per-peer send logic.
//!
//! Time is a caller-supplied millisecond tick; the stack never reads a
//! clock and never waits.
//!
//! [`poll_rx`]: NetStack::poll_rx
//! [`poll_tx`]: NetStack::poll_tx

use heapless::Vec;
use log::{debug, trace, warn};

use crate::{
    frame_device::FrameDevice,
    packet::{PacketPool, PktHandle, PktQueue},
    seq::{self, SeqRxTab, SeqTxTab},
    socket::{BindError, SockRec, SocketHandle, SocketTable},
    wire_frames::{self, FormatError},
    Addr, Counters, Frag, Level, Multi, Packet, DEF_PORT, IFACES_MAX, MAC_BCAST, MAX_DAT,
    PACKET_POOL_SIZE,
};

/// An error from a [`NetStack`] send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    /// No interface matches the destination net and no default route set.
    NoRoute,
    /// Packet arena exhausted; retry after a poll.
    NoPacket,
    /// Every peer record is taken by other, still-busy peers.
    PeerBusy,
    /// The interface's direct transmit queue is full.
    QueueFull,
    /// The packet cannot be expressed at the requested level.
    Format(FormatError),
}

impl From<FormatError> for SendError {
    fn from(value: FormatError) -> Self {
        Self::Format(value)
    }
}

/// Where and how to send: destination addressing plus level selection.
#[derive(Debug, Clone, Copy)]
pub struct SendOpts {
    pub level: Level,
    pub multi: Multi,
    pub dst: Addr,
    pub mcast_id: u16,
    pub dst_port: u16,
    pub seq: bool,
    pub frag: Frag,
    pub user: u8,
}

// ---- impl SendOpts ----

impl SendOpts {
    /// Unsequenced L1 unicast to `dst_port` at `dst`.
    pub fn to(dst: Addr, dst_port: u16) -> Self {
        Self {
            level: Level::L1,
            multi: Multi::None,
            dst,
            mcast_id: 0,
            dst_port,
            seq: false,
            frag: Frag::None,
            user: 0,
        }
    }

    /// Address the sender of a received packet.
    pub fn reply_to(pkt: &Packet) -> Self {
        Self::to(pkt.src, pkt.src_port)
    }

    /// L1 multicast to group `id`.
    pub fn cast(id: u16, dst_port: u16) -> Self {
        Self {
            multi: Multi::Cast,
            mcast_id: id,
            ..Self::to(Addr::new(0, MAC_BCAST), dst_port)
        }
    }

    pub fn sequenced(mut self) -> Self {
        self.seq = true;
        self
    }
}

struct Iface<D: FrameDevice> {
    dev: D,
    addr: Addr,
    /// Destination port of the one outstanding L0 request on this link.
    l0_last_port: u16,
    /// Unsequenced outbound packets, drained ahead of the seq engine.
    direct: PktQueue<PACKET_POOL_SIZE>,
    tx_tab: SeqTxTab,
    rx_tab: SeqRxTab,
}

enum RouteTo {
    Local,
    Via { iface: usize, mac: u8 },
}

/// See the [module docs](self).
pub struct NetStack<D: FrameDevice> {
    pool: PacketPool,
    socks: SocketTable,
    ifaces: Vec<Iface<D>, IFACES_MAX>,
    /// `(iface, via mac)` for destinations on no attached net.
    default_route: Option<(u8, u8)>,
    counters: Counters,
}

// ---- impl NetStack ----

impl<D: FrameDevice> NetStack<D> {
    pub const fn new() -> Self {
        Self {
            pool: PacketPool::new(),
            socks: SocketTable::new(),
            ifaces: Vec::new(),
            default_route: None,
            counters: Counters::new(),
        }
    }

    /// Attach a link. Pushes the local mac into the device's address
    /// filter. Returns the interface index, or the device back when the
    /// interface table is full.
    pub fn add_iface(&mut self, mut dev: D, addr: Addr) -> Result<u8, D> {
        dev.set_filter(addr.mac);
        let idx = self.ifaces.len() as u8;
        self.ifaces
            .push(Iface {
                dev,
                addr,
                l0_last_port: DEF_PORT,
                direct: PktQueue::new(),
                tx_tab: SeqTxTab::new(),
                rx_tab: SeqRxTab::new(),
            })
            .map_err(|ifc| ifc.dev)?;
        Ok(idx)
    }

    /// Change an interface's address, e.g. after external negotiation.
    /// Takes effect on the next poll.
    pub fn set_addr(&mut self, iface: u8, addr: Addr) {
        if let Some(ifc) = self.ifaces.get_mut(iface as usize) {
            ifc.addr = addr;
            ifc.dev.set_filter(addr.mac);
        }
    }

    pub fn addr(&self, iface: u8) -> Option<Addr> {
        self.ifaces.get(iface as usize).map(|i| i.addr)
    }

    pub fn set_default_route(&mut self, iface: u8, via_mac: u8) {
        self.default_route = Some((iface, via_mac));
    }

    /// Driver/configuration access to an interface's device.
    pub fn device(&mut self, iface: u8) -> Option<&mut D> {
        self.ifaces.get_mut(iface as usize).map(|i| &mut i.dev)
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Free slots in the packet arena.
    pub fn pool_free_count(&self) -> usize {
        self.pool.free_count()
    }

    // -- sockets --

    pub fn bind(&mut self, port: u16) -> Result<SocketHandle, BindError> {
        self.socks.bind(port)
    }

    /// Bind a "request" socket on the lowest free ephemeral port.
    pub fn bind_ephemeral(&mut self) -> Result<SocketHandle, BindError> {
        self.socks.bind_ephemeral()
    }

    pub fn unbind(&mut self, hdl: SocketHandle) {
        if let Some(mut rec) = self.socks.unbind(hdl) {
            while let Some(h) = rec.rx.pop_front() {
                self.pool.free(h);
            }
        }
    }

    /// Pop the next packet delivered to this socket.
    pub fn recv(&mut self, hdl: &SocketHandle) -> Option<Packet> {
        let h = self.socks.get(hdl)?.rx.pop_front()?;
        let pkt = self.pool.get(&h).clone();
        self.pool.free(h);
        Some(pkt)
    }

    /// Send `dat` from this socket. Sequenced sends are queued to the
    /// peer's record and go out across later [`poll_tx`] passes; direct
    /// sends go out on the next one.
    ///
    /// [`poll_tx`]: NetStack::poll_tx
    pub fn send(
        &mut self,
        sock: &SocketHandle,
        opts: SendOpts,
        dat: &[u8],
    ) -> Result<(), SendError> {
        if dat.len() > MAX_DAT {
            return Err(SendError::Format(FormatError::TooLong));
        }

        let route = self.route(&opts)?;
        let (iface, via) = match route {
            RouteTo::Local => {
                let h = self.fill_packet(None, sock.port, &opts, dat)?;
                trace!("local bypass delivery to port {}", opts.dst_port);
                Self::deliver(&mut self.pool, &mut self.socks, &mut self.counters, h);
                return Ok(());
            }
            RouteTo::Via { iface, mac } => (iface, mac),
        };

        let h = self.fill_packet(Some(iface), sock.port, &opts, dat)?;
        let p = self.pool.get_mut(&h);
        p.via_mac = via;

        let ifc = &mut self.ifaces[iface];
        if p.is_seq && p.level != Level::L0 {
            let peer = p.dst;
            match ifc.tx_tab.enqueue(peer, via, h) {
                Ok(()) => Ok(()),
                Err(h) => {
                    self.pool.free(h);
                    Err(SendError::PeerBusy)
                }
            }
        } else {
            match ifc.direct.push_back(h) {
                Ok(()) => Ok(()),
                Err(h) => {
                    self.pool.free(h);
                    Err(SendError::QueueFull)
                }
            }
        }
    }

    // -- polling --

    pub fn poll(&mut self, now: u32) {
        self.poll_rx(now);
        self.poll_tx(now);
    }

    /// Drain and dispatch received frames on every interface. Bounded by
    /// what the devices have queued; never blocks.
    pub fn poll_rx(&mut self, _now: u32) {
        let Self {
            pool,
            socks,
            ifaces,
            counters,
            ..
        } = self;

        for ifc in ifaces.iter_mut() {
            loop {
                // Leave frames with the driver while the arena is full:
                // deferral, not loss.
                let Some(h) = pool.alloc() else {
                    counters.rx_no_pkt += 1;
                    break;
                };
                let Some(frame) = ifc.dev.pop_rx() else {
                    pool.free(h);
                    break;
                };
                counters.rx_frames += 1;

                let res =
                    wire_frames::decode(&frame, ifc.addr, ifc.l0_last_port, pool.get_mut(&h));
                ifc.dev.free(frame);
                if let Err(e) = res {
                    debug!("rx: undecodable frame: {e:?}");
                    counters.rx_fmt_err += 1;
                    pool.free(h);
                    continue;
                }

                let (dst_port, is_seq, level) = {
                    let p = pool.get(&h);
                    (p.dst_port, p.is_seq, p.level)
                };

                if dst_port == 0 {
                    // Control traffic never reaches sockets.
                    let pkt = pool.get(&h).clone();
                    pool.free(h);
                    seq::handle_p0(
                        &mut ifc.tx_tab,
                        &mut ifc.rx_tab,
                        &pkt,
                        ifc.addr,
                        &mut ifc.l0_last_port,
                        &mut ifc.dev,
                        pool,
                        counters,
                    );
                } else if is_seq && level != Level::L0 {
                    let (src, seq_num, req_ack, via) = {
                        let p = pool.get(&h);
                        (p.src, p.seq_num, p.req_ack, p.via_mac)
                    };
                    if ifc.rx_tab.accept(src, seq_num) {
                        if req_ack {
                            let exp = ifc.rx_tab.get_seq(src);
                            let free = pool.free_count().min(255) as u8;
                            seq::send_ctrl(
                                &mut ifc.dev,
                                ifc.addr,
                                src,
                                via,
                                &[0x80, free, exp],
                                &mut ifc.l0_last_port,
                                counters,
                            );
                        }
                        Self::deliver(pool, socks, counters, h);
                    } else {
                        trace!("rx: out-of-sequence {seq_num} from {src:?}");
                        counters.rx_seq_drop += 1;
                        pool.free(h);
                    }
                } else {
                    Self::deliver(pool, socks, counters, h);
                }
            }
        }
    }

    /// Drain direct outbound packets, then run one pass of the
    /// sequencing engine's per-peer send logic.
    pub fn poll_tx(&mut self, now: u32) {
        let Self {
            pool,
            ifaces,
            counters,
            ..
        } = self;

        for ifc in ifaces.iter_mut() {
            while !ifc.direct.is_empty() {
                let Some(mut frame) = ifc.dev.alloc() else {
                    counters.tx_no_frame += 1;
                    break;
                };
                let Some(h) = ifc.direct.pop_front() else {
                    ifc.dev.free(frame);
                    break;
                };
                let res = {
                    let p = pool.get(&h);
                    wire_frames::encode(p, ifc.addr, p.via_mac, &mut ifc.l0_last_port, &mut frame)
                };
                match res {
                    Ok(()) => {
                        ifc.dev.push_tx(frame);
                        counters.tx_frames += 1;
                    }
                    Err(e) => {
                        warn!("tx: encode failed: {e:?}");
                        ifc.dev.free(frame);
                    }
                }
                pool.free(h);
            }

            ifc.tx_tab.poll(
                now,
                ifc.addr,
                &mut ifc.l0_last_port,
                &mut ifc.dev,
                pool,
                counters,
            );
        }
    }

    // -- internals --

    fn route(&self, opts: &SendOpts) -> Result<RouteTo, SendError> {
        if opts.multi.is_cast() {
            let iface = match self.default_route {
                Some((i, _)) if (i as usize) < self.ifaces.len() => i as usize,
                _ if !self.ifaces.is_empty() => 0,
                _ => return Err(SendError::NoRoute),
            };
            return Ok(RouteTo::Via {
                iface,
                mac: MAC_BCAST,
            });
        }
        if self.ifaces.iter().any(|i| i.addr == opts.dst) {
            return Ok(RouteTo::Local);
        }
        if let Some(iface) = self
            .ifaces
            .iter()
            .position(|i| i.addr.net == opts.dst.net)
        {
            return Ok(RouteTo::Via {
                iface,
                mac: opts.dst.mac,
            });
        }
        match self.default_route {
            Some((i, via)) if (i as usize) < self.ifaces.len() => Ok(RouteTo::Via {
                iface: i as usize,
                mac: via,
            }),
            _ => Err(SendError::NoRoute),
        }
    }

    fn fill_packet(
        &mut self,
        iface: Option<usize>,
        src_port: u16,
        opts: &SendOpts,
        dat: &[u8],
    ) -> Result<PktHandle, SendError> {
        let src = match iface {
            Some(i) => self.ifaces[i].addr,
            None => self
                .ifaces
                .first()
                .map(|i| i.addr)
                .unwrap_or(Addr::new(0, 0)),
        };
        let h = self.pool.alloc().ok_or(SendError::NoPacket)?;
        let p = self.pool.get_mut(&h);
        p.level = opts.level;
        p.multi = opts.multi;
        if opts.level == Level::L1 && !opts.multi.is_cast() && opts.dst.net != src.net {
            // Cross-net unicast needs explicit addresses on the wire.
            p.multi = Multi::Net;
        }
        p.src = src;
        p.dst = opts.dst;
        p.mcast_id = opts.mcast_id;
        p.src_port = src_port;
        p.dst_port = opts.dst_port;
        // L2 sequencing is not optional.
        p.is_seq = opts.seq || opts.level == Level::L2;
        p.frag = opts.frag;
        p.user = opts.user;
        p.set_payload(dat);
        Ok(h)
    }

    fn deliver(
        pool: &mut PacketPool,
        socks: &mut SocketTable,
        counters: &mut Counters,
        h: PktHandle,
    ) {
        let dst_port = pool.get(&h).dst_port;
        let Some(rec) = socks.lookup(dst_port) else {
            debug!("rx: no socket on port {dst_port}");
            counters.rx_no_sock += 1;
            pool.free(h);
            return;
        };
        let SockRec { rx, .. } = rec;
        if let Err(h) = rx.push_back(h) {
            counters.rx_sock_full += 1;
            pool.free(h);
        }
    }
}

impl<D: FrameDevice> Default for NetStack<D> {
    fn default() -> Self {
        Self::new()
    }
}

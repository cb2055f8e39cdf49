//! Per-peer connection state and periodic service.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::channel::{ChannelRx, ChannelTx, MAX_RETRIES, MAX_RTO};
use crate::header::{Header, PacketKind};
use crate::NUM_CHANNELS;

/// Outbound Syn retransmission interval.
const SYN_RETRY: Duration = Duration::from_millis(250);
/// Give up on an unanswered outbound connect after this many Syns.
const MAX_SYN_RETRIES: u32 = 20;
/// RTT probe interval per established peer.
const PING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum ConnState {
    /// Outbound connect in flight.
    SynSent { last_syn: Instant, retries: u32 },
    Connected,
}

#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub state: ConnState,
    pub tx: [ChannelTx; NUM_CHANNELS],
    pub rx: [ChannelRx; NUM_CHANNELS],
    pub rtt_ms: u32,
    pub last_ping: Instant,
}

impl Peer {
    pub fn outbound(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            state: ConnState::SynSent {
                last_syn: now,
                retries: 0,
            },
            tx: Default::default(),
            rx: Default::default(),
            rtt_ms: 0,
            last_ping: now,
        }
    }

    pub fn inbound(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            state: ConnState::Connected,
            tx: Default::default(),
            rx: Default::default(),
            rtt_ms: 0,
            last_ping: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnState::Connected)
    }

    /// Retransmit what is due and emit RTT probes.
    ///
    /// Returns `false` when the peer has to be dropped (connect or
    /// retransmission gave up). Datagrams to send are pushed onto `out`.
    pub fn service(
        &mut self,
        now: Instant,
        tick_ms: u32,
        out: &mut Vec<(SocketAddr, Vec<u8>)>,
    ) -> bool {
        match &mut self.state {
            ConnState::SynSent { last_syn, retries } => {
                if now.duration_since(*last_syn) >= SYN_RETRY {
                    if *retries >= MAX_SYN_RETRIES {
                        debug!(peer = %self.addr, "connect gave up");
                        return false;
                    }
                    *retries += 1;
                    *last_syn = now;
                    out.push((self.addr, Header::new(PacketKind::Syn).into_datagram(&[])));
                }
                true
            }
            ConnState::Connected => {
                for channel in &mut self.tx {
                    for (seq, pending) in channel.pending.iter_mut() {
                        if now.duration_since(pending.last_sent) < pending.rto {
                            continue;
                        }
                        if pending.retries >= MAX_RETRIES {
                            debug!(peer = %self.addr, seq, "reliable packet gave up");
                            return false;
                        }
                        trace!(peer = %self.addr, seq, retry = pending.retries, "retransmit");
                        pending.retries += 1;
                        pending.last_sent = now;
                        pending.rto = (pending.rto * 2).min(MAX_RTO);
                        out.push((self.addr, pending.datagram.clone()));
                    }
                }

                if now.duration_since(self.last_ping) >= PING_INTERVAL {
                    self.last_ping = now;
                    let mut header = Header::new(PacketKind::Ping);
                    header.seq = tick_ms;
                    out.push((self.addr, header.into_datagram(&[])));
                }
                true
            }
        }
    }
}

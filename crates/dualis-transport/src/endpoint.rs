//! The transport endpoint: socket, peer table, poll loop.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::channel::Deliver;
use crate::error::TransportError;
use crate::header::{Header, PacketKind, FLAG_RELIABLE, HEADER_LEN};
use crate::peer::{ConnState, Peer};
use crate::NUM_CHANNELS;

/// Largest payload accepted for a single send.
///
/// Kept well under the UDP datagram ceiling; bulk transfers chunk above the
/// transport instead of relying on IP fragmentation.
pub const MAX_PAYLOAD: usize = 32 * 1024;

const RECV_BUFFER_SIZE: usize = MAX_PAYLOAD + HEADER_LEN;

/// Connect/disconnect notification: `(peer_idx, connected)`.
pub type EventCallback = Arc<dyn Fn(usize, bool) + Send + Sync>;

/// A received data packet ready for dispatch.
struct Delivery {
    peer_idx: usize,
    channel: u8,
    payload: Bytes,
}

struct Endpoint {
    socket: UdpSocket,
    epoch: Instant,
    peers: Vec<Option<Peer>>,
    accept_incoming: bool,
    recv_buf: Box<[u8; RECV_BUFFER_SIZE]>,
    /// Data packets drained but not yet handed to a `poll` caller. The
    /// blocking connect drains the socket without consuming data packets;
    /// they are dispatched by the next `poll`.
    pending: std::collections::VecDeque<Delivery>,
}

/// Connection-oriented UDP endpoint.
///
/// Every public operation takes the internal mutex, so callers may invoke
/// them from any thread; ordering among concurrent senders is unspecified
/// but each individual send is atomic with respect to channel ordering.
pub struct Transport {
    inner: Mutex<Option<Endpoint>>,
    event_cb: Mutex<Option<EventCallback>>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            event_cb: Mutex::new(None),
        }
    }

    /// Register the connect/disconnect callback. Invoked with the transport
    /// lock released.
    pub fn set_event_callback(&self, cb: EventCallback) {
        *self.event_cb.lock() = Some(cb);
    }

    /// Bind `0.0.0.0:port` and accept up to `max_clients` inbound peers.
    pub fn start_host(&self, port: u16, max_clients: usize) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let socket = bind_game_port(port)?.ok_or(TransportError::InvalidPort(port))?;
        info!(port, max_clients, "transport: hosting");
        *inner = Some(Endpoint::new(socket, max_clients, true));
        Ok(())
    }

    /// Connect to a single remote, blocking up to `timeout` for the
    /// handshake. On success peer slot 0 holds the remote.
    pub fn start_client(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let addr = resolve(host, port)?;
        {
            let mut inner = self.inner.lock();
            if inner.is_some() {
                return Err(TransportError::AlreadyStarted);
            }
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
            socket.set_nonblocking(true)?;
            *inner = Some(Endpoint::new(socket, 1, false));
        }
        self.connect_blocking(addr, timeout)
    }

    /// LAN-mesh flavor of [`Transport::start_client`]: binds the game port
    /// when it is free so that other mesh members can dial us, keeps
    /// accepting inbound peers, and allows the full peer table.
    pub fn start_mesh(
        &self,
        host: &str,
        port: u16,
        max_peers: usize,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let addr = resolve(host, port)?;
        {
            let mut inner = self.inner.lock();
            if inner.is_some() {
                return Err(TransportError::AlreadyStarted);
            }
            if port < 1024 {
                return Err(TransportError::InvalidPort(port));
            }
            // Mesh members dial each other at the game port, so bind it when
            // free; same-machine sessions fall back to an ephemeral port and
            // can only be dialed outward.
            let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
                Ok(socket) => socket,
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    debug!(port, "transport: game port taken, binding ephemeral");
                    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
                }
                Err(e) => return Err(e.into()),
            };
            socket.set_nonblocking(true)?;
            *inner = Some(Endpoint::new(socket, max_peers, true));
        }
        self.connect_blocking(addr, timeout)
    }

    /// Initiate a non-blocking outbound connect; completion (or failure) is
    /// reported through the event callback. Returns the assigned peer slot.
    pub fn connect(&self, addr: SocketAddr) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock();
        let ep = inner.as_mut().ok_or(TransportError::NotStarted)?;
        ep.begin_connect(addr)
    }

    fn connect_blocking(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let idx = {
            let mut inner = self.inner.lock();
            let ep = inner.as_mut().ok_or(TransportError::NotStarted)?;
            ep.begin_connect(addr)?
        };

        loop {
            let mut events = Vec::new();
            let outcome = {
                let mut inner = self.inner.lock();
                let ep = inner.as_mut().ok_or(TransportError::NotStarted)?;
                // Drain without dispatching data: anything that arrives
                // already (the host may talk immediately after SynAck) is
                // buffered for the next poll.
                ep.drain(10, &mut events);
                ep.service(&mut events);
                match ep.peers.get(idx).and_then(|p| p.as_ref()) {
                    Some(peer) if peer.is_connected() => Some(Ok(())),
                    // The connect gave up before the deadline.
                    None => {
                        *inner = None;
                        Some(Err(TransportError::ConnectTimeout))
                    }
                    Some(_) if Instant::now() >= deadline => {
                        warn!(%addr, "transport: connect timed out");
                        *inner = None;
                        Some(Err(TransportError::ConnectTimeout))
                    }
                    Some(_) => None,
                }
            };
            self.dispatch_events(&events);
            if let Some(result) = outcome {
                return result;
            }
        }
    }

    /// Send `payload` to one peer on `channel`.
    pub fn send_to(
        &self,
        peer_idx: usize,
        payload: &[u8],
        channel: u8,
        reliable: bool,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let ep = inner.as_mut().ok_or(TransportError::NotStarted)?;
        ep.send_data(peer_idx, payload, channel, reliable)
    }

    /// Send `payload` to every connected peer on `channel`.
    pub fn broadcast(
        &self,
        payload: &[u8],
        channel: u8,
        reliable: bool,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let ep = inner.as_mut().ok_or(TransportError::NotStarted)?;
        let targets: Vec<usize> = ep
            .peers
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().filter(|p| p.is_connected()).map(|_| i))
            .collect();
        for idx in targets {
            ep.send_data(idx, payload, channel, reliable)?;
        }
        Ok(())
    }

    /// Drain every pending datagram and service timers.
    ///
    /// The first socket wait blocks up to `timeout_ms`; the rest of the
    /// drain is non-blocking. Data packets are handed to `packet_cb`
    /// `(peer_idx, channel, payload)`, connect/disconnect events to the
    /// registered event callback, both after the transport lock is dropped.
    /// Returns the number of data packets dispatched.
    pub fn poll(&self, mut packet_cb: impl FnMut(usize, u8, &[u8]), timeout_ms: u32) -> usize {
        let mut events = Vec::new();
        let deliveries: Vec<Delivery> = {
            let mut inner = self.inner.lock();
            let Some(ep) = inner.as_mut() else {
                return 0;
            };
            ep.drain(timeout_ms, &mut events);
            ep.service(&mut events);
            ep.pending.drain(..).collect()
        };

        self.dispatch_events(&events);
        let count = deliveries.len();
        for d in &deliveries {
            packet_cb(d.peer_idx, d.channel, &d.payload);
        }
        count
    }

    /// Retransmit what is due and emit pending RTT probes.
    pub fn flush(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(ep) = inner.as_mut() {
                ep.service(&mut events);
            }
        }
        self.dispatch_events(&events);
    }

    /// Round-trip time to a peer in milliseconds (0 until the first probe).
    pub fn peer_rtt(&self, peer_idx: usize) -> u32 {
        let inner = self.inner.lock();
        inner
            .as_ref()
            .and_then(|ep| ep.peers.get(peer_idx))
            .and_then(|p| p.as_ref())
            .map(|p| p.rtt_ms)
            .unwrap_or(0)
    }

    pub fn peer_addr(&self, peer_idx: usize) -> Option<SocketAddr> {
        let inner = self.inner.lock();
        inner
            .as_ref()
            .and_then(|ep| ep.peers.get(peer_idx))
            .and_then(|p| p.as_ref())
            .map(|p| p.addr)
    }

    pub fn connected_peers(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .as_ref()
            .map(|ep| {
                ep.peers
                    .iter()
                    .filter(|p| p.as_ref().is_some_and(|p| p.is_connected()))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Drop one peer immediately, notifying it with a Disconnect datagram.
    /// No event is emitted for locally initiated disconnects.
    pub fn disconnect_peer(&self, peer_idx: usize) {
        let mut inner = self.inner.lock();
        if let Some(ep) = inner.as_mut() {
            if let Some(peer) = ep.peers.get_mut(peer_idx).and_then(|p| p.take()) {
                let datagram = Header::new(PacketKind::Disconnect).into_datagram(&[]);
                let _ = ep.socket.send_to(&datagram, peer.addr);
                debug!(peer = %peer.addr, peer_idx, "transport: dropped peer");
            }
        }
    }

    /// Tear everything down synchronously: every live peer gets a
    /// Disconnect datagram, then the socket is dropped. No grace period.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(ep) = inner.take() {
            for peer in ep.peers.iter().flatten() {
                let datagram = Header::new(PacketKind::Disconnect).into_datagram(&[]);
                let _ = ep.socket.send_to(&datagram, peer.addr);
            }
            info!("transport: stopped");
        }
    }

    fn dispatch_events(&self, events: &[(usize, bool)]) {
        if events.is_empty() {
            return;
        }
        let cb = self.event_cb.lock().clone();
        if let Some(cb) = cb {
            for &(idx, connected) in events {
                cb(idx, connected);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Endpoint {
    fn new(socket: UdpSocket, max_peers: usize, accept_incoming: bool) -> Self {
        let mut peers = Vec::with_capacity(max_peers);
        peers.resize_with(max_peers, || None);
        Self {
            socket,
            epoch: Instant::now(),
            peers,
            accept_incoming,
            recv_buf: Box::new([0u8; RECV_BUFFER_SIZE]),
            pending: std::collections::VecDeque::new(),
        }
    }

    fn tick_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn begin_connect(&mut self, addr: SocketAddr) -> Result<usize, TransportError> {
        let now = Instant::now();
        let idx = self
            .peers
            .iter()
            .position(|p| p.is_none())
            .ok_or(TransportError::PeersFull)?;
        self.peers[idx] = Some(Peer::outbound(addr, now));
        let datagram = Header::new(PacketKind::Syn).into_datagram(&[]);
        let _ = self.socket.send_to(&datagram, addr);
        debug!(%addr, idx, "transport: connecting");
        Ok(idx)
    }

    fn peer_by_addr(&mut self, addr: SocketAddr) -> Option<usize> {
        self.peers
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.addr == addr))
    }

    fn send_data(
        &mut self,
        peer_idx: usize,
        payload: &[u8],
        channel: u8,
        reliable: bool,
    ) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }
        let now = Instant::now();
        let peer = self
            .peers
            .get_mut(peer_idx)
            .and_then(|p| p.as_mut())
            .filter(|p| p.is_connected())
            .ok_or(TransportError::NoSuchPeer(peer_idx))?;

        let chan = &mut peer.tx[channel as usize % NUM_CHANNELS];
        let mut header = Header::new(PacketKind::Data);
        header.channel = channel;
        if reliable {
            header.flags = FLAG_RELIABLE;
            header.seq = chan.next_reliable_seq();
        } else {
            header.seq = chan.next_unreliable_seq();
        }
        let datagram = header.into_datagram(payload);
        let _ = self.socket.send_to(&datagram, peer.addr);
        if reliable {
            chan.track(header.seq, datagram, now);
        }
        Ok(())
    }

    /// Read every pending datagram off the socket. Data packets are queued
    /// on `self.pending`; connection events go to `events`.
    fn drain(&mut self, timeout_ms: u32, events: &mut Vec<(usize, bool)>) {
        let mut first = timeout_ms > 0;
        if first {
            let _ = self.socket.set_nonblocking(false);
            let _ = self
                .socket
                .set_read_timeout(Some(Duration::from_millis(timeout_ms as u64)));
        }

        loop {
            match self.socket.recv_from(&mut self.recv_buf[..]) {
                Ok((len, from)) => {
                    if first {
                        first = false;
                        let _ = self.socket.set_nonblocking(true);
                    }
                    let datagram = &self.recv_buf[..len];
                    let Some((header, payload)) = Header::decode(datagram) else {
                        trace!(%from, len, "transport: dropped malformed datagram");
                        continue;
                    };
                    let payload = Bytes::copy_from_slice(payload);
                    self.handle_datagram(from, header, payload, events);
                }
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    if first {
                        let _ = self.socket.set_nonblocking(true);
                    }
                    return;
                }
                // UDP sockets surface this after a send to a dead target.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!(error = %e, "transport: socket error");
                    if first {
                        let _ = self.socket.set_nonblocking(true);
                    }
                    return;
                }
            }
        }
    }

    fn handle_datagram(
        &mut self,
        from: SocketAddr,
        header: Header,
        payload: Bytes,
        events: &mut Vec<(usize, bool)>,
    ) {
        let now = Instant::now();
        let tick = self.tick_ms();
        let known = self.peer_by_addr(from);

        match header.kind {
            PacketKind::Syn => match known {
                Some(idx) => {
                    // Duplicate Syn, or both ends dialed each other: answer
                    // and treat the connection as established.
                    let Some(peer) = self.peers[idx].as_mut() else { return };
                    let was_connecting = !peer.is_connected();
                    peer.state = ConnState::Connected;
                    let datagram = Header::new(PacketKind::SynAck).into_datagram(&[]);
                    let _ = self.socket.send_to(&datagram, from);
                    if was_connecting {
                        events.push((idx, true));
                    }
                }
                None if self.accept_incoming => {
                    match self.peers.iter().position(|p| p.is_none()) {
                        Some(idx) => {
                            self.peers[idx] = Some(Peer::inbound(from, now));
                            let datagram =
                                Header::new(PacketKind::SynAck).into_datagram(&[]);
                            let _ = self.socket.send_to(&datagram, from);
                            debug!(%from, idx, "transport: peer connected");
                            events.push((idx, true));
                        }
                        None => {
                            let datagram =
                                Header::new(PacketKind::Disconnect).into_datagram(&[]);
                            let _ = self.socket.send_to(&datagram, from);
                        }
                    }
                }
                None => {}
            },
            PacketKind::SynAck => {
                if let Some(idx) = known {
                    let Some(peer) = self.peers[idx].as_mut() else { return };
                    if !peer.is_connected() {
                        peer.state = ConnState::Connected;
                        debug!(%from, idx, "transport: connected");
                        events.push((idx, true));
                    }
                }
            }
            PacketKind::Data => {
                let Some(idx) = known else { return };
                let Some(peer) = self.peers[idx].as_mut() else { return };
                if !peer.is_connected() {
                    return;
                }
                let channel = header.channel as usize % NUM_CHANNELS;
                let reliable = header.flags & FLAG_RELIABLE != 0;
                let result = if reliable {
                    peer.rx[channel].on_reliable(header.seq, payload)
                } else {
                    peer.rx[channel].on_unreliable(header.seq, payload)
                };
                if reliable {
                    if let Some((ack, ack_bits)) = peer.rx[channel].ack_state() {
                        let mut ack_header = Header::new(PacketKind::Ack);
                        ack_header.channel = header.channel;
                        ack_header.ack = ack;
                        ack_header.ack_bits = ack_bits;
                        let datagram = ack_header.into_datagram(&[]);
                        let _ = self.socket.send_to(&datagram, from);
                    }
                }
                if let Deliver::Now(payloads) = result {
                    for payload in payloads {
                        self.pending.push_back(Delivery {
                            peer_idx: idx,
                            channel: header.channel,
                            payload,
                        });
                    }
                }
            }
            PacketKind::Ack => {
                if let Some(idx) = known {
                    let Some(peer) = self.peers[idx].as_mut() else { return };
                    let channel = header.channel as usize % NUM_CHANNELS;
                    peer.tx[channel].apply_ack(header.ack, header.ack_bits);
                }
            }
            PacketKind::Ping => {
                if known.is_some() {
                    let mut pong = Header::new(PacketKind::Pong);
                    pong.seq = header.seq;
                    let datagram = pong.into_datagram(&[]);
                    let _ = self.socket.send_to(&datagram, from);
                }
            }
            PacketKind::Pong => {
                if let Some(idx) = known {
                    let Some(peer) = self.peers[idx].as_mut() else { return };
                    peer.rtt_ms = tick.wrapping_sub(header.seq);
                }
            }
            PacketKind::Disconnect => {
                if let Some(idx) = known {
                    debug!(%from, idx, "transport: peer disconnected");
                    self.peers[idx] = None;
                    events.push((idx, false));
                }
            }
        }
    }

    /// Retransmissions, Syn retries, pings. Drops peers that gave up.
    fn service(&mut self, events: &mut Vec<(usize, bool)>) {
        let now = Instant::now();
        let tick = self.tick_ms();
        let mut to_send = Vec::new();
        for idx in 0..self.peers.len() {
            if let Some(peer) = self.peers[idx].as_mut() {
                if !peer.service(now, tick, &mut to_send) {
                    let was_connected = peer.is_connected();
                    self.peers[idx] = None;
                    if was_connected {
                        events.push((idx, false));
                    }
                }
            }
        }
        for (addr, datagram) in to_send {
            let _ = self.socket.send_to(&datagram, addr);
        }
    }
}

fn bind_game_port(port: u16) -> Result<Option<UdpSocket>, TransportError> {
    if port < 1024 {
        return Ok(None);
    }
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_nonblocking(true)?;
    Ok(Some(socket))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    // Prefer IPv4; the session protocol carries IPv4 addresses.
    (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::BadAddress(host.to_string()))?
        .find(|a| matches!(a.ip(), IpAddr::V4(_)))
        .ok_or_else(|| TransportError::BadAddress(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Start a host on an OS-assigned free port above 1024.
    fn start_any_host(max_clients: usize) -> (Transport, u16) {
        let host = Transport::new();
        // Ports are assigned by the OS; retry a few ephemeral candidates.
        for _ in 0..16 {
            let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            let port = probe.local_addr().unwrap().port();
            drop(probe);
            if host.start_host(port, max_clients).is_ok() {
                return (host, port);
            }
        }
        panic!("no free port found");
    }

    /// `start_client` blocks for the handshake, so the host side has to be
    /// pumped from another thread while it runs.
    fn connect_client(host: &Transport, port: u16) -> Transport {
        let client = Transport::new();
        let done = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    host.poll(|_, _, _| {}, 0);
                    std::thread::sleep(Duration::from_millis(2));
                }
            });
            client
                .start_client("127.0.0.1", port, Duration::from_secs(5))
                .unwrap();
            done.store(true, Ordering::SeqCst);
        });
        client
    }

    fn pump(t: &Transport, sink: &mut Vec<(usize, u8, Vec<u8>)>) {
        t.poll(
            |peer, channel, payload| sink.push((peer, channel, payload.to_vec())),
            0,
        );
    }

    #[test]
    fn connect_and_exchange_reliable() {
        let (host, port) = start_any_host(1);
        let client = connect_client(&host, port);
        assert_eq!(host.connected_peers(), 1);

        client.send_to(0, b"hello", 0, true).unwrap();
        client.send_to(0, b"world", 0, true).unwrap();

        let mut host_rx = Vec::new();
        for _ in 0..200 {
            pump(&host, &mut host_rx);
            if host_rx.len() >= 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(host_rx.len(), 2);
        assert_eq!(host_rx[0].2, b"hello");
        assert_eq!(host_rx[1].2, b"world");

        // And the reverse direction, on the payload channel.
        host.send_to(0, b"pong", 1, true).unwrap();
        let mut client_rx = Vec::new();
        for _ in 0..200 {
            pump(&client, &mut client_rx);
            if !client_rx.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client_rx, vec![(0, 1, b"pong".to_vec())]);
    }

    #[test]
    fn connect_times_out_against_dead_port() {
        let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let client = Transport::new();
        let err = client
            .start_client("127.0.0.1", port, Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout));
        assert!(!client.is_active());
    }

    #[test]
    fn low_ports_are_rejected() {
        let host = Transport::new();
        assert!(matches!(
            host.start_host(1023, 1),
            Err(TransportError::InvalidPort(1023))
        ));
    }

    #[test]
    fn stop_notifies_remote() {
        let (host, port) = start_any_host(1);
        let client = connect_client(&host, port);

        let disconnects = Arc::new(AtomicUsize::new(0));
        let seen = disconnects.clone();
        host.set_event_callback(Arc::new(move |_, connected| {
            if !connected {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));

        client.stop();
        let mut sink = Vec::new();
        for _ in 0..200 {
            pump(&host, &mut sink);
            if disconnects.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(host.connected_peers(), 0);
    }

    #[test]
    fn broadcast_reaches_all_clients() {
        let (host, port) = start_any_host(2);
        let a = connect_client(&host, port);
        let b = connect_client(&host, port);
        assert_eq!(host.connected_peers(), 2);

        host.broadcast(b"all", 0, true).unwrap();

        let mut got_a = Vec::new();
        let mut got_b = Vec::new();
        for _ in 0..200 {
            pump(&a, &mut got_a);
            pump(&b, &mut got_b);
            if !got_a.is_empty() && !got_b.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got_a[0].2, b"all");
        assert_eq!(got_b[0].2, b"all");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (host, _port) = start_any_host(1);
        let big = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            host.send_to(0, &big, 0, true),
            Err(TransportError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn rtt_updates_after_ping_interval() {
        let (host, port) = start_any_host(1);
        let client = connect_client(&host, port);

        let mut sink = Vec::new();
        // Pings go out after one second; pump both ends past that.
        for _ in 0..240 {
            pump(&host, &mut sink);
            pump(&client, &mut sink);
            std::thread::sleep(Duration::from_millis(5));
        }
        // Loopback RTT rounds to ~0; the probe completing shows up as a
        // small value rather than a hang.
        assert!(client.peer_rtt(0) < 100);
    }
}

//! The LAN session: roster, mesh, MP packet routing.
//!
//! One session per emulator instance. The host assigns player IDs and
//! broadcasts the authoritative roster; clients build direct connections to
//! every other client so MP broadcasts reach the whole mesh. A background
//! network thread drains the transport; the emulator thread produces and
//! consumes MP frames through the `send_*`/`recv_*` operations.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use dualis_netproto::constants::{
    DEFAULT_LAN_PORT, LAN_MAX_PLAYERS, MP_MAX_BODY, MP_MAX_REPLY_BODY,
};
use dualis_netproto::discovery::DiscoveryBeacon;
use dualis_netproto::lan::LanCommand;
use dualis_netproto::mp::{MpHeader, MP_ACK, MP_CMD, MP_NORMAL, MP_REPLY};
use dualis_netproto::player::{Player, PlayerStatus, LOCALHOST, MAX_NAME_LEN};
use dualis_transport::{Transport, CHANNEL_CONTROL, CHANNEL_PAYLOAD};

use crate::clock::tick_ms;
use crate::discovery::Discovery;
use crate::error::LanError;

/// MP packets older than this at the queue head are discarded.
const MP_STALE_MS: u32 = 500;
/// Cap on the synchronous client handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Network thread nap between transport polls.
const NET_THREAD_NAP: Duration = Duration::from_micros(500);
/// Blocking-receive nap when the queue is empty.
const RECV_NAP: Duration = Duration::from_millis(2);
/// Reply-collection nap per drain iteration.
const REPLY_NAP: Duration = Duration::from_millis(1);
/// Reply timestamps may lag the expected one by this much (modular).
const TIMESTAMP_TOLERANCE: u64 = 0x100000;
/// Roster ping refresh cadence, in `process` calls.
const PING_REFRESH_FRAMES: u32 = 60;

#[derive(Debug, Clone)]
pub struct LanConfig {
    pub player_name: String,
    pub port: u16,
    /// Budget for `recv_replies`, in milliseconds.
    pub recv_timeout_ms: u32,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            player_name: String::new(),
            port: DEFAULT_LAN_PORT,
            recv_timeout_ms: 25,
        }
    }
}

/// Roster state. Everything in here is guarded by one mutex; transport calls
/// are never made while it is held.
#[derive(Default)]
struct Roster {
    players: Box<[Player; LAN_MAX_PLAYERS]>,
    num_players: u8,
    max_players: u8,
    /// The host's IPv4 as this session observed it.
    host_address: u32,
    /// Transport peer slot per player ID.
    peers: [Option<usize>; LAN_MAX_PLAYERS],
}

/// One queued inbound MP frame. The receive tick and source peer are
/// explicit fields here; nothing is smuggled through the wire header.
struct RxPacket {
    header: MpHeader,
    body: Bytes,
    recv_tick: u32,
    peer_idx: usize,
}

pub struct LanSession {
    transport: Arc<Transport>,
    discovery: Mutex<Option<Discovery>>,
    roster: Mutex<Roster>,
    rx_queue: Mutex<VecDeque<RxPacket>>,
    /// Sender ID and peer slot of the last MP command we consumed; replies
    /// are unicast there.
    last_host: Mutex<Option<(u8, usize)>>,
    connected: AtomicU16,
    active: AtomicBool,
    is_host: bool,
    my_id: AtomicU8,
    my_name: String,
    game_port: u16,
    recv_timeout_ms: u32,
    frame_count: AtomicU32,
    net_running: Arc<AtomicBool>,
    net_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LanSession {
    /// Start hosting: player 0, discovery beacons, network thread.
    pub fn host(config: LanConfig, max_players: u8) -> Result<Arc<Self>, LanError> {
        let name = sanitize_name(&config.player_name)?;
        if !(2..=LAN_MAX_PLAYERS as u8).contains(&max_players) {
            return Err(LanError::InvalidConfig("max_players must be 2..=16"));
        }

        let transport = Arc::new(Transport::new());
        // Full peer table regardless of the roster cap: rejections happen at
        // the roster level so the peer is told why.
        transport.start_host(config.port, LAN_MAX_PLAYERS - 1)?;

        let mut roster = Roster {
            max_players,
            num_players: 1,
            host_address: LOCALHOST,
            ..Default::default()
        };
        roster.players[0] = Player {
            id: 0,
            name: name.clone(),
            status: PlayerStatus::Host,
            address: LOCALHOST,
            ping: 0,
            is_local: true,
        };

        let discovery = match Discovery::start() {
            Ok(d) => Some(d),
            Err(e) => {
                // The session still works without beacons; peers can join
                // by address.
                warn!(error = %e, "lan: discovery unavailable");
                None
            }
        };

        let session = Arc::new(Self {
            transport,
            discovery: Mutex::new(discovery),
            roster: Mutex::new(roster),
            rx_queue: Mutex::new(VecDeque::new()),
            last_host: Mutex::new(None),
            connected: AtomicU16::new(0),
            active: AtomicBool::new(true),
            is_host: true,
            my_id: AtomicU8::new(0),
            my_name: name,
            game_port: config.port,
            recv_timeout_ms: config.recv_timeout_ms,
            frame_count: AtomicU32::new(0),
            net_running: Arc::new(AtomicBool::new(false)),
            net_thread: Mutex::new(None),
        });

        session.install_event_callback();
        session.start_net_thread();
        info!(port = config.port, max_players, "lan: hosting session");
        Ok(session)
    }

    /// Join a host: synchronous handshake with a five second cap, then the
    /// network thread takes over.
    pub fn join(config: LanConfig, host: &str) -> Result<Arc<Self>, LanError> {
        let name = sanitize_name(&config.player_name)?;
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

        let transport = Arc::new(Transport::new());
        transport.start_mesh(host, config.port, LAN_MAX_PLAYERS, HANDSHAKE_TIMEOUT)?;

        // Step 2 of the handshake: wait for ClientInit from the host.
        let (assigned_id, max_players) = loop {
            if Instant::now() >= deadline {
                transport.stop();
                return Err(LanError::HandshakeTimeout);
            }
            let mut init: Option<(u8, u8)> = None;
            let mut violation = false;
            transport.poll(
                |peer, channel, payload| {
                    if peer != 0 || channel != CHANNEL_CONTROL || init.is_some() {
                        return;
                    }
                    match LanCommand::decode(payload) {
                        Ok(LanCommand::ClientInit {
                            assigned_id,
                            max_players,
                        }) => init = Some((assigned_id, max_players)),
                        _ => violation = true,
                    }
                },
                10,
            );
            if violation {
                transport.stop();
                return Err(LanError::HandshakeRejected("unexpected handshake command"));
            }
            if let Some(init) = init {
                break init;
            }
        };

        if assigned_id as usize >= LAN_MAX_PLAYERS {
            transport.stop();
            return Err(LanError::HandshakeRejected("assigned ID out of range"));
        }

        // Step 3: announce ourselves under the assigned ID.
        let me = Player {
            id: assigned_id,
            name: name.clone(),
            status: PlayerStatus::Connecting,
            address: 0,
            ping: 0,
            is_local: false,
        };
        transport.send_to(
            0,
            &LanCommand::PlayerInfo(me.clone()).encode(),
            CHANNEL_CONTROL,
            true,
        )?;
        transport.flush();

        let host_address = match transport.peer_addr(0) {
            Some(SocketAddr::V4(addr)) => u32::from(*addr.ip()),
            _ => 0,
        };

        let mut roster = Roster {
            max_players,
            host_address,
            ..Default::default()
        };
        roster.players[assigned_id as usize] = me;
        roster.peers[0] = Some(0);

        let session = Arc::new(Self {
            transport,
            discovery: Mutex::new(None),
            roster: Mutex::new(roster),
            rx_queue: Mutex::new(VecDeque::new()),
            last_host: Mutex::new(None),
            connected: AtomicU16::new(0),
            active: AtomicBool::new(true),
            is_host: false,
            my_id: AtomicU8::new(assigned_id),
            my_name: name,
            game_port: config.port,
            recv_timeout_ms: config.recv_timeout_ms,
            frame_count: AtomicU32::new(0),
            net_running: Arc::new(AtomicBool::new(false)),
            net_thread: Mutex::new(None),
        });

        session.install_event_callback();
        session.start_net_thread();
        info!(id = assigned_id, host, "lan: joined session");
        Ok(session)
    }

    // ---- accessors ----

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn local_player_id(&self) -> u8 {
        self.my_id.load(Ordering::Relaxed)
    }

    pub fn connected_bitmask(&self) -> u16 {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn num_players(&self) -> u8 {
        self.roster.lock().num_players
    }

    /// Roster snapshot with the address fixups the UI expects: the local
    /// entry reports loopback, host entries report the observed address.
    pub fn player_list(&self) -> Vec<Player> {
        let my_id = self.local_player_id();
        let roster = self.roster.lock();
        roster
            .players
            .iter()
            .filter(|p| p.status != PlayerStatus::None)
            .map(|p| {
                let mut p = p.clone();
                if p.id == my_id {
                    p.is_local = true;
                    p.address = LOCALHOST;
                } else {
                    p.is_local = false;
                    if p.status == PlayerStatus::Host {
                        p.address = roster.host_address;
                    }
                }
                p
            })
            .collect()
    }

    // ---- lifecycle ----

    /// The emulator is now actively participating: set our bit and tell
    /// every peer.
    pub fn begin(&self) {
        if !self.is_active() {
            return;
        }
        let my_id = self.local_player_id();
        info!(
            id = my_id,
            bitmask = self.connected.load(Ordering::Relaxed),
            "lan: begin"
        );
        self.connected.fetch_or(1 << my_id, Ordering::AcqRel);
        *self.last_host.lock() = None;
        let _ = self
            .transport
            .broadcast(&LanCommand::PlayerConnect.encode(), CHANNEL_CONTROL, true);
        self.transport.flush();
    }

    /// The emulator stopped participating.
    pub fn end(&self) {
        if !self.is_active() {
            return;
        }
        let my_id = self.local_player_id();
        info!(id = my_id, "lan: end");
        self.connected.fetch_and(!(1 << my_id), Ordering::AcqRel);
        let _ = self.transport.broadcast(
            &LanCommand::PlayerDisconnect.encode(),
            CHANNEL_CONTROL,
            true,
        );
        self.transport.flush();
    }

    /// Tear the session down synchronously. The network thread is joined
    /// before the transport goes away, so it can never observe a
    /// half-destroyed endpoint.
    pub fn end_session(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.net_running.store(false, Ordering::Release);
        if let Some(handle) = self.net_thread.lock().take() {
            // The final Arc may be dropped on the network thread itself;
            // joining ourselves would never return.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        *self.discovery.lock() = None;
        self.rx_queue.lock().clear();
        self.transport.stop();
        info!("lan: session ended");
    }

    /// Once-per-frame upkeep: discovery beacon, stale purge, transport
    /// flush, and a roster ping refresh every second.
    pub fn process(&self) {
        if !self.is_active() {
            return;
        }

        if self.is_host {
            let beacon = {
                let roster = self.roster.lock();
                DiscoveryBeacon {
                    tick: 0,
                    session_name: format!("{}'s game", self.my_name),
                    num_players: roster.num_players,
                    max_players: roster.max_players,
                    status: 0,
                }
            };
            if let Some(discovery) = self.discovery.lock().as_ref() {
                discovery.advertise(beacon);
            }
        }

        {
            let mut queue = self.rx_queue.lock();
            purge_stale(&mut queue, tick_ms());
        }
        self.transport.flush();

        let frames = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
        if frames >= PING_REFRESH_FRAMES {
            self.frame_count.store(0, Ordering::Relaxed);
            self.refresh_pings();
        }
    }

    fn refresh_pings(&self) {
        let my_id = self.local_player_id();
        let targets: Vec<(usize, usize)> = {
            let roster = self.roster.lock();
            roster
                .players
                .iter()
                .enumerate()
                .filter(|(i, p)| p.status != PlayerStatus::None && *i != my_id as usize)
                .filter_map(|(i, _)| roster.peers[i].map(|peer| (i, peer)))
                .collect()
        };
        let rtts: Vec<(usize, u32)> = targets
            .into_iter()
            .map(|(i, peer)| (i, self.transport.peer_rtt(peer)))
            .collect();
        let mut roster = self.roster.lock();
        for (i, rtt) in rtts {
            roster.players[i].ping = rtt;
        }
    }

    // ---- MP send path ----

    pub fn send_packet(&self, body: &[u8], timestamp: u64) -> usize {
        self.send_generic(MP_NORMAL, body, timestamp)
    }

    pub fn send_cmd(&self, body: &[u8], timestamp: u64) -> usize {
        self.send_generic(MP_CMD, body, timestamp)
    }

    pub fn send_reply(&self, body: &[u8], timestamp: u64, aid: u16) -> usize {
        self.send_generic(MP_REPLY | ((aid as u32) << 16), body, timestamp)
    }

    pub fn send_ack(&self, body: &[u8], timestamp: u64) -> usize {
        self.send_generic(MP_ACK, body, timestamp)
    }

    fn send_generic(&self, kind: u32, body: &[u8], timestamp: u64) -> usize {
        if !self.is_active() {
            return 0;
        }
        let max = if kind & 0xFFFF == MP_REPLY {
            MP_MAX_REPLY_BODY
        } else {
            MP_MAX_BODY
        };
        let body = &body[..body.len().min(max)];

        let header = MpHeader {
            sender_id: self.local_player_id() as u32,
            kind,
            length: body.len() as u32,
            timestamp,
        };
        let mut packet = vec![0u8; MpHeader::LEN + body.len()];
        let mut hbuf = [0u8; MpHeader::LEN];
        header.encode_into(&mut hbuf);
        packet[..MpHeader::LEN].copy_from_slice(&hbuf);
        packet[MpHeader::LEN..].copy_from_slice(body);

        // Replies go straight back to whoever sent the last command when we
        // know them; everything else is broadcast.
        let reply_target = if kind & 0xFFFF == MP_REPLY {
            let last = *self.last_host.lock();
            last.map(|(_, peer)| peer)
        } else {
            None
        };
        let result = match reply_target {
            Some(peer) => self
                .transport
                .send_to(peer, &packet, CHANNEL_PAYLOAD, true),
            None => self.transport.broadcast(&packet, CHANNEL_PAYLOAD, true),
        };
        if let Err(e) = result {
            trace!(error = %e, "lan: MP send failed");
            return 0;
        }
        self.transport.flush();
        body.len()
    }

    // ---- MP receive path ----

    /// Non-blocking receive. Only a Normal frame at the queue head is
    /// consumed; anything else stays for `recv_host_packet`.
    pub fn recv_packet(&self, packet: &mut [u8]) -> Option<(usize, u64)> {
        self.recv_generic(packet, false)
    }

    /// Blocking-flavor receive: consumes whatever is at the head, napping
    /// briefly when the queue is empty so the emulator can retry.
    pub fn recv_host_packet(&self, packet: &mut [u8]) -> Option<(usize, u64)> {
        self.recv_generic(packet, true)
    }

    fn recv_generic(&self, packet: &mut [u8], block: bool) -> Option<(usize, u64)> {
        if !self.is_active() {
            return None;
        }

        let popped = {
            let mut queue = self.rx_queue.lock();
            purge_stale(&mut queue, tick_ms());
            let take = match queue.front() {
                None => false,
                Some(front) => block || front.header.kind & 0xFFFF == MP_NORMAL,
            };
            if take {
                queue.pop_front()
            } else {
                None
            }
        };

        match popped {
            Some(pkt) => {
                let len = (pkt.header.length as usize)
                    .min(MP_MAX_BODY)
                    .min(pkt.body.len())
                    .min(packet.len());
                packet[..len].copy_from_slice(&pkt.body[..len]);
                if pkt.header.kind == MP_CMD {
                    *self.last_host.lock() =
                        Some((pkt.header.sender_id as u8, pkt.peer_idx));
                }
                Some((len, pkt.header.timestamp))
            }
            None => {
                if block {
                    std::thread::sleep(RECV_NAP);
                }
                None
            }
        }
    }

    /// Collect replies to a command we sent at `timestamp`.
    ///
    /// Drains reply frames into `out` at `(aid - 1) * 1024`, setting bit
    /// `1 << aid` per responder. Returns when every connected instance
    /// answered, when `aid_mask` is fully covered, or when the receive
    /// budget runs out.
    pub fn recv_replies(&self, out: &mut [u8], timestamp: u64, aid_mask: u16) -> u16 {
        if !self.is_active() {
            return 0;
        }

        let mut ret: u16 = 0;
        let mut inst_mask: u16 = 1 << self.local_player_id();
        let mut connected = self.connected.load(Ordering::Relaxed);
        if inst_mask & connected == connected {
            return 0;
        }

        let start = Instant::now();
        let budget = Duration::from_millis(self.recv_timeout_ms as u64);

        loop {
            {
                let mut queue = self.rx_queue.lock();
                while let Some(pkt) = queue.pop_front() {
                    // Tolerate a lagging timestamp, modulo 2^64.
                    let good = pkt.header.is_reply()
                        && pkt.header.timestamp
                            >= timestamp.wrapping_sub(TIMESTAMP_TOLERANCE);
                    if !good {
                        continue;
                    }

                    let aid = pkt.header.aid();
                    if pkt.header.length > 0 && (1..=15).contains(&aid) {
                        let len = (pkt.header.length as usize)
                            .min(MP_MAX_REPLY_BODY)
                            .min(pkt.body.len());
                        let off = (aid as usize - 1) * MP_MAX_REPLY_BODY;
                        if out.len() >= off + len {
                            out[off..off + len].copy_from_slice(&pkt.body[..len]);
                        }
                        ret |= 1 << aid;
                    }

                    inst_mask |= 1 << (pkt.header.sender_id & 0xF);
                    connected = self.connected.load(Ordering::Relaxed);
                    if inst_mask & connected == connected || ret & aid_mask == aid_mask {
                        return ret;
                    }
                }
            }

            if start.elapsed() >= budget {
                return ret;
            }
            std::thread::sleep(REPLY_NAP);
        }
    }

    // ---- network thread ----

    fn install_event_callback(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.transport
            .set_event_callback(Arc::new(move |peer_idx, connected| {
                if let Some(session) = weak.upgrade() {
                    session.on_transport_event(peer_idx, connected);
                }
            }));
    }

    fn start_net_thread(self: &Arc<Self>) {
        if self.net_running.swap(true, Ordering::AcqRel) {
            return;
        }
        // The thread holds only a weak handle so an abandoned session can
        // still unwind: the loop exits on the next tick once the last
        // strong reference is gone.
        let weak = Arc::downgrade(self);
        let running = Arc::clone(&self.net_running);
        let handle = std::thread::Builder::new()
            .name("lan-net".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let Some(session) = weak.upgrade() else { break };
                    session.transport.poll(
                        |peer, channel, payload| session.on_packet(peer, channel, payload),
                        0,
                    );
                    drop(session);
                    std::thread::sleep(NET_THREAD_NAP);
                }
            })
            .expect("spawn lan network thread");
        *self.net_thread.lock() = Some(handle);
    }

    fn on_packet(&self, peer_idx: usize, channel: u8, payload: &[u8]) {
        if channel == CHANNEL_PAYLOAD {
            match MpHeader::decode(payload) {
                Ok((header, body))
                    if header.sender_id != self.local_player_id() as u32 =>
                {
                    let mut queue = self.rx_queue.lock();
                    queue.push_back(RxPacket {
                        header,
                        body: Bytes::copy_from_slice(body),
                        recv_tick: tick_ms(),
                        peer_idx,
                    });
                }
                // Own broadcast loopback or garbage: destroyed.
                _ => {}
            }
            return;
        }

        match LanCommand::decode(payload) {
            Ok(command) => self.on_command(peer_idx, command),
            Err(e) => {
                debug!(peer_idx, error = %e, "lan: bad control command");
                self.drop_peer(peer_idx);
            }
        }
    }

    fn on_command(&self, peer_idx: usize, command: LanCommand) {
        match command {
            LanCommand::PlayerInfo(player) if self.is_host => {
                self.host_on_player_info(peer_idx, player)
            }
            LanCommand::PlayerList {
                num_players,
                players,
            } if !self.is_host => self.client_on_player_list(num_players, players),
            LanCommand::PlayerConnect => {
                if let Some(id) = self.player_for_peer(peer_idx) {
                    self.connected.fetch_or(1 << id, Ordering::AcqRel);
                }
            }
            LanCommand::PlayerDisconnect => {
                if let Some(id) = self.player_for_peer(peer_idx) {
                    self.connected.fetch_and(!(1 << id), Ordering::AcqRel);
                }
            }
            other => {
                trace!(peer_idx, ?other, "lan: ignoring command");
            }
        }
    }

    fn on_transport_event(&self, peer_idx: usize, connected: bool) {
        if connected {
            if self.is_host {
                self.host_on_connect(peer_idx);
            } else {
                self.client_on_connect(peer_idx);
            }
        } else {
            self.on_peer_lost(peer_idx);
        }
    }

    fn host_on_connect(&self, peer_idx: usize) {
        let address = self.peer_ipv4(peer_idx);
        let assigned = {
            let mut roster = self.roster.lock();
            if roster.num_players >= roster.max_players {
                None
            } else {
                lowest_free_slot(&roster).map(|id| {
                    roster.players[id] = Player {
                        id: id as u8,
                        name: String::new(),
                        status: PlayerStatus::Connecting,
                        address,
                        ping: 0,
                        is_local: false,
                    };
                    roster.peers[id] = Some(peer_idx);
                    roster.num_players += 1;
                    (id as u8, roster.max_players)
                })
            }
        };

        match assigned {
            Some((id, max_players)) => {
                debug!(peer_idx, id, "lan: assigning player slot");
                let cmd = LanCommand::ClientInit {
                    assigned_id: id,
                    max_players,
                };
                let _ = self
                    .transport
                    .send_to(peer_idx, &cmd.encode(), CHANNEL_CONTROL, true);
                self.transport.flush();
            }
            None => {
                debug!(peer_idx, "lan: session full, rejecting");
                self.transport.disconnect_peer(peer_idx);
            }
        }
    }

    fn host_on_player_info(&self, peer_idx: usize, player: Player) {
        let address = self.peer_ipv4(peer_idx);
        let accepted = {
            let mut roster = self.roster.lock();
            match player_for_peer_locked(&roster, peer_idx) {
                Some(id) if player.id as usize == id => {
                    roster.players[id] = Player {
                        id: id as u8,
                        name: player.name,
                        status: PlayerStatus::Client,
                        address,
                        ping: 0,
                        is_local: false,
                    };
                    true
                }
                _ => false,
            }
        };

        if accepted {
            self.broadcast_player_list();
        } else {
            // Asserted ID does not match the slot we assigned.
            debug!(peer_idx, "lan: player info mismatch");
            self.drop_peer(peer_idx);
        }
    }

    fn broadcast_player_list(&self) {
        let cmd = {
            let roster = self.roster.lock();
            LanCommand::PlayerList {
                num_players: roster.num_players,
                players: roster.players.clone(),
            }
        };
        let _ = self
            .transport
            .broadcast(&cmd.encode(), CHANNEL_CONTROL, true);
        self.transport.flush();
    }

    fn client_on_player_list(
        &self,
        num_players: u8,
        players: Box<[Player; LAN_MAX_PLAYERS]>,
    ) {
        let my_id = self.local_player_id();
        let dials = {
            let mut roster = self.roster.lock();
            roster.num_players = num_players;
            roster.players = players;
            mesh_targets(
                &roster.players,
                my_id,
                &roster.peers,
                roster.host_address,
            )
        };

        // Build the mesh: one outbound connect per newly announced client.
        for (player_idx, address) in dials {
            let addr = SocketAddr::from((Ipv4Addr::from(address), self.game_port));
            match self.transport.connect(addr) {
                Ok(peer_idx) => {
                    debug!(player_idx, %addr, "lan: dialing mesh peer");
                    self.roster.lock().peers[player_idx] = Some(peer_idx);
                }
                Err(e) => warn!(player_idx, %addr, error = %e, "lan: mesh dial failed"),
            }
        }
    }

    fn client_on_connect(&self, peer_idx: usize) {
        let address = self.peer_ipv4(peer_idx);
        let my_id = self.local_player_id();
        let mut roster = self.roster.lock();

        // Outbound mesh dial completing?
        if roster.peers.iter().any(|p| *p == Some(peer_idx)) {
            return;
        }

        // Another client dialed us: adopt the slot their address announces.
        let matched = roster.players.iter().position(|p| {
            p.id != my_id && p.status == PlayerStatus::Client && p.address == address
        });
        match matched {
            Some(id) => {
                debug!(peer_idx, id, "lan: inbound mesh peer adopted");
                roster.peers[id] = Some(peer_idx);
            }
            None => {
                drop(roster);
                debug!(peer_idx, "lan: inbound peer matches no roster entry");
                self.transport.disconnect_peer(peer_idx);
            }
        }
    }

    fn on_peer_lost(&self, peer_idx: usize) {
        let id = {
            let mut roster = self.roster.lock();
            let id = player_for_peer_locked(&roster, peer_idx);
            if let Some(id) = id {
                roster.peers[id] = None;
                if self.is_host {
                    roster.players[id] = Player::default();
                    roster.num_players = roster.num_players.saturating_sub(1);
                } else {
                    roster.players[id].status = PlayerStatus::Disconnected;
                }
            }
            id
        };

        if let Some(id) = id {
            info!(id, "lan: player disconnected");
            self.connected.fetch_and(!(1 << id), Ordering::AcqRel);
            if self.is_host {
                self.broadcast_player_list();
            }
        }
    }

    /// Disconnect a misbehaving peer and clean up its roster slot.
    fn drop_peer(&self, peer_idx: usize) {
        self.transport.disconnect_peer(peer_idx);
        self.on_peer_lost(peer_idx);
    }

    fn player_for_peer(&self, peer_idx: usize) -> Option<usize> {
        player_for_peer_locked(&self.roster.lock(), peer_idx)
    }

    fn peer_ipv4(&self, peer_idx: usize) -> u32 {
        match self.transport.peer_addr(peer_idx) {
            Some(SocketAddr::V4(addr)) => u32::from(*addr.ip()),
            _ => 0,
        }
    }
}

impl Drop for LanSession {
    fn drop(&mut self) {
        self.end_session();
    }
}

fn sanitize_name(name: &str) -> Result<String, LanError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LanError::InvalidConfig("player name must not be empty"));
    }
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    Ok(name[..end].to_string())
}

/// First slot a new player may take: the lowest index that is either past
/// the current roster or empty.
fn lowest_free_slot(roster: &Roster) -> Option<usize> {
    (0..LAN_MAX_PLAYERS)
        .find(|&i| i >= roster.num_players as usize || roster.players[i].status == PlayerStatus::None)
}

/// Which roster entries a client must dial to complete the mesh: every
/// other client with an announced address we have no peer for yet. Entries
/// announcing the host's address are reachable through the host connection
/// and are never dialed.
fn mesh_targets(
    players: &[Player; LAN_MAX_PLAYERS],
    my_id: u8,
    peers: &[Option<usize>; LAN_MAX_PLAYERS],
    host_address: u32,
) -> Vec<(usize, u32)> {
    players
        .iter()
        .enumerate()
        .filter(|(i, p)| {
            *i != my_id as usize
                && p.status == PlayerStatus::Client
                && peers[*i].is_none()
                && p.address != 0
                && p.address != host_address
        })
        .map(|(i, p)| (i, p.address))
        .collect()
}

fn player_for_peer_locked(roster: &Roster, peer_idx: usize) -> Option<usize> {
    roster.peers.iter().position(|p| *p == Some(peer_idx))
}

/// Drop queue heads whose receive tick is in the future (clock skew) or
/// older than the staleness window.
fn purge_stale(queue: &mut VecDeque<RxPacket>, now: u32) {
    while let Some(front) = queue.front() {
        let age = now.wrapping_sub(front.recv_tick) as i32;
        if age < 0 || age > MP_STALE_MS as i32 {
            queue.pop_front();
        } else {
            break;
        }
    }
}

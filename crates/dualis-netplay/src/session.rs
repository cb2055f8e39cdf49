//! Host/client lockstep session.
//!
//! The session owns the instance fleet and drives it one frame at a time:
//! buffered inputs are applied, the workers are released through the frame
//! barrier, scanlines are collected, and every second the fleet state is
//! hashed and cross-checked against the remote side.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh64::{xxh64, Xxh64};

use dualis_netproto::constants::NETPLAY_MAX_PLAYERS;
use dualis_netproto::input::InputFrame;
use dualis_netproto::netplay::{BlobType, ControlMessage, InputMessage};
use dualis_transport::{Transport, CHANNEL_CONTROL, CHANNEL_PAYLOAD};

use crate::barrier::FrameBarrier;
use crate::blob::{self, BlobBank};
use crate::error::NetplayError;
use crate::input_ring::{InputRing, RING_SIZE};
use crate::instance::{Cart, CartParser, Console, LocalLink};

/// Disconnect reasons carried by the 0xFF control message.
pub const DISCONNECT_NORMAL: u8 = 0;
pub const DISCONNECT_DESYNC: u8 = 1;
pub const DISCONNECT_ERROR: u8 = 2;

/// State hashes are computed and exchanged every this many frames.
const DESYNC_CHECK_INTERVAL: u32 = 60;
/// Client connect handshake cap.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Instance = Arc<Mutex<Box<dyn Console>>>;

/// `(frame, local_hash, remote_hash)` on a confirmed state divergence.
pub type DesyncCallback = Arc<dyn Fn(u32, u64, u64) + Send + Sync>;
/// `(player_id, reason)` when a peer goes away.
pub type DisconnectCallback = Arc<dyn Fn(u8, u8) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_desync: Mutex<Option<DesyncCallback>>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
}

pub struct NetplaySession {
    transport: Arc<Transport>,
    callbacks: Arc<Callbacks>,

    local_id: u8,
    num_players: u8,
    host_mode: bool,
    input_delay: AtomicU32,
    current_frame: AtomicU32,

    ring: Mutex<InputRing>,
    instances: Mutex<Vec<Instance>>,
    local_link: Arc<LocalLink>,
    scanlines: Arc<Vec<AtomicU32>>,

    barrier: Mutex<Option<Arc<FrameBarrier>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    workers_running: Arc<AtomicBool>,

    blobs: Mutex<BlobBank>,
    rom_hash: AtomicU64,
    last_hash: AtomicU64,
    last_hash_frame: AtomicU32,
    game_started: AtomicBool,
    active: AtomicBool,
}

impl NetplaySession {
    /// Set up a session for `num_players` instances with the given input
    /// delay. The ring is prefilled with neutral inputs for the delay
    /// window. Host mode iff `local_id == 0`.
    pub fn new(
        local_id: u8,
        num_players: u8,
        input_delay: u32,
    ) -> Result<Arc<Self>, NetplayError> {
        if !(2..=NETPLAY_MAX_PLAYERS as u8).contains(&num_players) {
            return Err(NetplayError::InvalidConfig("player count must be 2..=4"));
        }
        if local_id >= num_players {
            return Err(NetplayError::InvalidConfig("local player ID out of range"));
        }
        if input_delay as usize >= RING_SIZE {
            return Err(NetplayError::InvalidConfig("input delay exceeds ring size"));
        }

        let mut ring = InputRing::new(num_players as usize);
        ring.prefill(input_delay);

        info!(local_id, num_players, input_delay, "netplay: session initialized");
        Ok(Arc::new(Self {
            transport: Arc::new(Transport::new()),
            callbacks: Arc::new(Callbacks::default()),
            local_id,
            num_players,
            host_mode: local_id == 0,
            input_delay: AtomicU32::new(input_delay),
            current_frame: AtomicU32::new(0),
            ring: Mutex::new(ring),
            instances: Mutex::new(Vec::new()),
            local_link: Arc::new(LocalLink::new(num_players as usize)),
            scanlines: Arc::new(
                (0..num_players).map(|_| AtomicU32::new(0)).collect(),
            ),
            barrier: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            workers_running: Arc::new(AtomicBool::new(false)),
            blobs: Mutex::new(BlobBank::default()),
            rom_hash: AtomicU64::new(0),
            last_hash: AtomicU64::new(0),
            last_hash_frame: AtomicU32::new(0),
            game_started: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }))
    }

    // ---- accessors ----

    pub fn is_host(&self) -> bool {
        self.host_mode
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn local_player_id(&self) -> u8 {
        self.local_id
    }

    pub fn num_players(&self) -> u8 {
        self.num_players
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn input_delay(&self) -> u32 {
        self.input_delay.load(Ordering::Acquire)
    }

    pub fn game_started(&self) -> bool {
        self.game_started.load(Ordering::Acquire)
    }

    pub fn local_link(&self) -> &Arc<LocalLink> {
        &self.local_link
    }

    pub fn set_desync_callback(&self, cb: DesyncCallback) {
        *self.callbacks.on_desync.lock() = Some(cb);
    }

    pub fn set_disconnect_callback(&self, cb: DisconnectCallback) {
        *self.callbacks.on_disconnect.lock() = Some(cb);
    }

    // ---- fleet setup ----

    /// Build the instance fleet. The factory is called once per instance;
    /// each is reset, attached to the local wireless crossbar, and every
    /// non-local instance has its sound chip powered off.
    pub fn create_instances(
        &self,
        mut factory: impl FnMut(usize) -> Result<Box<dyn Console>, crate::instance::ConsoleError>,
    ) -> Result<(), NetplayError> {
        let mut instances = self.instances.lock();
        if !instances.is_empty() {
            return Err(NetplayError::InvalidConfig("instances already created"));
        }
        for i in 0..self.num_players as usize {
            let mut console = factory(i)?;
            console.reset();
            self.local_link.begin(i);
            if i != self.local_id as usize {
                console.set_sound_power(false);
            }
            instances.push(Arc::new(Mutex::new(console)));
        }
        info!(count = self.num_players, "netplay: instances created");
        Ok(())
    }

    /// Load a ROM into every instance. The cart moves into instance 0; the
    /// rest get fresh carts parsed from the same image, since carts own
    /// mutable save memory.
    pub fn load_rom(
        &self,
        cart: Box<dyn Cart>,
        parser: CartParser<'_>,
    ) -> Result<(), NetplayError> {
        let instances = self.instance_arcs();
        if instances.is_empty() {
            return Err(NetplayError::SyncFailed("instances not created"));
        }

        let rom = cart.rom().to_vec();
        if rom.is_empty() {
            return Err(NetplayError::InvalidConfig("empty ROM image"));
        }
        self.rom_hash.store(xxh64(&rom, 0), Ordering::Release);

        insert_and_boot(&instances[0], cart)?;
        for instance in &instances[1..] {
            insert_and_boot(instance, parser(&rom)?)?;
        }
        info!(instances = instances.len(), "netplay: ROM loaded");
        Ok(())
    }

    pub fn rom_hash(&self) -> u64 {
        self.rom_hash.load(Ordering::Acquire)
    }

    // ---- input flow ----

    /// Buffer the local player's input for `current_frame + input_delay`.
    pub fn set_local_input(&self, input: InputFrame) {
        let stamped = self.stamp(input);
        self.ring.lock().set(self.local_id as usize, stamped);
    }

    /// Broadcast the local input for the same delayed frame to every peer.
    pub fn send_local_input(&self, input: InputFrame) {
        let stamped = self.stamp(input);
        let message = InputMessage::Frame(stamped).encode();
        if let Err(e) = self.transport.broadcast(&message, CHANNEL_PAYLOAD, true) {
            debug!(error = %e, "netplay: input send failed");
            return;
        }
        self.transport.flush();
    }

    fn stamp(&self, mut input: InputFrame) -> InputFrame {
        input.frame_num = self
            .current_frame
            .load(Ordering::Acquire)
            .wrapping_add(self.input_delay.load(Ordering::Acquire));
        input
    }

    /// Store an input received from the network at the frame it carries.
    pub fn set_remote_input(&self, player_id: u8, input: InputFrame) {
        if player_id >= self.num_players {
            return;
        }
        self.ring.lock().set(player_id as usize, input);
    }

    /// True iff every player's input for `frame` is buffered and unconsumed.
    pub fn ready_for_frame(&self, frame: u32) -> bool {
        self.ring.lock().ready_for_frame(frame)
    }

    // ---- frame driver ----

    /// Run one frame on every instance in parallel.
    ///
    /// Returns the scanline count of the local player's instance. Errors
    /// with [`NetplayError::InputNotReady`] (without advancing) when some
    /// player's input has not arrived, and [`NetplayError::SessionPoisoned`]
    /// when a worker died, in which case the session has been shut down.
    pub fn run_frame(&self) -> Result<u32, NetplayError> {
        if !self.is_active() {
            return Err(NetplayError::NotActive);
        }
        let frame = self.current_frame.load(Ordering::Acquire);
        if !self.ready_for_frame(frame) {
            return Err(NetplayError::InputNotReady);
        }

        self.apply_inputs(frame)?;
        self.ensure_workers()?;

        let barrier = self
            .barrier
            .lock()
            .clone()
            .ok_or(NetplayError::SessionPoisoned)?;

        // Rendezvous #1 releases the workers into RunFrame; #2 collects
        // their scanline counts.
        for _ in 0..2 {
            if barrier.wait().is_err() {
                error!("netplay: worker failed, aborting session");
                self.stop();
                return Err(NetplayError::SessionPoisoned);
            }
        }

        if frame > 0 && frame % DESYNC_CHECK_INTERVAL == 0 {
            let hash = self.compute_state_hash()?;
            self.last_hash.store(hash, Ordering::Release);
            self.last_hash_frame.store(frame, Ordering::Release);

            if self.transport.is_active() && self.transport.connected_peers() > 0 {
                let alert = ControlMessage::DesyncAlert { frame, hash }.encode();
                let _ = self.transport.broadcast(&alert, CHANNEL_CONTROL, true);
                self.transport.flush();
            }
        }

        self.current_frame.store(frame.wrapping_add(1), Ordering::Release);
        Ok(self.scanlines[self.local_id as usize].load(Ordering::Acquire))
    }

    fn apply_inputs(&self, frame: u32) -> Result<(), NetplayError> {
        let instances = self.instance_arcs();
        if instances.is_empty() {
            return Err(NetplayError::SyncFailed("instances not created"));
        }
        let inputs = self.ring.lock().take_frame(frame);
        for (instance, input) in instances.iter().zip(inputs) {
            let mut console = instance.lock();
            console.set_key_mask(input.key_mask);
            if input.touching {
                console.touch_screen(input.touch_x, input.touch_y);
            } else {
                console.release_screen();
            }
            console.set_lid_closed(input.lid_closed);
        }
        Ok(())
    }

    fn ensure_workers(&self) -> Result<(), NetplayError> {
        if self.workers_running.load(Ordering::Acquire) {
            return Ok(());
        }

        let instances = self.instance_arcs();
        let barrier = Arc::new(FrameBarrier::new(instances.len() + 1));
        *self.barrier.lock() = Some(barrier.clone());
        self.workers_running.store(true, Ordering::Release);

        let mut workers = self.workers.lock();
        for (i, instance) in instances.into_iter().enumerate() {
            let worker_barrier = barrier.clone();
            let running = self.workers_running.clone();
            let scanlines = self.scanlines.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("netplay-inst-{i}"))
                .spawn(move || worker_main(i, instance, worker_barrier, running, scanlines));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(_) => {
                    // Unwind the partial fleet or a later stop() would park
                    // forever on an under-populated barrier.
                    barrier.poison();
                    self.workers_running.store(false, Ordering::Release);
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    *self.barrier.lock() = None;
                    return Err(NetplayError::SyncFailed("worker spawn failed"));
                }
            }
        }
        info!(count = workers.len(), "netplay: instance workers started");
        Ok(())
    }

    // ---- desync detection ----

    /// Fold main RAM and both CPU register files of every instance through
    /// a streaming 64-bit hash, in instance order.
    pub fn compute_state_hash(&self) -> Result<u64, NetplayError> {
        let instances = self.instance_arcs();
        let mut hasher = Xxh64::new(0);
        for instance in &instances {
            let console = instance.lock();
            hasher.update(console.main_ram());
            for file in console.cpu_registers() {
                for reg in file {
                    hasher.update(&reg.to_le_bytes());
                }
            }
        }
        Ok(hasher.digest())
    }

    // ---- network ----

    /// Host: listen for joining clients. A connecting peer is greeted with
    /// a `SessionOffer`.
    pub fn host_start(self: &Arc<Self>, port: u16) -> Result<(), NetplayError> {
        self.install_event_callback();
        self.transport
            .start_host(port, self.num_players as usize - 1)?;
        info!(port, "netplay: hosting");
        Ok(())
    }

    /// Client: connect to the host, blocking up to five seconds.
    pub fn client_connect(self: &Arc<Self>, host: &str, port: u16) -> Result<(), NetplayError> {
        self.install_event_callback();
        self.transport.start_client(host, port, CONNECT_TIMEOUT)?;
        info!(host, port, "netplay: connected to host");
        Ok(())
    }

    /// Drain the transport: control messages, input frames, connection
    /// events. Call once per frame.
    pub fn process_network(&self) {
        if !self.transport.is_active() {
            return;
        }
        self.transport.poll(
            |peer, channel, payload| match channel {
                CHANNEL_CONTROL => self.on_control_payload(peer, payload),
                _ => self.on_input_payload(peer, payload),
            },
            0,
        );
    }

    fn install_event_callback(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.transport
            .set_event_callback(Arc::new(move |peer_idx, connected| {
                if let Some(session) = weak.upgrade() {
                    session.on_transport_event(peer_idx, connected);
                }
            }));
    }

    fn on_transport_event(&self, peer_idx: usize, connected: bool) {
        if connected {
            info!(peer_idx, "netplay: peer connected");
            if self.host_mode {
                let offer = ControlMessage::SessionOffer {
                    rom_hash: self.rom_hash(),
                    num_players: self.num_players,
                    input_delay: self.input_delay() as u8,
                }
                .encode();
                let _ = self
                    .transport
                    .send_to(peer_idx, &offer, CHANNEL_CONTROL, true);
                self.transport.flush();
            }
        } else {
            let player = self.player_for_peer(peer_idx);
            info!(peer_idx, player, "netplay: peer disconnected");
            self.fire_disconnect(player, DISCONNECT_NORMAL);
        }
    }

    fn on_control_payload(&self, peer_idx: usize, payload: &[u8]) {
        let message = match ControlMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer_idx, error = %e, "netplay: bad control message, dropping peer");
                self.transport.disconnect_peer(peer_idx);
                self.fire_disconnect(self.player_for_peer(peer_idx), DISCONNECT_ERROR);
                return;
            }
        };
        self.on_control(peer_idx, message);
    }

    fn on_control(&self, peer_idx: usize, message: ControlMessage<'_>) {
        match message {
            ControlMessage::SessionOffer {
                rom_hash,
                num_players,
                input_delay,
            } => {
                if self.host_mode {
                    return;
                }
                info!(num_players, input_delay, "netplay: received session offer");
                if num_players != self.num_players {
                    warn!("netplay: player count mismatch with host");
                    self.fail_handshake();
                    return;
                }
                if self.rom_hash() != 0 && rom_hash != self.rom_hash() {
                    warn!("netplay: ROM hash mismatch with host");
                    self.fail_handshake();
                    return;
                }
                // Player ID 0 is a placeholder; the host knows who we are.
                let accept = ControlMessage::SessionAccept { player_id: 0 }.encode();
                let _ = self
                    .transport
                    .send_to(peer_idx, &accept, CHANNEL_CONTROL, true);
                self.transport.flush();
            }
            ControlMessage::SessionAccept { .. } => {
                if self.host_mode {
                    if let Err(e) = self.host_send_states(peer_idx) {
                        error!(error = %e, "netplay: state streaming failed");
                    }
                }
            }
            ControlMessage::BlobStart { .. }
            | ControlMessage::BlobChunk { .. }
            | ControlMessage::BlobEnd { .. } => {
                let completed = self.blobs.lock().on_message(&message);
                if let Some(blob_type) = completed {
                    debug!(?blob_type, "netplay: blob received");
                    self.on_blob_complete(blob_type);
                }
            }
            ControlMessage::SyncReady => {
                info!(peer_idx, "netplay: peer is sync ready");
                if self.host_mode {
                    let start = ControlMessage::StartGame {
                        frame: self.current_frame(),
                        input_delay: self.input_delay() as u8,
                    }
                    .encode();
                    let _ = self.transport.broadcast(&start, CHANNEL_CONTROL, true);
                    self.transport.flush();
                    self.game_started.store(true, Ordering::Release);
                }
            }
            ControlMessage::StartGame { frame, input_delay } => {
                if self.host_mode {
                    return;
                }
                info!(frame, input_delay, "netplay: game starting");
                self.current_frame.store(frame, Ordering::Release);
                self.input_delay.store(input_delay as u32, Ordering::Release);
                if frame == 0 {
                    self.ring.lock().prefill(input_delay as u32);
                }
                self.game_started.store(true, Ordering::Release);
            }
            ControlMessage::DesyncAlert { frame, hash } => {
                let local_frame = self.last_hash_frame.load(Ordering::Acquire);
                let local_hash = self.last_hash.load(Ordering::Acquire);
                if frame == local_frame && hash != local_hash {
                    error!(
                        frame,
                        local_hash = format_args!("{local_hash:016X}"),
                        remote_hash = format_args!("{hash:016X}"),
                        "netplay: desync detected"
                    );
                    self.fire_desync(frame, local_hash, hash);
                }
            }
            ControlMessage::Disconnect { reason } => {
                let player = self.player_for_peer(peer_idx);
                info!(player, reason, "netplay: peer sent disconnect");
                self.fire_disconnect(player, reason);
            }
        }
    }

    fn on_input_payload(&self, peer_idx: usize, payload: &[u8]) {
        let message = match InputMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer_idx, error = %e, "netplay: bad input message, dropping peer");
                self.transport.disconnect_peer(peer_idx);
                self.fire_disconnect(self.player_for_peer(peer_idx), DISCONNECT_ERROR);
                return;
            }
        };

        let player = self.player_for_peer(peer_idx);
        // Uniform broadcast means our own frames can echo back through a
        // relay; drop them.
        if player == self.local_id {
            return;
        }
        match message {
            InputMessage::Frame(input) => self.set_remote_input(player, input),
            InputMessage::Batch(inputs) => {
                for input in inputs {
                    self.set_remote_input(player, input);
                }
            }
        }
    }

    /// Host: clients are players `peer + 1`; client: everything comes from
    /// the host, player 0.
    fn player_for_peer(&self, peer_idx: usize) -> u8 {
        if self.host_mode {
            peer_idx as u8 + 1
        } else {
            0
        }
    }

    // ---- state sync on join ----

    fn host_send_states(&self, peer_idx: usize) -> Result<(), NetplayError> {
        let instances = self.instance_arcs();
        if instances.is_empty() {
            return Err(NetplayError::SyncFailed("instances not created"));
        }

        for (i, instance) in instances.iter().enumerate() {
            let state = instance.lock().export_state()?;
            blob::send(
                &self.transport,
                peer_idx,
                BlobType::Savestate(i as u8),
                &state,
            )?;
        }

        let sram = instances[0].lock().sram();
        if let Some(sram) = sram.filter(|s| !s.is_empty()) {
            blob::send(&self.transport, peer_idx, BlobType::Sram, &sram)?;
        }
        Ok(())
    }

    fn on_blob_complete(&self, blob_type: BlobType) {
        match blob_type {
            BlobType::Sram => {
                let data = self.blobs.lock().receiver_mut(BlobType::Sram).take_data();
                let instances = self.instance_arcs();
                if let Some(first) = instances.first() {
                    first.lock().set_sram(&data);
                    info!(len = data.len(), "netplay: SRAM applied");
                }
            }
            BlobType::Savestate(_) => {
                if let Err(e) = self.try_apply_states() {
                    error!(error = %e, "netplay: applying synced state failed");
                }
            }
        }
    }

    /// Once every instance's savestate has arrived, load each at the index
    /// it was taken from and tell the host we are ready.
    fn try_apply_states(&self) -> Result<(), NetplayError> {
        let all_complete = {
            let blobs = self.blobs.lock();
            (0..self.num_players)
                .all(|i| blobs.receiver(BlobType::Savestate(i)).is_complete())
        };
        if !all_complete {
            return Ok(());
        }

        let instances = self.instance_arcs();
        if instances.len() != self.num_players as usize {
            return Err(NetplayError::SyncFailed("instances not created"));
        }

        for (i, instance) in instances.iter().enumerate() {
            let data = self
                .blobs
                .lock()
                .receiver_mut(BlobType::Savestate(i as u8))
                .take_data();
            instance.lock().import_state(&data)?;
        }
        info!("netplay: all savestates applied");

        let ready = ControlMessage::SyncReady.encode();
        self.transport.send_to(0, &ready, CHANNEL_CONTROL, true)?;
        self.transport.flush();
        Ok(())
    }

    // ---- teardown ----

    /// Synchronous shutdown: workers are woken with one extra barrier tick
    /// while no longer running, joined, and the transport is stopped.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown_workers();
        self.transport.stop();
        for i in 0..self.num_players as usize {
            self.local_link.end(i);
        }
        info!("netplay: session stopped");
    }

    fn shutdown_workers(&self) {
        if !self.workers_running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(barrier) = self.barrier.lock().clone() {
            // Workers are parked at the first rendezvous; one arrival wakes
            // them to observe the cleared running flag. A poisoned barrier
            // already released everyone.
            let _ = barrier.wait();
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        *self.barrier.lock() = None;
        debug!("netplay: instance workers stopped");
    }

    fn fail_handshake(&self) {
        self.fire_disconnect(0, DISCONNECT_ERROR);
        self.transport.stop();
    }

    fn instance_arcs(&self) -> Vec<Instance> {
        self.instances.lock().clone()
    }

    fn fire_desync(&self, frame: u32, local: u64, remote: u64) {
        let cb = self.callbacks.on_desync.lock().clone();
        if let Some(cb) = cb {
            cb(frame, local, remote);
        }
    }

    fn fire_disconnect(&self, player: u8, reason: u8) {
        let cb = self.callbacks.on_disconnect.lock().clone();
        if let Some(cb) = cb {
            cb(player, reason);
        }
    }
}

impl Drop for NetplaySession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn insert_and_boot(instance: &Instance, cart: Box<dyn Cart>) -> Result<(), NetplayError> {
    let mut console = instance.lock();
    console.insert_cart(cart)?;
    console.reset();
    if console.needs_direct_boot() {
        console.setup_direct_boot();
    }
    Ok(())
}

fn worker_main(
    index: usize,
    instance: Instance,
    barrier: Arc<FrameBarrier>,
    running: Arc<AtomicBool>,
    scanlines: Arc<Vec<AtomicU32>>,
) {
    loop {
        if barrier.wait().is_err() {
            break;
        }
        if !running.load(Ordering::Acquire) {
            break;
        }

        let outcome = {
            let mut console = instance.lock();
            catch_unwind(AssertUnwindSafe(|| console.run_frame()))
        };
        match outcome {
            Ok(lines) => scanlines[index].store(lines, Ordering::Release),
            Err(_) => {
                error!(index, "netplay: instance worker panicked");
                barrier.poison();
                break;
            }
        }

        if barrier.wait().is_err() {
            break;
        }
    }
}

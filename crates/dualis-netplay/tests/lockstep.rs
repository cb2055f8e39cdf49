//! End-to-end lockstep tests with a deterministic stub console.
//!
//! The stub mixes the applied key mask into its RAM every frame, so two
//! fleets fed identical inputs stay hash-identical and any injected
//! divergence shows up in the periodic state hash.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use dualis_netplay::{
    Cart, Console, ConsoleError, NetplayError, NetplaySession, DISCONNECT_ERROR,
};
use dualis_netproto::input::{InputFrame, NEUTRAL_KEY_MASK};

const RAM_SIZE: usize = 4096;
const SCANLINES: u32 = 263;

/// Out-of-band controls the test holds on a stub instance.
#[derive(Clone, Default)]
struct Probe {
    sound_on: Arc<AtomicBool>,
    /// Flip one RAM byte when the instance reaches this frame.
    poke_at: Arc<Mutex<Option<u32>>>,
    /// Panic inside run_frame at this frame.
    panic_at: Arc<Mutex<Option<u32>>>,
}

struct StubCart(Vec<u8>);

impl Cart for StubCart {
    fn rom(&self) -> &[u8] {
        &self.0
    }
}

struct StubConsole {
    probe: Probe,
    frame: u32,
    key_mask: u32,
    touch: Option<(u16, u16)>,
    lid: bool,
    ram: Vec<u8>,
    regs: [[u32; 16]; 2],
    sram: Vec<u8>,
    has_cart: bool,
}

impl StubConsole {
    fn new(probe: Probe) -> Self {
        probe.sound_on.store(true, Ordering::SeqCst);
        Self {
            probe,
            frame: 0,
            key_mask: NEUTRAL_KEY_MASK,
            touch: None,
            lid: false,
            ram: vec![0; RAM_SIZE],
            regs: [[0; 16]; 2],
            sram: vec![0xAB; 64],
            has_cart: false,
        }
    }
}

impl Console for StubConsole {
    fn reset(&mut self) {
        self.frame = 0;
        self.ram.fill(0);
        self.regs = [[0; 16]; 2];
    }

    fn run_frame(&mut self) -> u32 {
        if *self.probe.panic_at.lock() == Some(self.frame) {
            panic!("stub console failure injected at frame {}", self.frame);
        }
        if *self.probe.poke_at.lock() == Some(self.frame) {
            self.ram[0] ^= 0xFF;
        }

        let idx = self.frame as usize % RAM_SIZE;
        self.ram[idx] = self.ram[idx]
            .wrapping_add(self.key_mask as u8)
            .wrapping_add(self.frame as u8);
        self.regs[0][0] = self.frame;
        self.regs[1][0] = self.key_mask;
        self.frame += 1;
        SCANLINES
    }

    fn set_key_mask(&mut self, mask: u32) {
        self.key_mask = mask;
    }

    fn touch_screen(&mut self, x: u16, y: u16) {
        self.touch = Some((x, y));
    }

    fn release_screen(&mut self) {
        self.touch = None;
    }

    fn set_lid_closed(&mut self, closed: bool) {
        self.lid = closed;
    }

    fn insert_cart(&mut self, _cart: Box<dyn Cart>) -> Result<(), ConsoleError> {
        self.has_cart = true;
        Ok(())
    }

    fn needs_direct_boot(&self) -> bool {
        true
    }

    fn setup_direct_boot(&mut self) {}

    fn export_state(&mut self) -> Result<Vec<u8>, ConsoleError> {
        let mut out = Vec::with_capacity(4 + RAM_SIZE + 128);
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.extend_from_slice(&self.ram);
        for file in &self.regs {
            for reg in file {
                out.extend_from_slice(&reg.to_le_bytes());
            }
        }
        Ok(out)
    }

    fn import_state(&mut self, data: &[u8]) -> Result<(), ConsoleError> {
        if data.len() != 4 + RAM_SIZE + 128 {
            return Err(ConsoleError("bad state size".into()));
        }
        self.frame = u32::from_le_bytes(data[0..4].try_into().unwrap());
        self.ram.copy_from_slice(&data[4..4 + RAM_SIZE]);
        let mut offset = 4 + RAM_SIZE;
        for file in &mut self.regs {
            for reg in file.iter_mut() {
                *reg = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
                offset += 4;
            }
        }
        Ok(())
    }

    fn sram(&self) -> Option<Vec<u8>> {
        Some(self.sram.clone())
    }

    fn set_sram(&mut self, data: &[u8]) {
        self.sram = data.to_vec();
    }

    fn main_ram(&self) -> &[u8] {
        &self.ram
    }

    fn cpu_registers(&self) -> [[u32; 16]; 2] {
        self.regs
    }

    fn set_sound_power(&mut self, on: bool) {
        self.probe.sound_on.store(on, Ordering::SeqCst);
    }
}

fn parse_cart(rom: &[u8]) -> Result<Box<dyn Cart>, ConsoleError> {
    Ok(Box::new(StubCart(rom.to_vec())))
}

/// Build a session with stub instances and a loaded ROM; returns the
/// per-instance probes.
fn build_session(
    local_id: u8,
    players: u8,
    delay: u32,
    rom: &[u8],
) -> (Arc<NetplaySession>, Vec<Probe>) {
    let session = NetplaySession::new(local_id, players, delay).expect("session");
    let probes: Vec<Probe> = (0..players).map(|_| Probe::default()).collect();
    {
        let probes = probes.clone();
        session
            .create_instances(move |i| -> Result<Box<dyn Console>, ConsoleError> {
                Ok(Box::new(StubConsole::new(probes[i].clone())))
            })
            .expect("instances");
    }
    session
        .load_rom(Box::new(StubCart(rom.to_vec())), &parse_cart)
        .expect("rom");
    (session, probes)
}

fn free_port() -> u16 {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let probe = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    probe.local_addr().unwrap().port()
}

fn input(key_mask: u32) -> InputFrame {
    InputFrame {
        frame_num: 0,
        key_mask,
        touching: false,
        touch_x: 0,
        touch_y: 0,
        lid_closed: false,
        checksum: 0,
    }
}

fn pump_until(
    sessions: &[&Arc<NetplaySession>],
    mut predicate: impl FnMut() -> bool,
    what: &str,
) {
    for _ in 0..1000 {
        for session in sessions {
            session.process_network();
        }
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

/// Push this frame's local input on both ends and step each session one
/// frame, pumping the network until the inputs land.
fn step_both(host: &Arc<NetplaySession>, client: &Arc<NetplaySession>) {
    let frame = host.current_frame();
    let mask = NEUTRAL_KEY_MASK ^ (frame & 0xF);

    host.set_local_input(input(mask));
    host.send_local_input(input(mask));
    client.set_local_input(input(mask ^ 1));
    client.send_local_input(input(mask ^ 1));

    for session in [host, client] {
        let mut done = false;
        for _ in 0..1000 {
            session.process_network();
            match session.run_frame() {
                Ok(lines) => {
                    assert_eq!(lines, SCANLINES);
                    done = true;
                    break;
                }
                Err(NetplayError::InputNotReady) => {
                    std::thread::sleep(Duration::from_millis(1))
                }
                Err(e) => panic!("run_frame failed: {e}"),
            }
        }
        assert!(done, "frame {frame} never became ready");
    }
}

#[test]
fn delay_window_gates_frames() {
    let (session, _) = build_session(0, 2, 4, b"rom");

    // The prefill covers exactly the delay window.
    for frame in 0..4 {
        assert!(session.ready_for_frame(frame), "frame {frame}");
    }
    assert!(!session.ready_for_frame(4));

    // A local input at frame 0 lands at frame 4; the frame stays gated on
    // the remote player.
    session.set_local_input(input(0x7FF));
    assert!(!session.ready_for_frame(4));

    session.set_remote_input(1, InputFrame::neutral(4));
    assert!(session.ready_for_frame(4));

    session.stop();
}

#[test]
fn instances_other_than_local_are_muted() {
    let (session, probes) = build_session(1, 2, 4, b"rom");

    assert!(!probes[0].sound_on.load(Ordering::SeqCst));
    assert!(probes[1].sound_on.load(Ordering::SeqCst));

    // The wireless crossbar is live for the whole fleet.
    session.local_link().send(0, b"mp-frame");
    assert_eq!(
        session.local_link().recv(1).as_deref(),
        Some(&b"mp-frame"[..])
    );

    session.stop();
}

#[test]
fn join_then_lockstep_stays_in_sync() {
    let rom = b"shared-rom-image";
    let (host, _) = build_session(0, 2, 4, rom);
    let (client, _) = build_session(1, 2, 4, rom);

    let host_desyncs = Arc::new(Mutex::new(Vec::new()));
    let client_desyncs = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = host_desyncs.clone();
        host.set_desync_callback(Arc::new(move |frame, local, remote| {
            sink.lock().push((frame, local, remote));
        }));
        let sink = client_desyncs.clone();
        client.set_desync_callback(Arc::new(move |frame, local, remote| {
            sink.lock().push((frame, local, remote));
        }));
    }

    let port = free_port();
    host.host_start(port).expect("host start");
    client.client_connect("127.0.0.1", port).expect("connect");

    // Offer -> accept -> savestates -> sync ready -> start game.
    pump_until(
        &[&host, &client],
        || host.game_started() && client.game_started(),
        "game start",
    );
    assert_eq!(client.current_frame(), 0);
    assert_eq!(client.input_delay(), 4);

    // Both fleets hash identically at every check interval.
    for _ in 0..130 {
        step_both(&host, &client);
    }
    // Let the frame-120 alerts land.
    pump_until(&[&host, &client], || true, "drain");

    assert!(host_desyncs.lock().is_empty());
    assert!(client_desyncs.lock().is_empty());
    assert_eq!(host.current_frame(), 130);
    assert_eq!(client.current_frame(), 130);
    assert_eq!(
        host.compute_state_hash().unwrap(),
        client.compute_state_hash().unwrap()
    );

    host.stop();
    client.stop();
}

#[test]
fn injected_divergence_trips_the_desync_alarm() {
    let rom = b"shared-rom-image";
    let (host, _) = build_session(0, 2, 4, rom);
    let (client, client_probes) = build_session(1, 2, 4, rom);

    let host_desyncs = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = host_desyncs.clone();
        host.set_desync_callback(Arc::new(move |frame, local, remote| {
            sink.lock().push((frame, local, remote));
        }));
    }

    let port = free_port();
    host.host_start(port).expect("host start");
    client.client_connect("127.0.0.1", port).expect("connect");
    pump_until(
        &[&host, &client],
        || host.game_started() && client.game_started(),
        "game start",
    );

    // One byte of the client fleet's RAM flips at frame 63: invisible at
    // the frame-60 check, caught at frame 120.
    *client_probes[0].poke_at.lock() = Some(63);

    for _ in 0..126 {
        step_both(&host, &client);
    }
    pump_until(
        &[&host, &client],
        || !host_desyncs.lock().is_empty(),
        "desync alert",
    );

    let alerts = host_desyncs.lock();
    assert_eq!(alerts[0].0, 120);
    assert_ne!(alerts[0].1, alerts[0].2);
    drop(alerts);

    // Detection reports; it does not terminate the session.
    assert!(host.is_active());
    assert!(client.is_active());

    host.stop();
    client.stop();
}

#[test]
fn rom_mismatch_aborts_the_join() {
    let (host, _) = build_session(0, 2, 4, b"rom-a");
    let (client, _) = build_session(1, 2, 4, b"rom-b");

    let failures = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = failures.clone();
        client.set_disconnect_callback(Arc::new(move |player, reason| {
            sink.lock().push((player, reason));
        }));
    }

    let port = free_port();
    host.host_start(port).expect("host start");
    client.client_connect("127.0.0.1", port).expect("connect");

    pump_until(
        &[&host, &client],
        || !failures.lock().is_empty(),
        "handshake failure",
    );
    assert_eq!(failures.lock()[0], (0, DISCONNECT_ERROR));
    assert!(!client.game_started());

    host.stop();
    client.stop();
}

#[test]
fn worker_panic_aborts_the_session_cleanly() {
    let (session, probes) = build_session(0, 2, 2, b"rom");
    *probes[1].panic_at.lock() = Some(2);

    let mut poisoned = false;
    for frame in 0.. {
        session.set_local_input(input(NEUTRAL_KEY_MASK));
        session.set_remote_input(1, InputFrame::neutral(frame + 2));
        match session.run_frame() {
            Ok(_) => {}
            Err(NetplayError::SessionPoisoned) => {
                poisoned = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
        if frame > 10 {
            break;
        }
    }

    // The conductor observed the failure instead of deadlocking, and the
    // session shut itself down.
    assert!(poisoned);
    assert!(!session.is_active());
}

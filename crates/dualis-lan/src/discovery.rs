//! Host discovery over UDP broadcast.
//!
//! Hosts broadcast one beacon per second to `255.255.255.255:7063`; clients
//! drain the same port non-blocking and keep an aging table keyed by the
//! advertising peer's IPv4. Entries disappear five seconds after the last
//! beacon.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use parking_lot::Mutex;
use tracing::{debug, trace};

use dualis_netproto::constants::DISCOVERY_PORT;
use dualis_netproto::discovery::DiscoveryBeacon;

use crate::clock::tick_ms;
use crate::error::LanError;

/// Beacon cadence on the host side.
const BEACON_INTERVAL_MS: u32 = 1000;
/// Entries older than this are evicted.
const RECORD_TTL_MS: u32 = 5000;

/// One table entry: the validated beacon plus the local receive tick.
///
/// `last_seen` is our clock, not the sender's; aging must not depend on the
/// remote tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub beacon: DiscoveryBeacon,
    pub last_seen: u32,
}

pub struct Discovery {
    socket: UdpSocket,
    port: u16,
    table: Mutex<HashMap<u32, DiscoveryRecord>>,
    last_beacon_tick: Mutex<u32>,
}

impl Discovery {
    /// Bind the fixed discovery port with broadcast enabled.
    pub fn start() -> Result<Self, LanError> {
        Self::start_on(DISCOVERY_PORT)
    }

    /// Bind an explicit port. Tests use this to avoid the fixed port.
    pub fn start_on(port: u16) -> Result<Self, LanError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            port,
            table: Mutex::new(HashMap::new()),
            last_beacon_tick: Mutex::new(tick_ms()),
        })
    }

    /// Host side: broadcast `beacon` if a second has passed since the last
    /// one. The beacon's tick field is stamped here.
    pub fn advertise(&self, mut beacon: DiscoveryBeacon) {
        let now = tick_ms();
        {
            let mut last = self.last_beacon_tick.lock();
            if now.wrapping_sub(*last) < BEACON_INTERVAL_MS {
                return;
            }
            *last = now;
        }

        beacon.tick = now;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.port);
        if let Err(e) = self.socket.send_to(&beacon.encode(), addr) {
            trace!(error = %e, "discovery: beacon send failed");
        }
    }

    /// Client side: drain pending datagrams into the table, then evict
    /// anything not refreshed within the TTL.
    pub fn poll(&self) {
        let now = tick_ms();
        let mut buf = [0u8; 512];
        let mut table = self.table.lock();

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let IpAddr::V4(ip) = from.ip() else { continue };
                    let Ok(beacon) = DiscoveryBeacon::decode(&buf[..len]) else {
                        continue;
                    };
                    ingest(&mut table, u32::from(ip), beacon, now);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    debug!(error = %e, "discovery: socket error");
                    break;
                }
            }
        }

        evict(&mut table, now);
    }

    /// Snapshot of the current table for the UI.
    pub fn list(&self) -> HashMap<u32, DiscoveryRecord> {
        self.table.lock().clone()
    }
}

/// Insert or refresh a record. A beacon only replaces the stored one when
/// its sender tick is strictly newer, so reordered broadcasts cannot roll a
/// record back.
fn ingest(table: &mut HashMap<u32, DiscoveryRecord>, key: u32, beacon: DiscoveryBeacon, now: u32) {
    if let Some(existing) = table.get(&key) {
        if beacon.tick <= existing.beacon.tick {
            return;
        }
    }
    table.insert(
        key,
        DiscoveryRecord {
            beacon,
            last_seen: now,
        },
    );
}

fn evict(table: &mut HashMap<u32, DiscoveryRecord>, now: u32) {
    table.retain(|_, record| now.wrapping_sub(record.last_seen) < RECORD_TTL_MS);
}

//! Process-epoch millisecond tick.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process, wrapping at `u32`.
///
/// Stands in for the platform tick counter: discovery aging and MP packet
/// staleness only ever compare differences of these values.
pub fn tick_ms() -> u32 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u32
}

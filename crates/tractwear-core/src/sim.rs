//! Simulation clock, cadence and authority types.
//!
//! The engine runs two scheduling queues: a *continuous* queue evaluated on
//! every tick with that tick's elapsed time, and a *periodic* queue gated by
//! a [`Cadence`] accumulator. All malfunction timeouts are absolute
//! timestamps on the simulation clock ([`Millis`]), never countdowns, so a
//! paused or reloaded simulation cannot drift.

use serde::{Deserialize, Serialize};

/// Simulation time in milliseconds since the engine started.
pub type Millis = u64;

/// Milliseconds per hour, for the per-hour wear and drain rates.
pub const MILLIS_PER_HOUR: f32 = 3_600_000.0;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side of the host's network topology this engine runs on.
///
/// Only the authority mutates failure state. Observers hold replicated
/// snapshots and answer read queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Authority,
    Observer,
}

impl Role {
    pub fn is_authority(self) -> bool {
        matches!(self, Role::Authority)
    }
}

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// Mutable simulation state tracked by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimState {
    /// Number of ticks executed.
    pub tick: u64,

    /// Current simulation clock.
    pub clock: Millis,
}

impl SimState {
    /// Create a new simulation state starting at tick 0, clock 0.
    pub fn new() -> Self {
        Self { tick: 0, clock: 0 }
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// Accumulator for throttled work.
///
/// Elapsed time is added every tick; once it reaches `interval` the periodic
/// queue runs exactly once and the accumulator is reset in the same call.
/// A long tick therefore produces a single evaluation covering the whole
/// window, never a burst of catch-up evaluations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub interval: Millis,
    pub accumulator: Millis,
}

impl Cadence {
    pub fn new(interval: Millis) -> Self {
        Self {
            interval: interval.max(1),
            accumulator: 0,
        }
    }

    /// Add `dt` and report whether the periodic queue is due.
    ///
    /// Returns the length of the window being evaluated (the accumulated
    /// time, at least `interval`), or `None` when not yet due.
    pub fn accumulate(&mut self, dt: Millis) -> Option<Millis> {
        self.accumulator = self.accumulator.saturating_add(dt);
        if self.accumulator >= self.interval {
            let window = self.accumulator;
            self.accumulator = 0;
            Some(window)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Advance result
// ---------------------------------------------------------------------------

/// Result of an `Engine::tick()` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Whether the periodic queue ran this tick.
    pub periodic_ran: bool,

    /// Number of vehicles evaluated.
    pub vehicles: usize,

    /// Number of events emitted during the tick.
    pub events: usize,
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for desync detection.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    /// Start a new hash.
    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Feed an f32 by bit pattern.
    pub fn write_f32(&mut self, v: f32) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write(&[v as u8]);
    }

    /// Finalize and return the hash value.
    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_state_starts_at_zero() {
        let state = SimState::new();
        assert_eq!(state.tick, 0);
        assert_eq!(state.clock, 0);
    }

    #[test]
    fn cadence_fires_once_per_threshold() {
        let mut cadence = Cadence::new(1000);
        assert_eq!(cadence.accumulate(400), None);
        assert_eq!(cadence.accumulate(400), None);
        assert_eq!(cadence.accumulate(400), Some(1200));
        assert_eq!(cadence.accumulator, 0);
        assert_eq!(cadence.accumulate(999), None);
        assert_eq!(cadence.accumulate(1), Some(1000));
    }

    #[test]
    fn cadence_long_tick_is_a_single_window() {
        let mut cadence = Cadence::new(1000);
        assert_eq!(cadence.accumulate(5000), Some(5000));
        assert_eq!(cadence.accumulate(16), None);
    }

    #[test]
    fn cadence_zero_interval_is_clamped() {
        let mut cadence = Cadence::new(0);
        assert_eq!(cadence.interval, 1);
        assert_eq!(cadence.accumulate(1), Some(1));
    }

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_u64(42);
        h1.write_f32(0.5);

        let mut h2 = StateHash::new();
        h2.write_u64(42);
        h2.write_f32(0.5);

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u32(1);
        h1.write_u32(2);

        let mut h2 = StateHash::new();
        h2.write_u32(2);
        h2.write_u32(1);

        assert_ne!(h1.finish(), h2.finish());
    }
}

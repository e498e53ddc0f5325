//! Whole-engine snapshots.
//!
//! Binary serialization via `bitcode` with a versioned header. Host inputs,
//! outputs, listeners and the compatibility layer are not part of a
//! snapshot; they are re-established by the host after restore.

use crate::config::Tuning;
use crate::engine::{Engine, Vehicle};
use crate::event::{EventBus, NoticeLimiter};
use crate::id::VehicleId;
use crate::sim::{Cadence, Role, SimState};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying an engine snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x7A37_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Tick count at the time the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serializable engine state
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct EngineSnapshot {
    header: SnapshotHeader,
    tuning: Tuning,
    role: Role,
    sim_state: SimState,
    periodic: Cadence,
    seed: u64,
    spawned: u64,
    paused: bool,
    last_state_hash: u64,
    vehicles: SlotMap<VehicleId, Vehicle>,
}

impl Engine {
    /// Serialize the engine state to a binary blob via bitcode.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = EngineSnapshot {
            header: SnapshotHeader::new(self.sim_state.tick),
            tuning: self.tuning.clone(),
            role: self.role,
            sim_state: self.sim_state.clone(),
            periodic: self.periodic.clone(),
            seed: self.seed,
            spawned: self.spawned,
            paused: self.paused,
            last_state_hash: self.last_state_hash,
            vehicles: self.vehicles.clone(),
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Deserialize an engine from a binary blob.
    ///
    /// The EventBus is recreated empty; listeners, the compatibility layer
    /// and per-tick host inputs must be set again.
    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializeError> {
        let snapshot: EngineSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let mut vehicles = snapshot.vehicles;
        for (_, v) in vehicles.iter_mut() {
            v.record.tires.rebuild_multipliers();
        }

        Ok(Engine {
            vehicles,
            tuning: snapshot.tuning,
            role: snapshot.role,
            sim_state: snapshot.sim_state,
            periodic: snapshot.periodic,
            seed: snapshot.seed,
            spawned: snapshot.spawned,
            paused: snapshot.paused,
            last_state_hash: snapshot.last_state_hash,
            event_bus: EventBus::default(),
            notices: NoticeLimiter::default(),
            compat: None,
        })
    }
}

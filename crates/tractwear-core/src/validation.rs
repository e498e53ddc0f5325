//! Desync tooling: compare two engines subsystem by subsystem and check that
//! a snapshot replays deterministically.

use crate::engine::Engine;
use crate::id::VehicleId;
use crate::record::VehicleRecord;
use crate::serialize::DeserializeError;
use crate::sim::{Millis, StateHash};

// ---------------------------------------------------------------------------
// Subsystem hashes
// ---------------------------------------------------------------------------

/// Per-subsystem state hashes. When two instances diverge these point at
/// the subsystem responsible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemHashes {
    pub reliability: u64,
    pub fluids: u64,
    pub tires: u64,
    pub malfunctions: u64,
    pub sim_state: u64,
}

impl Engine {
    pub fn subsystem_hashes(&self) -> SubsystemHashes {
        let hash = |f: fn(&VehicleRecord, &mut StateHash)| {
            let mut h = StateHash::new();
            for (_, v) in &self.vehicles {
                f(&v.record, &mut h);
            }
            h.finish()
        };
        let mut sim = StateHash::new();
        sim.write_u64(self.sim_state.tick);
        sim.write_u64(self.sim_state.clock);
        sim.write_u64(self.periodic.accumulator);

        SubsystemHashes {
            reliability: hash(VehicleRecord::hash_reliability),
            fluids: hash(VehicleRecord::hash_fluids),
            tires: hash(VehicleRecord::hash_tires),
            malfunctions: hash(VehicleRecord::hash_malfunctions),
            sim_state: sim.finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum VehicleDiff {
    OnlyInA(VehicleId),
    OnlyInB(VehicleId),
    StateMismatch {
        vehicle: VehicleId,
        description: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemDiff {
    pub reliability_matches: bool,
    pub fluids_match: bool,
    pub tires_match: bool,
    pub malfunctions_match: bool,
    pub sim_state_matches: bool,
}

impl SubsystemDiff {
    pub fn all_match(&self) -> bool {
        self.reliability_matches
            && self.fluids_match
            && self.tires_match
            && self.malfunctions_match
            && self.sim_state_matches
    }
}

#[derive(Debug, Clone)]
pub struct StateDiff {
    pub is_identical: bool,
    pub subsystem_diffs: SubsystemDiff,
    pub vehicle_diffs: Vec<VehicleDiff>,
}

// ---------------------------------------------------------------------------
// Compare
// ---------------------------------------------------------------------------

/// Hash-level comparison.
pub fn quick_compare(a: &Engine, b: &Engine) -> SubsystemDiff {
    let ha = a.subsystem_hashes();
    let hb = b.subsystem_hashes();
    SubsystemDiff {
        reliability_matches: ha.reliability == hb.reliability,
        fluids_match: ha.fluids == hb.fluids,
        tires_match: ha.tires == hb.tires,
        malfunctions_match: ha.malfunctions == hb.malfunctions,
        sim_state_matches: ha.sim_state == hb.sim_state,
    }
}

fn describe_mismatch(a: &VehicleRecord, b: &VehicleRecord) -> Vec<&'static str> {
    let mut out = Vec::new();
    if a.reliability != b.reliability {
        out.push("reliability");
    }
    if a.oil != b.oil || a.hydraulic_fluid != b.hydraulic_fluid || a.fuel_leak != b.fuel_leak {
        out.push("fluids");
    }
    if a.tires != b.tires {
        out.push("tires");
    }
    if a.malfunctions != b.malfunctions || a.chronic_pull_direction != b.chronic_pull_direction {
        out.push("malfunctions");
    }
    out
}

/// Detailed diff down to individual vehicles.
pub fn diff_engines(a: &Engine, b: &Engine) -> StateDiff {
    let subsystem_diffs = quick_compare(a, b);
    let mut vehicle_diffs = Vec::new();

    for (id, va) in &a.vehicles {
        match b.vehicles.get(id) {
            None => vehicle_diffs.push(VehicleDiff::OnlyInA(id)),
            Some(vb) => {
                let mismatches = describe_mismatch(&va.record, &vb.record);
                if !mismatches.is_empty() {
                    vehicle_diffs.push(VehicleDiff::StateMismatch {
                        vehicle: id,
                        description: mismatches.join(", "),
                    });
                }
            }
        }
    }
    for id in b.vehicles.keys() {
        if !a.vehicles.contains_key(id) {
            vehicle_diffs.push(VehicleDiff::OnlyInB(id));
        }
    }

    StateDiff {
        is_identical: vehicle_diffs.is_empty() && subsystem_diffs.all_match(),
        subsystem_diffs,
        vehicle_diffs,
    }
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// Tick at which divergence was first detected (if any).
    pub divergence_tick: Option<u64>,
    /// `(tick, hash_run1, hash_run2)` for each tick.
    pub hash_log: Vec<(u64, u64, u64)>,
}

/// Replay the same snapshot twice and compare hashes tick by tick.
pub fn validate_determinism(
    snapshot_data: &[u8],
    ticks: u64,
    dt: Millis,
) -> Result<DeterminismResult, DeserializeError> {
    let mut engine_a = Engine::deserialize(snapshot_data)?;
    let mut engine_b = Engine::deserialize(snapshot_data)?;

    let mut hash_log = Vec::new();
    let mut divergence_tick = None;

    for _ in 0..ticks {
        engine_a.tick(dt);
        engine_b.tick(dt);

        let hash_a = engine_a.state_hash();
        let hash_b = engine_b.state_hash();
        let tick = engine_a.sim_state.tick;
        hash_log.push((tick, hash_a, hash_b));

        if hash_a != hash_b && divergence_tick.is_none() {
            divergence_tick = Some(tick);
        }
    }

    Ok(DeterminismResult {
        is_deterministic: divergence_tick.is_none(),
        divergence_tick,
        hash_log,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

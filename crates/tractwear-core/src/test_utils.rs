//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and in integration tests (via the
//! `test-utils` feature).

use crate::config::Tuning;
use crate::engine::Engine;
use crate::host::{ImplementJoint, VehicleInputs};
use crate::id::{Component, JointId};
use crate::malfunction::Phase;
use crate::record::VehicleRecord;
use crate::reliability::Reliability;
use crate::rng::RandomSource;
use crate::sim::Role;
use crate::tire::{TireQuality, TireState};

// ===========================================================================
// Scripted randomness
// ===========================================================================

/// A [`RandomSource`] that replays a fixed list of draws, cycling when it
/// runs out. An empty script always yields `0.0`.
#[derive(Debug, Clone)]
pub struct ScriptedRng {
    draws: Vec<f32>,
    next: usize,
}

impl ScriptedRng {
    pub fn new(draws: impl IntoIterator<Item = f32>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            next: 0,
        }
    }

    /// Number of draws consumed so far.
    pub fn consumed(&self) -> usize {
        self.next
    }
}

impl RandomSource for ScriptedRng {
    fn next_unit(&mut self) -> f32 {
        if self.draws.is_empty() {
            return 0.0;
        }
        let value = self.draws[self.next % self.draws.len()];
        self.next += 1;
        value
    }
}

// ===========================================================================
// Engine constructors
// ===========================================================================

pub const TEST_SEED: u64 = 0x7EA5_0000_0000_0042;

pub fn test_engine() -> Engine {
    Engine::new(Tuning::default(), Role::Authority, TEST_SEED)
}

pub fn observer_engine() -> Engine {
    Engine::new(Tuning::default(), Role::Observer, TEST_SEED)
}

/// Default tuning with every random trigger switched off. Tests re-enable
/// the one they exercise.
pub fn quiet_tuning() -> Tuning {
    let mut t = Tuning::default();
    let m = &mut t.malfunction;
    m.stall.chance_per_s = 0.0;
    m.stall.entry_scale = 0.0;
    for trigger in [
        &mut m.misfire,
        &mut m.overheat,
        &mut m.surge.trigger,
        &mut m.stuck_down,
        &mut m.stuck_up,
        &mut m.implement_pull,
        &mut m.implement_drag,
        &mut m.reduced_turning,
    ] {
        trigger.chance_per_s = 0.0;
    }
    m.runaway.chance_per_s = 0.0;
    t.reliability.breakdown_chance_per_s = 0.0;
    t.fluid.leak_chance_per_s = 0.0;
    t.tire.flat_chance_per_s = 0.0;
    t.steering.pull_surge_chance_scale = 0.0;
    t.steering.slip_chance_per_tick = 0.0;
    t.steering.wander_max = 0.0;
    t
}

pub fn quiet_engine() -> Engine {
    Engine::new(quiet_tuning(), Role::Authority, TEST_SEED)
}

/// Initialise `env_logger` once for a test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ===========================================================================
// Host inputs
// ===========================================================================

/// Motor running at `speed_kmh`, covering the matching distance in a 16 ms
/// frame.
pub fn running_inputs(speed_kmh: f32) -> VehicleInputs {
    VehicleInputs {
        speed_kmh,
        max_speed_kmh: 40.0,
        motor_running: true,
        distance_m: speed_kmh / 3.6 * 0.016,
        ..VehicleInputs::default()
    }
}

pub fn raised_implement(joint: u32) -> ImplementJoint {
    ImplementJoint {
        joint: JointId(joint),
        height: 1.0,
        player_moving: false,
        lowered: false,
    }
}

pub fn lowered_implement(joint: u32) -> ImplementJoint {
    ImplementJoint {
        joint: JointId(joint),
        height: 0.0,
        player_moving: false,
        lowered: true,
    }
}

// ===========================================================================
// Records
// ===========================================================================

/// Reliability model with every component at `value`.
pub fn reliability_at(quality_trait: f32, value: f32) -> Reliability {
    let mut r = Reliability::new(quality_trait);
    for c in Component::ALL {
        r.set_reliability(c, value);
    }
    r
}

/// Default record with `component` at zero and seized at clock 0.
pub fn seized_record(component: Component) -> VehicleRecord {
    let mut record = VehicleRecord::default();
    let state = record.reliability.component_mut(component);
    state.reliability = 0.0;
    state.seizure.is_seized = true;
    record
}

/// A record with a non-default value in nearly every field. All timed
/// windows start at clock 0 so the record survives a load at clock 0.
pub fn worn_record() -> VehicleRecord {
    let mut record = VehicleRecord {
        reliability: Reliability::new(0.3),
        chronic_pull_direction: -1,
        ..VehicleRecord::default()
    };

    let r = &mut record.reliability;
    r.repair_count = 4;
    r.breakdown_count = 2;
    for (c, ceiling, value) in [
        (Component::Engine, 0.8, 0.45),
        (Component::Hydraulic, 0.7, 0.25),
        (Component::Electrical, 0.9, 0.0),
    ] {
        let state = r.component_mut(c);
        state.ceiling = ceiling;
        state.reliability = value;
    }
    let electrical = &mut r.component_mut(Component::Electrical).seizure;
    electrical.is_seized = true;
    electrical.seized_at = 1_500;
    electrical.zero_strikes = 2;

    record.oil.level = 0.35;
    record.oil.has_leak = true;
    record.oil.leak_severity = 0.6;
    record.oil.low_warning_shown = true;
    record.hydraulic_fluid.level = 0.1;
    record.hydraulic_fluid.low_warning_shown = true;
    record.hydraulic_fluid.critical_warning_shown = true;
    record.fuel_leak.has_leak = true;
    record.fuel_leak.rate_multiplier = 1.75;

    let mut tires = TireState::new(TireQuality::Retread);
    tires.condition = 0.4;
    tires.has_flat = true;
    tires.flat_side = -1;
    tires.distance_m = 12_345.5;
    record.tires = tires;

    let m = &mut record.malfunctions;
    m.misfire = Phase::Active {
        started_at: 0,
        ends_at: 4_000,
    };
    m.overheat = Phase::Cooldown { ends_at: 90_000 };
    m.surge.phase = Phase::Active {
        started_at: 0,
        ends_at: 2_500,
    };
    m.surge.direction = 1;
    m.surge.strength = 0.55;
    m.drift.midpoint_notified = true;
    m.implement_pull.phase = Phase::Cooldown { ends_at: 30_000 };
    m.implement_pull.direction = -1;
    m.implement_pull.strength = 0.2;
    m.reduced_turning = Phase::Active {
        started_at: 0,
        ends_at: 10_000,
    };
    m.stall.first_start_pending = true;
    m.runaway.active = true;

    record
}

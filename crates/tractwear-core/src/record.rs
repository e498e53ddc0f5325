//! The per-vehicle state record.
//!
//! One [`VehicleRecord`] exists per vehicle. It is built with defaults on
//! spawn, overwritten from persisted values on load, mutated only by the
//! authoritative engine and shipped whole to observers.

use crate::fluid::{FluidKind, FluidState, FuelLeak};
use crate::id::Component;
use crate::malfunction::{MalfunctionKind, Malfunctions, Phase};
use crate::reliability::{Reliability, sanitize_unit};
use crate::rng::RandomSource;
use crate::sim::{Millis, StateHash};
use crate::tire::TireState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub reliability: Reliability,
    pub oil: FluidState,
    pub hydraulic_fluid: FluidState,
    pub fuel_leak: FuelLeak,
    pub tires: TireState,
    pub malfunctions: Malfunctions,
    /// Side the worn steering linkage pulls to, rolled once at spawn.
    pub chronic_pull_direction: i8,
}

impl Default for VehicleRecord {
    fn default() -> Self {
        Self {
            reliability: Reliability::default(),
            oil: FluidState::default(),
            hydraulic_fluid: FluidState::default(),
            fuel_leak: FuelLeak::default(),
            tires: TireState::default(),
            malfunctions: Malfunctions::default(),
            chronic_pull_direction: 1,
        }
    }
}

impl VehicleRecord {
    /// A freshly spawned vehicle: rolled trait and pull side, everything
    /// else at defaults.
    pub fn spawn(rng: &mut impl RandomSource) -> Self {
        Self {
            reliability: Reliability::roll(rng),
            chronic_pull_direction: rng.sign(),
            ..Self::default()
        }
    }

    pub fn fluid(&self, kind: FluidKind) -> &FluidState {
        match kind {
            FluidKind::Oil => &self.oil,
            FluidKind::Hydraulic => &self.hydraulic_fluid,
        }
    }

    pub fn fluid_mut(&mut self, kind: FluidKind) -> &mut FluidState {
        match kind {
            FluidKind::Oil => &mut self.oil,
            FluidKind::Hydraulic => &mut self.hydraulic_fluid,
        }
    }

    /// Every malfunction currently affecting the vehicle.
    pub fn active_malfunctions(&self, now: Millis) -> Vec<MalfunctionKind> {
        let mut active = self.malfunctions.active_timed(now);
        if self.tires.has_flat {
            active.push(MalfunctionKind::FlatTire);
        }
        active.extend(
            Component::ALL
                .into_iter()
                .filter(|&c| self.reliability.is_seized(c))
                .map(MalfunctionKind::Seized),
        );
        active
    }

    /// Force every value back into its valid range. Non-finite floats take
    /// the field's default; reliability never exceeds its ceiling.
    pub fn sanitize(&mut self) {
        let r = &mut self.reliability;
        r.quality_trait = sanitize_unit(r.quality_trait, 0.5);
        for c in Component::ALL {
            let state = r.component_mut(c);
            state.ceiling = sanitize_unit(state.ceiling, 1.0);
            state.reliability = sanitize_unit(state.reliability, state.ceiling).min(state.ceiling);
        }

        for fluid in [&mut self.oil, &mut self.hydraulic_fluid] {
            fluid.level = sanitize_unit(fluid.level, 1.0);
            fluid.leak_severity = finite_at_least(fluid.leak_severity, 0.0, 0.0);
        }
        self.fuel_leak.rate_multiplier = finite_at_least(self.fuel_leak.rate_multiplier, 1.0, 1.0);

        let tires = &mut self.tires;
        tires.condition = sanitize_unit(tires.condition, 1.0);
        tires.distance_m = finite_at_least(tires.distance_m, 0.0, 0.0);
        tires.flat_side = if tires.has_flat {
            tires.flat_side.signum()
        } else {
            0
        };

        let m = &mut self.malfunctions;
        m.surge.direction = m.surge.direction.signum();
        m.surge.strength = sanitize_unit(m.surge.strength, 0.0);
        m.implement_pull.direction = m.implement_pull.direction.signum();
        m.implement_pull.strength = sanitize_unit(m.implement_pull.strength, 0.0);
        self.chronic_pull_direction = match self.chronic_pull_direction.signum() {
            0 => 1,
            d => d,
        };
    }

    // -----------------------------------------------------------------------
    // Subsystem hashes
    // -----------------------------------------------------------------------

    pub fn hash_reliability(&self, h: &mut StateHash) {
        let r = &self.reliability;
        h.write_f32(r.quality_trait());
        h.write_u32(r.repair_count());
        h.write_u32(r.breakdown_count());
        for c in Component::ALL {
            let state = r.component(c);
            h.write_f32(state.reliability());
            h.write_f32(state.ceiling());
            h.write_bool(state.seizure.is_seized);
            h.write_u64(state.seizure.seized_at);
            h.write(&[state.seizure.zero_strikes]);
        }
    }

    pub fn hash_fluids(&self, h: &mut StateHash) {
        for fluid in [&self.oil, &self.hydraulic_fluid] {
            h.write_f32(fluid.level);
            h.write_bool(fluid.has_leak);
            h.write_f32(fluid.leak_severity);
            h.write_bool(fluid.low_warning_shown);
            h.write_bool(fluid.critical_warning_shown);
        }
        h.write_bool(self.fuel_leak.has_leak);
        h.write_f32(self.fuel_leak.rate_multiplier);
    }

    pub fn hash_tires(&self, h: &mut StateHash) {
        h.write_f32(self.tires.condition);
        h.write(&[self.tires.quality.index(), self.tires.flat_side as u8]);
        h.write_bool(self.tires.has_flat);
        h.write_f32(self.tires.distance_m);
    }

    pub fn hash_malfunctions(&self, h: &mut StateHash) {
        let m = &self.malfunctions;
        let mut phase = |p: Phase| {
            let (active, start, end, cooldown_end) = p.to_flat();
            h.write_bool(active);
            h.write_u64(start);
            h.write_u64(end);
            h.write_u64(cooldown_end);
        };
        phase(m.stall.phase);
        phase(m.misfire);
        phase(m.overheat);
        phase(m.surge.phase);
        phase(m.stuck_down);
        phase(m.stuck_up);
        phase(m.implement_pull.phase);
        phase(m.implement_drag);
        phase(m.reduced_turning);
        phase(m.pull_surge);
        h.write_bool(m.stall.first_start_pending);
        h.write(&[m.surge.direction as u8, m.implement_pull.direction as u8]);
        h.write_f32(m.surge.strength);
        h.write_f32(m.implement_pull.strength);
        h.write_bool(m.drift.midpoint_notified);
        h.write_bool(m.runaway.active);
        h.write_u64(m.runaway.started_at);
        h.write_u64(m.runaway.cooldown_until);
        h.write(&[self.chronic_pull_direction as u8]);
    }
}

fn finite_at_least(value: f32, min: f32, fallback: f32) -> f32 {
    if value.is_finite() { value.max(min) } else { fallback }
}

//! Flat key/value save format for one vehicle.
//!
//! Every field is optional. A missing key, a value of the wrong type and a
//! non-finite float all load as the field's default, so a damaged save
//! degrades one value at a time instead of failing the whole vehicle.
//! Malfunction windows are stored as absolute clock times and re-validated
//! against the current clock on load.

use crate::config::Tuning;
use crate::engine::Engine;
use crate::fluid::{FluidState, FuelLeak};
use crate::id::{Component, VehicleId};
use crate::malfunction::Phase;
use crate::record::VehicleRecord;
use crate::reliability::{Reliability, sanitize_unit};
use crate::sim::Millis;
use crate::tire::{TireQuality, TireState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("persisted record is not a key/value object")]
    NotAnObject,
}

// ---------------------------------------------------------------------------
// Record layout
// ---------------------------------------------------------------------------

/// Deserialize any JSON value, keeping it only if it has the right shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

macro_rules! persisted_record {
    ($($field:ident: $ty:ty,)*) => {
        /// One vehicle's save data, keyed in camelCase.
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct PersistedRecord {
            $(
                #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }
    };
}

persisted_record! {
    quality_trait: f32,
    repair_count: u32,
    breakdown_count: u32,

    engine_reliability: f32,
    engine_ceiling: f32,
    engine_seized: bool,
    engine_seized_at: Millis,
    engine_zero_strikes: u8,
    hydraulic_reliability: f32,
    hydraulic_ceiling: f32,
    hydraulic_seized: bool,
    hydraulic_seized_at: Millis,
    hydraulic_zero_strikes: u8,
    electrical_reliability: f32,
    electrical_ceiling: f32,
    electrical_seized: bool,
    electrical_seized_at: Millis,
    electrical_zero_strikes: u8,

    oil_level: f32,
    oil_leak: bool,
    oil_leak_severity: f32,
    oil_low_warning_shown: bool,
    oil_critical_warning_shown: bool,
    hydraulic_fluid_level: f32,
    hydraulic_leak: bool,
    hydraulic_leak_severity: f32,
    hydraulic_low_warning_shown: bool,
    hydraulic_critical_warning_shown: bool,
    fuel_leak: bool,
    fuel_leak_multiplier: f32,

    tire_condition: f32,
    tire_quality: String,
    has_flat_tire: bool,
    flat_tire_side: i8,
    tire_distance: f32,

    chronic_pull_direction: i8,

    stall_active: bool,
    stall_start_time: Millis,
    stall_end_time: Millis,
    stall_cooldown_end_time: Millis,
    first_start_stall_pending: bool,
    misfire_active: bool,
    misfire_start_time: Millis,
    misfire_end_time: Millis,
    misfire_cooldown_end_time: Millis,
    overheat_active: bool,
    overheat_start_time: Millis,
    overheat_end_time: Millis,
    overheat_cooldown_end_time: Millis,
    hydraulic_surge_active: bool,
    hydraulic_surge_start_time: Millis,
    hydraulic_surge_end_time: Millis,
    hydraulic_surge_cooldown_end_time: Millis,
    hydraulic_surge_direction: i8,
    hydraulic_surge_strength: f32,
    drift_midpoint_notified: bool,
    stuck_down_active: bool,
    stuck_down_start_time: Millis,
    stuck_down_end_time: Millis,
    stuck_down_cooldown_end_time: Millis,
    stuck_up_active: bool,
    stuck_up_start_time: Millis,
    stuck_up_end_time: Millis,
    stuck_up_cooldown_end_time: Millis,
    implement_pull_active: bool,
    implement_pull_start_time: Millis,
    implement_pull_end_time: Millis,
    implement_pull_cooldown_end_time: Millis,
    implement_pull_direction: i8,
    implement_pull_strength: f32,
    implement_drag_active: bool,
    implement_drag_start_time: Millis,
    implement_drag_end_time: Millis,
    implement_drag_cooldown_end_time: Millis,
    reduced_turning_active: bool,
    reduced_turning_start_time: Millis,
    reduced_turning_end_time: Millis,
    reduced_turning_cooldown_end_time: Millis,
    steering_pull_surge_active: bool,
    steering_pull_surge_start_time: Millis,
    steering_pull_surge_end_time: Millis,
    steering_pull_surge_cooldown_end_time: Millis,
    runaway_active: bool,
    runaway_start_time: Millis,
    runaway_cooldown_end_time: Millis,
}

type FlatPhase = (Option<bool>, Option<Millis>, Option<Millis>, Option<Millis>);

fn flatten(phase: Phase) -> FlatPhase {
    let (active, start, end, cooldown_end) = phase.to_flat();
    (Some(active), Some(start), Some(end), Some(cooldown_end))
}

fn unflatten(name: &str, flat: FlatPhase, now: Millis, cooldown: Millis) -> Phase {
    let (active, start, end, cooldown_end) = flat;
    Phase::from_flat(
        name,
        active.unwrap_or(false),
        start.unwrap_or(0),
        end.unwrap_or(0),
        cooldown_end.unwrap_or(0),
        now,
        cooldown,
    )
}

/// Finite and at least `min`, else `fallback`.
fn at_least(value: Option<f32>, min: f32, fallback: f32) -> f32 {
    match value {
        Some(v) if v.is_finite() => v.max(min),
        _ => fallback,
    }
}

fn unit(value: Option<f32>, fallback: f32) -> f32 {
    value.map_or(fallback, |v| sanitize_unit(v, fallback))
}

fn side(value: Option<i8>, fallback: i8) -> i8 {
    value.map_or(fallback, |v| v.signum())
}

// ---------------------------------------------------------------------------
// Capture / restore
// ---------------------------------------------------------------------------

impl PersistedRecord {
    /// Flatten a live record for saving.
    pub fn capture(record: &VehicleRecord) -> Self {
        let r = &record.reliability;
        let c = |component: Component| *r.component(component);
        let (engine, hydraulic, electrical) = (
            c(Component::Engine),
            c(Component::Hydraulic),
            c(Component::Electrical),
        );
        let m = &record.malfunctions;
        let mut out = Self {
            quality_trait: Some(r.quality_trait()),
            repair_count: Some(r.repair_count()),
            breakdown_count: Some(r.breakdown_count()),

            engine_reliability: Some(engine.reliability()),
            engine_ceiling: Some(engine.ceiling()),
            engine_seized: Some(engine.seizure.is_seized),
            engine_seized_at: Some(engine.seizure.seized_at),
            engine_zero_strikes: Some(engine.seizure.zero_strikes),
            hydraulic_reliability: Some(hydraulic.reliability()),
            hydraulic_ceiling: Some(hydraulic.ceiling()),
            hydraulic_seized: Some(hydraulic.seizure.is_seized),
            hydraulic_seized_at: Some(hydraulic.seizure.seized_at),
            hydraulic_zero_strikes: Some(hydraulic.seizure.zero_strikes),
            electrical_reliability: Some(electrical.reliability()),
            electrical_ceiling: Some(electrical.ceiling()),
            electrical_seized: Some(electrical.seizure.is_seized),
            electrical_seized_at: Some(electrical.seizure.seized_at),
            electrical_zero_strikes: Some(electrical.seizure.zero_strikes),

            oil_level: Some(record.oil.level),
            oil_leak: Some(record.oil.has_leak),
            oil_leak_severity: Some(record.oil.leak_severity),
            oil_low_warning_shown: Some(record.oil.low_warning_shown),
            oil_critical_warning_shown: Some(record.oil.critical_warning_shown),
            hydraulic_fluid_level: Some(record.hydraulic_fluid.level),
            hydraulic_leak: Some(record.hydraulic_fluid.has_leak),
            hydraulic_leak_severity: Some(record.hydraulic_fluid.leak_severity),
            hydraulic_low_warning_shown: Some(record.hydraulic_fluid.low_warning_shown),
            hydraulic_critical_warning_shown: Some(record.hydraulic_fluid.critical_warning_shown),
            fuel_leak: Some(record.fuel_leak.has_leak),
            fuel_leak_multiplier: Some(record.fuel_leak.rate_multiplier),

            tire_condition: Some(record.tires.condition),
            tire_quality: Some(record.tires.quality.name().to_string()),
            has_flat_tire: Some(record.tires.has_flat),
            flat_tire_side: Some(record.tires.flat_side),
            tire_distance: Some(record.tires.distance_m),

            chronic_pull_direction: Some(record.chronic_pull_direction),

            first_start_stall_pending: Some(m.stall.first_start_pending),
            hydraulic_surge_direction: Some(m.surge.direction),
            hydraulic_surge_strength: Some(m.surge.strength),
            drift_midpoint_notified: Some(m.drift.midpoint_notified),
            implement_pull_direction: Some(m.implement_pull.direction),
            implement_pull_strength: Some(m.implement_pull.strength),
            runaway_active: Some(m.runaway.active),
            runaway_start_time: Some(m.runaway.started_at),
            runaway_cooldown_end_time: Some(m.runaway.cooldown_until),
            ..Self::default()
        };

        (
            out.stall_active,
            out.stall_start_time,
            out.stall_end_time,
            out.stall_cooldown_end_time,
        ) = flatten(m.stall.phase);
        (
            out.misfire_active,
            out.misfire_start_time,
            out.misfire_end_time,
            out.misfire_cooldown_end_time,
        ) = flatten(m.misfire);
        (
            out.overheat_active,
            out.overheat_start_time,
            out.overheat_end_time,
            out.overheat_cooldown_end_time,
        ) = flatten(m.overheat);
        (
            out.hydraulic_surge_active,
            out.hydraulic_surge_start_time,
            out.hydraulic_surge_end_time,
            out.hydraulic_surge_cooldown_end_time,
        ) = flatten(m.surge.phase);
        (
            out.stuck_down_active,
            out.stuck_down_start_time,
            out.stuck_down_end_time,
            out.stuck_down_cooldown_end_time,
        ) = flatten(m.stuck_down);
        (
            out.stuck_up_active,
            out.stuck_up_start_time,
            out.stuck_up_end_time,
            out.stuck_up_cooldown_end_time,
        ) = flatten(m.stuck_up);
        (
            out.implement_pull_active,
            out.implement_pull_start_time,
            out.implement_pull_end_time,
            out.implement_pull_cooldown_end_time,
        ) = flatten(m.implement_pull.phase);
        (
            out.implement_drag_active,
            out.implement_drag_start_time,
            out.implement_drag_end_time,
            out.implement_drag_cooldown_end_time,
        ) = flatten(m.implement_drag);
        (
            out.reduced_turning_active,
            out.reduced_turning_start_time,
            out.reduced_turning_end_time,
            out.reduced_turning_cooldown_end_time,
        ) = flatten(m.reduced_turning);
        (
            out.steering_pull_surge_active,
            out.steering_pull_surge_start_time,
            out.steering_pull_surge_end_time,
            out.steering_pull_surge_cooldown_end_time,
        ) = flatten(m.pull_surge);
        out
    }

    /// Rebuild a live record. Absent or malformed values take their
    /// defaults; floats are clamped; malfunction windows that ended before
    /// `now` load as expired.
    pub fn restore(&self, now: Millis, t: &Tuning) -> VehicleRecord {
        let mut record = VehicleRecord {
            reliability: self.restore_reliability(),
            ..VehicleRecord::default()
        };

        let fluid = |level: Option<f32>,
                     leak: Option<bool>,
                     severity: Option<f32>,
                     low: Option<bool>,
                     critical: Option<bool>| FluidState {
            level: unit(level, 1.0),
            has_leak: leak.unwrap_or(false),
            leak_severity: at_least(severity, 0.0, 0.0),
            low_warning_shown: low.unwrap_or(false),
            critical_warning_shown: critical.unwrap_or(false),
        };
        record.oil = fluid(
            self.oil_level,
            self.oil_leak,
            self.oil_leak_severity,
            self.oil_low_warning_shown,
            self.oil_critical_warning_shown,
        );
        record.hydraulic_fluid = fluid(
            self.hydraulic_fluid_level,
            self.hydraulic_leak,
            self.hydraulic_leak_severity,
            self.hydraulic_low_warning_shown,
            self.hydraulic_critical_warning_shown,
        );
        record.fuel_leak = FuelLeak {
            has_leak: self.fuel_leak.unwrap_or(false),
            rate_multiplier: at_least(self.fuel_leak_multiplier, 1.0, 1.0),
        };

        let quality = self
            .tire_quality
            .as_deref()
            .and_then(TireQuality::from_name)
            .unwrap_or_default();
        let mut tires = TireState::new(quality);
        tires.condition = unit(self.tire_condition, 1.0);
        tires.has_flat = self.has_flat_tire.unwrap_or(false);
        tires.flat_side = if tires.has_flat {
            side(self.flat_tire_side, 1)
        } else {
            0
        };
        tires.distance_m = at_least(self.tire_distance, 0.0, 0.0);
        tires.rebuild_multipliers();
        record.tires = tires;

        record.chronic_pull_direction = match side(self.chronic_pull_direction, 1) {
            0 => 1,
            d => d,
        };

        let mt = &t.malfunction;
        let m = &mut record.malfunctions;
        m.stall.phase = unflatten(
            "stall",
            (
                self.stall_active,
                self.stall_start_time,
                self.stall_end_time,
                self.stall_cooldown_end_time,
            ),
            now,
            0,
        );
        m.stall.first_start_pending = self.first_start_stall_pending.unwrap_or(false);
        m.misfire = unflatten(
            "misfire",
            (
                self.misfire_active,
                self.misfire_start_time,
                self.misfire_end_time,
                self.misfire_cooldown_end_time,
            ),
            now,
            mt.misfire.cooldown_ms,
        );
        m.overheat = unflatten(
            "overheat",
            (
                self.overheat_active,
                self.overheat_start_time,
                self.overheat_end_time,
                self.overheat_cooldown_end_time,
            ),
            now,
            mt.overheat.cooldown_ms,
        );
        m.surge.phase = unflatten(
            "hydraulic_surge",
            (
                self.hydraulic_surge_active,
                self.hydraulic_surge_start_time,
                self.hydraulic_surge_end_time,
                self.hydraulic_surge_cooldown_end_time,
            ),
            now,
            mt.surge.trigger.cooldown_ms,
        );
        m.surge.direction = side(self.hydraulic_surge_direction, 0);
        m.surge.strength = unit(self.hydraulic_surge_strength, 0.0);
        m.drift.midpoint_notified = self.drift_midpoint_notified.unwrap_or(false);
        m.stuck_down = unflatten(
            "implement_stuck_down",
            (
                self.stuck_down_active,
                self.stuck_down_start_time,
                self.stuck_down_end_time,
                self.stuck_down_cooldown_end_time,
            ),
            now,
            mt.stuck_down.cooldown_ms,
        );
        m.stuck_up = unflatten(
            "implement_stuck_up",
            (
                self.stuck_up_active,
                self.stuck_up_start_time,
                self.stuck_up_end_time,
                self.stuck_up_cooldown_end_time,
            ),
            now,
            mt.stuck_up.cooldown_ms,
        );
        m.implement_pull.phase = unflatten(
            "implement_pull",
            (
                self.implement_pull_active,
                self.implement_pull_start_time,
                self.implement_pull_end_time,
                self.implement_pull_cooldown_end_time,
            ),
            now,
            mt.implement_pull.cooldown_ms,
        );
        m.implement_pull.direction = side(self.implement_pull_direction, 0);
        m.implement_pull.strength = unit(self.implement_pull_strength, 0.0);
        m.implement_drag = unflatten(
            "implement_drag",
            (
                self.implement_drag_active,
                self.implement_drag_start_time,
                self.implement_drag_end_time,
                self.implement_drag_cooldown_end_time,
            ),
            now,
            mt.implement_drag.cooldown_ms,
        );
        m.reduced_turning = unflatten(
            "reduced_turning",
            (
                self.reduced_turning_active,
                self.reduced_turning_start_time,
                self.reduced_turning_end_time,
                self.reduced_turning_cooldown_end_time,
            ),
            now,
            mt.reduced_turning.cooldown_ms,
        );
        m.pull_surge = unflatten(
            "steering_pull_surge",
            (
                self.steering_pull_surge_active,
                self.steering_pull_surge_start_time,
                self.steering_pull_surge_end_time,
                self.steering_pull_surge_cooldown_end_time,
            ),
            now,
            t.steering.pull_surge_cooldown_ms,
        );
        m.runaway.active = self.runaway_active.unwrap_or(false);
        m.runaway.started_at = self.runaway_start_time.unwrap_or(0).min(now);
        m.runaway.cooldown_until = self.runaway_cooldown_end_time.unwrap_or(0);
        m.runaway.clear_cooldown(now);

        record
    }

    fn restore_reliability(&self) -> Reliability {
        let mut r = Reliability::new(unit(self.quality_trait, 0.5));
        r.repair_count = self.repair_count.unwrap_or(0);
        r.breakdown_count = self.breakdown_count.unwrap_or(0);
        let components = [
            (
                Component::Engine,
                self.engine_reliability,
                self.engine_ceiling,
                self.engine_seized,
                self.engine_seized_at,
                self.engine_zero_strikes,
            ),
            (
                Component::Hydraulic,
                self.hydraulic_reliability,
                self.hydraulic_ceiling,
                self.hydraulic_seized,
                self.hydraulic_seized_at,
                self.hydraulic_zero_strikes,
            ),
            (
                Component::Electrical,
                self.electrical_reliability,
                self.electrical_ceiling,
                self.electrical_seized,
                self.electrical_seized_at,
                self.electrical_zero_strikes,
            ),
        ];
        for (component, reliability, ceiling, seized, seized_at, strikes) in components {
            let state = r.component_mut(component);
            state.ceiling = unit(ceiling, 1.0);
            state.reliability = unit(reliability, 1.0).min(state.ceiling);
            state.seizure.is_seized = seized.unwrap_or(false);
            state.seizure.seized_at = seized_at.unwrap_or(0);
            state.seizure.zero_strikes = strikes.unwrap_or(0);
        }
        r
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a saved record. Only a syntactically broken document or a
    /// non-object fails; individual bad values fall back to defaults.
    pub fn from_json(text: &str) -> Result<Self, PersistError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(PersistError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    /// Flatten one vehicle for the host's save file.
    pub fn save_vehicle(&self, id: VehicleId) -> Option<PersistedRecord> {
        self.record(id).map(PersistedRecord::capture)
    }

    /// Overwrite an existing vehicle's record from save data. Authority
    /// only; returns `false` on observers or for unknown vehicles.
    pub fn load_vehicle(&mut self, id: VehicleId, saved: &PersistedRecord) -> bool {
        if !self.is_authority() {
            return false;
        }
        let record = saved.restore(self.sim_state.clock, &self.tuning);
        match self.vehicles.get_mut(id) {
            Some(v) => {
                v.record = record;
                true
            }
            None => false,
        }
    }

    /// Register a new vehicle straight from save data.
    pub fn insert_saved_vehicle(&mut self, saved: &PersistedRecord) -> VehicleId {
        let record = saved.restore(self.sim_state.clock, &self.tuning);
        self.insert_vehicle(record)
    }
}

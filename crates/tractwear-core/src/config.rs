//! Tuning constants for the degradation model.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a tuning
//! file only needs to name the values it overrides. File loading lives in
//! the `tractwear-data` crate; this module only defines the shape and the
//! defaults.

use crate::sim::Millis;
use serde::{Deserialize, Deserializer, Serialize};

/// All tuning sections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub scheduler: SchedulerTuning,
    pub reliability: ReliabilityTuning,
    pub fluid: FluidTuning,
    pub tire: TireTuning,
    pub malfunction: MalfunctionTuning,
    pub steering: SteeringTuning,
    pub governor: GovernorTuning,
    pub drift: DriftTuning,
    pub notices: NoticeTuning,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerTuning {
    /// Interval of the throttled periodic queue.
    pub periodic_interval_ms: Millis,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            periodic_interval_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Reliability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityTuning {
    /// Trait value from which a vehicle counts as elite ("legendary").
    pub elite_trait: f32,
    /// Largest ceiling loss per repair (at trait 0), as a fraction.
    pub repair_ceiling_loss_max: f32,
    /// Breakdown ceiling loss at trait 1.
    pub breakdown_ceiling_loss_min: f32,
    /// Breakdown ceiling loss at trait 0.
    pub breakdown_ceiling_loss_max: f32,
    /// Fraction of the breakdown loss an elite vehicle takes.
    pub elite_breakdown_scale: f32,
    /// Lifetime multiplier at trait 0 and trait 1.
    pub lifetime_min: f32,
    pub lifetime_max: f32,
    /// Wear bias at trait 0 (lemon) and trait 1 (workhorse).
    pub wear_bias_lemon: f32,
    pub wear_bias_workhorse: f32,
    /// Reliability lost per operating hour.
    pub engine_wear_per_hour: f32,
    pub hydraulic_wear_per_hour: f32,
    pub electrical_wear_per_hour: f32,
    /// Breakdown chance per second at zero reliability.
    pub breakdown_chance_per_s: f32,
    /// Reliability removed by one breakdown.
    pub breakdown_damage: f32,
    /// Breakdowns at zero reliability before the component seizes.
    pub seizure_strikes: u8,
}

impl Default for ReliabilityTuning {
    fn default() -> Self {
        Self {
            elite_trait: 0.90,
            repair_ceiling_loss_max: 0.02,
            breakdown_ceiling_loss_min: 0.03,
            breakdown_ceiling_loss_max: 0.08,
            elite_breakdown_scale: 0.30,
            lifetime_min: 0.6,
            lifetime_max: 1.4,
            wear_bias_lemon: 1.4,
            wear_bias_workhorse: 0.6,
            engine_wear_per_hour: 0.01,
            hydraulic_wear_per_hour: 0.01,
            electrical_wear_per_hour: 0.004,
            breakdown_chance_per_s: 0.0005,
            breakdown_damage: 0.10,
            seizure_strikes: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Fluids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidTuning {
    /// Level consumed per running hour with no leak.
    pub oil_drain_per_hour: f32,
    pub hydraulic_drain_per_hour: f32,
    /// Leak drain multiplier is `1 + leak_severity * leak_drain_scale`.
    pub leak_drain_scale: f32,
    /// Leak onset chance per second at zero reliability.
    pub leak_chance_per_s: f32,
    pub leak_severity_min: f32,
    pub leak_severity_max: f32,
    pub fuel_leak_multiplier_min: f32,
    pub fuel_leak_multiplier_max: f32,
    /// One-shot warning thresholds.
    pub low_warning_level: f32,
    pub critical_level: f32,
    /// Engine reliability lost per second of oil starvation.
    pub starvation_damage_per_s: f32,
    /// Both fluids must be below this for a runaway to be possible.
    pub runaway_level: f32,
}

impl Default for FluidTuning {
    fn default() -> Self {
        Self {
            oil_drain_per_hour: 0.02,
            hydraulic_drain_per_hour: 0.01,
            leak_drain_scale: 10.0,
            leak_chance_per_s: 0.0002,
            leak_severity_min: 0.5,
            leak_severity_max: 2.0,
            fuel_leak_multiplier_min: 1.5,
            fuel_leak_multiplier_max: 3.0,
            low_warning_level: 0.25,
            critical_level: 0.10,
            starvation_damage_per_s: 0.002,
            runaway_level: 0.2,
        }
    }
}

// ---------------------------------------------------------------------------
// Tires
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TireTuning {
    /// Condition lost per kilometre for a `Normal` tire at wear bias 1.
    pub wear_per_km: f32,
    /// Flat chance per second while moving, before multipliers.
    pub flat_chance_per_s: f32,
    /// Steering pull of a flat at full strength.
    pub flat_pull_max: f32,
    /// Strength floor of the flat pull at standstill.
    pub flat_pull_min_strength: f32,
    /// Speed at which the flat pull reaches full strength.
    pub flat_pull_full_speed_kmh: f32,
    /// Below this speed the vehicle counts as stationary.
    pub moving_speed_kmh: f32,
}

impl Default for TireTuning {
    fn default() -> Self {
        Self {
            wear_per_km: 0.0005,
            flat_chance_per_s: 0.00002,
            flat_pull_max: 0.2,
            flat_pull_min_strength: 0.3,
            flat_pull_full_speed_kmh: 40.0,
            moving_speed_kmh: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Malfunctions
// ---------------------------------------------------------------------------

/// Shared shape of a timed, reliability-gated malfunction.
///
/// Every kind has its own defaults, so a partial section in a tuning file is
/// laid over that kind's values rather than over a shared template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerTuning {
    /// Chance per second at zero reliability, before severity and bias.
    pub chance_per_s: f32,
    /// Reliability below which the malfunction can trigger.
    pub threshold: f32,
    pub min_duration_ms: Millis,
    pub max_duration_ms: Millis,
    pub cooldown_ms: Millis,
}

impl TriggerTuning {
    const fn new(
        chance_per_s: f32,
        threshold: f32,
        min_duration_ms: Millis,
        max_duration_ms: Millis,
        cooldown_ms: Millis,
    ) -> Self {
        Self {
            chance_per_s,
            threshold,
            min_duration_ms,
            max_duration_ms,
            cooldown_ms,
        }
    }
}

const MISFIRE: TriggerTuning = TriggerTuning::new(0.08, 0.6, 150, 400, 2000);
const OVERHEAT: TriggerTuning = TriggerTuning::new(0.01, 0.5, 20000, 20000, 60000);
const SURGE: TriggerTuning = TriggerTuning::new(0.02, 0.5, 1500, 3000, 20000);
const STUCK_DOWN: TriggerTuning = TriggerTuning::new(0.01, 0.6, 5000, 15000, 30000);
const STUCK_UP: TriggerTuning = TriggerTuning::new(0.01, 0.6, 5000, 15000, 30000);
const IMPLEMENT_PULL: TriggerTuning = TriggerTuning::new(0.01, 0.6, 3000, 8000, 30000);
const IMPLEMENT_DRAG: TriggerTuning = TriggerTuning::new(0.01, 0.6, 5000, 15000, 30000);
const REDUCED_TURNING: TriggerTuning = TriggerTuning::new(0.01, 0.5, 10000, 30000, 30000);

/// The fields a tuning file actually wrote for one trigger. Values are read
/// bare (no `Some(..)` wrapper), so RON files look the same as JSON and TOML.
#[derive(Deserialize)]
struct TriggerOverrides {
    #[serde(default, deserialize_with = "present")]
    chance_per_s: Option<f32>,
    #[serde(default, deserialize_with = "present")]
    threshold: Option<f32>,
    #[serde(default, deserialize_with = "present")]
    min_duration_ms: Option<Millis>,
    #[serde(default, deserialize_with = "present")]
    max_duration_ms: Option<Millis>,
    #[serde(default, deserialize_with = "present")]
    cooldown_ms: Option<Millis>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl TriggerOverrides {
    fn over(self, base: TriggerTuning) -> TriggerTuning {
        TriggerTuning {
            chance_per_s: self.chance_per_s.unwrap_or(base.chance_per_s),
            threshold: self.threshold.unwrap_or(base.threshold),
            min_duration_ms: self.min_duration_ms.unwrap_or(base.min_duration_ms),
            max_duration_ms: self.max_duration_ms.unwrap_or(base.max_duration_ms),
            cooldown_ms: self.cooldown_ms.unwrap_or(base.cooldown_ms),
        }
    }
}

/// Generates a `deserialize_with` function that lays a partial trigger
/// section over the given kind default.
macro_rules! trigger_section {
    ($name:ident, $base:expr) => {
        fn $name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TriggerTuning, D::Error> {
            Ok(TriggerOverrides::deserialize(deserializer)?.over($base))
        }
    };
}

trigger_section!(misfire_section, MISFIRE);
trigger_section!(overheat_section, OVERHEAT);
trigger_section!(surge_section, SURGE);
trigger_section!(stuck_down_section, STUCK_DOWN);
trigger_section!(stuck_up_section, STUCK_UP);
trigger_section!(implement_pull_section, IMPLEMENT_PULL);
trigger_section!(implement_drag_section, IMPLEMENT_DRAG);
trigger_section!(reduced_turning_section, REDUCED_TURNING);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StallTuning {
    pub chance_per_s: f32,
    pub recovery_ms: Millis,
    /// Entry stall probability is `clamp((entry_threshold - r) * entry_scale, 0, 1)`.
    pub entry_threshold: f32,
    pub entry_scale: f32,
}

impl Default for StallTuning {
    fn default() -> Self {
        Self {
            chance_per_s: 0.004,
            recovery_ms: 5000,
            entry_threshold: 0.5,
            entry_scale: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurgeTuning {
    #[serde(deserialize_with = "surge_section")]
    pub trigger: TriggerTuning,
    pub strength_min: f32,
    pub strength_max: f32,
    /// Fraction of the surge window after which the pull fades out.
    pub fade_start: f32,
}

impl Default for SurgeTuning {
    fn default() -> Self {
        Self {
            trigger: SURGE,
            strength_min: 0.3,
            strength_max: 0.7,
            fade_start: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunawayTuning {
    pub chance_per_s: f32,
    pub cooldown_ms: Millis,
    pub max_speed_multiplier: f32,
    pub brake_multiplier: f32,
}

impl Default for RunawayTuning {
    fn default() -> Self {
        Self {
            chance_per_s: 0.02,
            cooldown_ms: 30000,
            max_speed_multiplier: 1.5,
            brake_multiplier: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MalfunctionTuning {
    pub stall: StallTuning,
    #[serde(deserialize_with = "misfire_section")]
    pub misfire: TriggerTuning,
    #[serde(deserialize_with = "overheat_section")]
    pub overheat: TriggerTuning,
    pub surge: SurgeTuning,
    #[serde(deserialize_with = "stuck_down_section")]
    pub stuck_down: TriggerTuning,
    #[serde(deserialize_with = "stuck_up_section")]
    pub stuck_up: TriggerTuning,
    #[serde(deserialize_with = "implement_pull_section")]
    pub implement_pull: TriggerTuning,
    pub implement_pull_strength_min: f32,
    pub implement_pull_strength_max: f32,
    #[serde(deserialize_with = "implement_drag_section")]
    pub implement_drag: TriggerTuning,
    /// Speed cap multiplier while an implement drags.
    pub implement_drag_speed_scale: f32,
    #[serde(deserialize_with = "reduced_turning_section")]
    pub reduced_turning: TriggerTuning,
    /// Steering travel multiplier while turning is reduced.
    pub reduced_turning_scale: f32,
    pub runaway: RunawayTuning,
}

impl Default for MalfunctionTuning {
    fn default() -> Self {
        Self {
            stall: StallTuning::default(),
            misfire: MISFIRE,
            overheat: OVERHEAT,
            surge: SurgeTuning::default(),
            stuck_down: STUCK_DOWN,
            stuck_up: STUCK_UP,
            implement_pull: IMPLEMENT_PULL,
            implement_pull_strength_min: 0.10,
            implement_pull_strength_max: 0.25,
            implement_drag: IMPLEMENT_DRAG,
            implement_drag_speed_scale: 0.5,
            reduced_turning: REDUCED_TURNING,
            reduced_turning_scale: 0.6,
            runaway: RunawayTuning::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Steering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringTuning {
    /// Hydraulic reliability below which the chronic pull starts.
    pub pull_threshold: f32,
    /// Upper bound of the slop factor.
    pub slop_cap: f32,
    pub pull_speed_min_kmh: f32,
    pub pull_speed_max_kmh: f32,
    pub steering_pull_max: f32,
    /// Pull-surge chance per second is `pull_surge_chance_scale * slop`.
    pub pull_surge_chance_scale: f32,
    pub pull_surge_multiplier: f32,
    pub pull_surge_min_ms: Millis,
    pub pull_surge_max_ms: Millis,
    pub pull_surge_cooldown_ms: Millis,
    pub wander_threshold: f32,
    pub wander_max: f32,
    pub wander_retarget_min_ms: Millis,
    pub wander_retarget_max_ms: Millis,
    pub wander_time_constant_ms: f32,
    pub slip_threshold: f32,
    pub slip_chance_per_tick: f32,
    pub slip_magnitude: f32,
}

impl Default for SteeringTuning {
    fn default() -> Self {
        Self {
            pull_threshold: 0.8,
            slop_cap: 0.9,
            pull_speed_min_kmh: 5.0,
            pull_speed_max_kmh: 25.0,
            steering_pull_max: 0.12,
            pull_surge_chance_scale: 0.05,
            pull_surge_multiplier: 2.0,
            pull_surge_min_ms: 1000,
            pull_surge_max_ms: 2000,
            pull_surge_cooldown_ms: 15000,
            wander_threshold: 0.7,
            wander_max: 0.03,
            wander_retarget_min_ms: 1000,
            wander_retarget_max_ms: 3000,
            wander_time_constant_ms: 800.0,
            slip_threshold: 0.3,
            slip_chance_per_tick: 0.001,
            slip_magnitude: 0.15,
        }
    }
}

// ---------------------------------------------------------------------------
// Governor, drift, notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorTuning {
    /// Engine reliability below which the speed ceiling applies.
    pub reliability_threshold: f32,
    /// Ceiling as a fraction of max speed at zero reliability.
    pub floor_fraction: f32,
    pub grace_kmh: f32,
}

impl Default for GovernorTuning {
    fn default() -> Self {
        Self {
            reliability_threshold: 0.7,
            floor_fraction: 0.6,
            grace_kmh: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftTuning {
    /// Normalized height lost per second at zero hydraulic reliability.
    pub rate_per_s: f32,
    /// Height at which drift stops.
    pub midpoint: f32,
}

impl Default for DriftTuning {
    fn default() -> Self {
        Self {
            rate_per_s: 0.05,
            midpoint: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeTuning {
    /// Minimum spacing of user-visible notices per vehicle and kind.
    pub min_interval_ms: Millis,
}

impl Default for NoticeTuning {
    fn default() -> Self {
        Self {
            min_interval_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_other_defaults() {
        let json = r#"{ "steering": { "steering_pull_max": 0.2 }, "scheduler": {} }"#;
        let tuning: Tuning = serde_json::from_str(json).unwrap();
        assert_eq!(tuning.steering.steering_pull_max, 0.2);
        assert_eq!(tuning.steering.pull_threshold, 0.8);
        assert_eq!(tuning.scheduler.periodic_interval_ms, 1000);
        assert_eq!(tuning.reliability, ReliabilityTuning::default());
    }

    #[test]
    fn breakdown_loss_band_is_ordered() {
        let t = ReliabilityTuning::default();
        assert!(t.breakdown_ceiling_loss_min < t.breakdown_ceiling_loss_max);
        assert!(t.lifetime_min < t.lifetime_max);
    }

    #[test]
    fn partial_trigger_keeps_its_own_kind_defaults() {
        let json = r#"{ "malfunction": {
            "misfire": { "chance_per_s": 0.5 },
            "surge": { "trigger": { "cooldown_ms": 1 } },
            "reduced_turning": {}
        } }"#;
        let tuning: Tuning = serde_json::from_str(json).unwrap();
        let m = &tuning.malfunction;
        let defaults = MalfunctionTuning::default();

        assert_eq!(m.misfire.chance_per_s, 0.5);
        assert_eq!(m.misfire.threshold, 0.6);
        assert_eq!((m.misfire.min_duration_ms, m.misfire.max_duration_ms), (150, 400));
        assert_eq!(m.misfire.cooldown_ms, 2000);

        assert_eq!(m.surge.trigger.cooldown_ms, 1);
        assert_eq!(m.surge.trigger.max_duration_ms, 3000);
        assert_eq!(m.surge.strength_max, defaults.surge.strength_max);

        assert_eq!(m.reduced_turning, defaults.reduced_turning);
        assert_eq!(m.overheat, defaults.overheat);
    }
}

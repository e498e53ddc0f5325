//! Aggregate tire tread, quality tier and flat state.

use crate::config::TireTuning;
use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};

/// Tire quality tier. Fixes the traction, failure and wear multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TireQuality {
    Retread,
    #[default]
    Normal,
    Quality,
}

impl TireQuality {
    /// Stable wire/persistence index.
    pub const fn index(self) -> u8 {
        match self {
            TireQuality::Retread => 0,
            TireQuality::Normal => 1,
            TireQuality::Quality => 2,
        }
    }

    /// Unknown indices fall back to `Normal`.
    pub const fn from_index(index: u8) -> Self {
        match index {
            0 => TireQuality::Retread,
            2 => TireQuality::Quality,
            _ => TireQuality::Normal,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TireQuality::Retread => "Retread",
            TireQuality::Normal => "Normal",
            TireQuality::Quality => "Quality",
        }
    }

    /// Parse a persisted name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        [TireQuality::Retread, TireQuality::Normal, TireQuality::Quality]
            .into_iter()
            .find(|q| q.name().eq_ignore_ascii_case(name.trim()))
    }

    pub const fn multipliers(self) -> TireMultipliers {
        match self {
            TireQuality::Retread => TireMultipliers {
                traction: 0.85,
                failure: 3.0,
                wear: 2.0,
            },
            TireQuality::Normal => TireMultipliers {
                traction: 1.0,
                failure: 1.0,
                wear: 1.0,
            },
            TireQuality::Quality => TireMultipliers {
                traction: 1.10,
                failure: 0.5,
                wear: 0.67,
            },
        }
    }
}

/// Derived from [`TireQuality`]; never persisted or replicated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TireMultipliers {
    pub traction: f32,
    pub failure: f32,
    pub wear: f32,
}

impl Default for TireMultipliers {
    fn default() -> Self {
        TireQuality::Normal.multipliers()
    }
}

/// Flat chance multiplier for a tread condition.
pub fn condition_factor(condition: f32) -> f32 {
    if condition > 0.5 {
        1.0
    } else if condition > 0.3 {
        2.0
    } else if condition > 0.15 {
        4.0
    } else {
        8.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TireState {
    pub condition: f32,
    pub quality: TireQuality,
    pub has_flat: bool,
    /// -1 left, +1 right, 0 when no flat.
    pub flat_side: i8,
    pub distance_m: f32,
    #[serde(skip)]
    multipliers: TireMultipliers,
}

impl Default for TireState {
    fn default() -> Self {
        Self {
            condition: 1.0,
            quality: TireQuality::Normal,
            has_flat: false,
            flat_side: 0,
            distance_m: 0.0,
            multipliers: TireMultipliers::default(),
        }
    }
}

impl TireState {
    pub fn new(quality: TireQuality) -> Self {
        Self {
            quality,
            multipliers: quality.multipliers(),
            ..Self::default()
        }
    }

    pub fn multipliers(&self) -> TireMultipliers {
        self.multipliers
    }

    /// Recompute the derived multipliers from `quality`. Must run after
    /// every load and every replication receive.
    pub fn rebuild_multipliers(&mut self) {
        self.multipliers = self.quality.multipliers();
    }

    /// Accrue distance and tread wear.
    pub fn accrue_distance(&mut self, meters: f32, wear_bias: f32, t: &TireTuning) {
        if !meters.is_finite() || meters <= 0.0 {
            return;
        }
        self.distance_m += meters;
        let wear = meters / 1000.0 * t.wear_per_km * self.multipliers.wear * wear_bias;
        self.condition = (self.condition - wear).max(0.0);
    }

    /// Flat chance for a window of `window_s` seconds of movement.
    pub fn flat_chance(&self, window_s: f32, wear_bias: f32, t: &TireTuning) -> f32 {
        t.flat_chance_per_s
            * window_s
            * self.multipliers.failure
            * condition_factor(self.condition)
            * wear_bias
    }

    /// Periodic flat roll. Returns `true` if a flat developed.
    pub fn roll_flat(
        &mut self,
        window_s: f32,
        wear_bias: f32,
        rng: &mut impl RandomSource,
        t: &TireTuning,
    ) -> bool {
        if self.has_flat {
            return false;
        }
        if !rng.chance(self.flat_chance(window_s, wear_bias, t)) {
            return false;
        }
        self.has_flat = true;
        self.flat_side = rng.sign();
        true
    }

    /// Signed steering pull from a flat at the given speed.
    pub fn flat_pull(&self, speed_kmh: f32, t: &TireTuning) -> Option<f32> {
        if !self.has_flat || self.flat_side == 0 {
            return None;
        }
        let strength = (speed_kmh.abs() / t.flat_pull_full_speed_kmh)
            .min(1.0)
            .max(t.flat_pull_min_strength);
        Some(self.flat_side as f32 * strength * t.flat_pull_max)
    }

    /// Fit a fresh set of tires.
    pub fn replace(&mut self, quality: TireQuality) {
        let distance_m = self.distance_m;
        *self = Self::new(quality);
        self.distance_m = distance_m;
    }

    /// Fix a flat without changing tread.
    pub fn service_flat(&mut self) {
        self.has_flat = false;
        self.flat_side = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SimRng;

    #[test]
    fn quality_multiplier_table() {
        let retread = TireQuality::Retread.multipliers();
        assert_eq!((retread.traction, retread.failure, retread.wear), (0.85, 3.0, 2.0));
        let quality = TireQuality::Quality.multipliers();
        assert_eq!((quality.traction, quality.failure, quality.wear), (1.10, 0.5, 0.67));
        assert_eq!(TireMultipliers::default(), TireQuality::Normal.multipliers());
    }

    #[test]
    fn quality_names_and_indices() {
        assert_eq!(TireQuality::from_name("retread"), Some(TireQuality::Retread));
        assert_eq!(TireQuality::from_name(" Quality "), Some(TireQuality::Quality));
        assert_eq!(TireQuality::from_name("slick"), None);
        assert_eq!(TireQuality::from_index(9), TireQuality::Normal);
        for q in [TireQuality::Retread, TireQuality::Normal, TireQuality::Quality] {
            assert_eq!(TireQuality::from_index(q.index()), q);
        }
    }

    #[test]
    fn wear_scales_with_quality_and_bias() {
        let t = TireTuning::default();
        let mut normal = TireState::new(TireQuality::Normal);
        let mut retread = TireState::new(TireQuality::Retread);
        normal.accrue_distance(10_000.0, 1.0, &t);
        retread.accrue_distance(10_000.0, 1.4, &t);
        assert!((normal.condition - 0.995).abs() < 1e-6);
        assert!((retread.condition - (1.0 - 0.005 * 2.0 * 1.4)).abs() < 1e-6);
        assert_eq!(normal.distance_m, 10_000.0);

        normal.accrue_distance(-5.0, 1.0, &t);
        assert_eq!(normal.distance_m, 10_000.0);
    }

    #[test]
    fn condition_factor_steps() {
        assert_eq!(condition_factor(0.9), 1.0);
        assert_eq!(condition_factor(0.4), 2.0);
        assert_eq!(condition_factor(0.2), 4.0);
        assert_eq!(condition_factor(0.1), 8.0);
    }

    #[test]
    fn flat_pull_ramps_with_speed() {
        let t = TireTuning::default();
        let mut tires = TireState::default();
        assert_eq!(tires.flat_pull(30.0, &t), None);

        tires.has_flat = true;
        tires.flat_side = -1;
        assert!((tires.flat_pull(0.0, &t).unwrap() + 0.3 * 0.2).abs() < 1e-6);
        assert!((tires.flat_pull(20.0, &t).unwrap() + 0.5 * 0.2).abs() < 1e-6);
        assert!((tires.flat_pull(80.0, &t).unwrap() + 0.2).abs() < 1e-6);
    }

    #[test]
    fn certain_flat_picks_a_side() {
        let t = TireTuning {
            flat_chance_per_s: 1.0,
            ..TireTuning::default()
        };
        let mut rng = SimRng::new(4);
        let mut tires = TireState::default();
        assert!(tires.roll_flat(1.0, 1.0, &mut rng, &t));
        assert!(tires.flat_side == -1 || tires.flat_side == 1);
        assert!(!tires.roll_flat(1.0, 1.0, &mut rng, &t));

        tires.service_flat();
        assert!(!tires.has_flat);
        assert_eq!(tires.flat_side, 0);
    }

    #[test]
    fn replace_resets_tread_and_multipliers() {
        let t = TireTuning::default();
        let mut tires = TireState::new(TireQuality::Retread);
        tires.accrue_distance(50_000.0, 1.0, &t);
        tires.has_flat = true;
        tires.replace(TireQuality::Quality);
        assert_eq!(tires.condition, 1.0);
        assert!(!tires.has_flat);
        assert_eq!(tires.multipliers(), TireQuality::Quality.multipliers());
        assert_eq!(tires.distance_m, 50_000.0);
    }

    #[test]
    fn multipliers_are_rebuilt_after_deserialize() {
        let tires = TireState::new(TireQuality::Retread);
        let json = serde_json::to_string(&tires).unwrap();
        let mut restored: TireState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.multipliers(), TireMultipliers::default());
        restored.rebuild_multipliers();
        assert_eq!(restored, tires);
    }
}

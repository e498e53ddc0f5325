//! Oil, hydraulic fluid and fuel leak state.
//!
//! Fluid levels feed the [`severity_multiplier`], a cross-cutting modifier
//! applied wherever a dependent malfunction's probability or duration is
//! computed.

use crate::config::FluidTuning;
use crate::rng::RandomSource;
use crate::sim::MILLIS_PER_HOUR;
use serde::{Deserialize, Serialize};

/// Which tracked fluid a mutator or event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FluidKind {
    Oil,
    Hydraulic,
}

impl FluidKind {
    pub const fn key(self) -> &'static str {
        match self {
            FluidKind::Oil => "oil",
            FluidKind::Hydraulic => "hydraulic",
        }
    }
}

/// Malfunction likelihood/duration multiplier for a fluid level.
///
/// 1.0 at full, 2.0 at half, 2.6 at 20 %, 3.0 at empty. Monotone
/// non-increasing in `level`. Non-finite levels count as empty.
pub fn severity_multiplier(level: f32) -> f32 {
    let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
    3.0 - 2.0 * level
}

/// Warning crossing reported by [`FluidState::check_warnings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluidWarning {
    Low,
    Critical,
}

// ---------------------------------------------------------------------------
// Tracked fluid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidState {
    pub level: f32,
    pub has_leak: bool,
    pub leak_severity: f32,
    pub low_warning_shown: bool,
    pub critical_warning_shown: bool,
}

impl Default for FluidState {
    fn default() -> Self {
        Self {
            level: 1.0,
            has_leak: false,
            leak_severity: 0.0,
            low_warning_shown: false,
            critical_warning_shown: false,
        }
    }
}

impl FluidState {
    pub fn severity(&self) -> f32 {
        severity_multiplier(self.level)
    }

    /// Multiplier on the baseline drain rate from the current leak.
    pub fn drain_multiplier(&self, t: &FluidTuning) -> f32 {
        if self.has_leak {
            1.0 + self.leak_severity.max(0.0) * t.leak_drain_scale
        } else {
            1.0
        }
    }

    /// Drain for `dt_ms` of running time at `per_hour` baseline.
    pub fn drain(&mut self, per_hour: f32, dt_ms: u64, t: &FluidTuning) {
        let hours = dt_ms as f32 / MILLIS_PER_HOUR;
        let amount = per_hour * hours * self.drain_multiplier(t);
        if amount > 0.0 {
            self.level = (self.level - amount).max(0.0);
        }
    }

    /// Report newly crossed warning thresholds and re-arm flags for
    /// thresholds the level is back above.
    ///
    /// Critical implies low, so a single big drop reports only `Critical`
    /// but marks both flags.
    pub fn check_warnings(&mut self, t: &FluidTuning) -> Option<FluidWarning> {
        if self.level >= t.low_warning_level {
            self.low_warning_shown = false;
        }
        if self.level >= t.critical_level {
            self.critical_warning_shown = false;
        }

        if self.level < t.critical_level && !self.critical_warning_shown {
            self.critical_warning_shown = true;
            self.low_warning_shown = true;
            return Some(FluidWarning::Critical);
        }
        if self.level < t.low_warning_level && !self.low_warning_shown {
            self.low_warning_shown = true;
            return Some(FluidWarning::Low);
        }
        None
    }

    /// Refill to `level` (clamped); warnings re-arm on the next check.
    pub fn refill(&mut self, level: f32) {
        if level.is_finite() {
            self.level = level.clamp(0.0, 1.0);
        }
    }

    pub fn start_leak(&mut self, rng: &mut impl RandomSource, t: &FluidTuning) {
        self.has_leak = true;
        self.leak_severity = rng.range(t.leak_severity_min, t.leak_severity_max);
    }

    pub fn fix_leak(&mut self) {
        self.has_leak = false;
        self.leak_severity = 0.0;
    }
}

// ---------------------------------------------------------------------------
// Fuel leak
// ---------------------------------------------------------------------------

/// Fuel leak flag and consumption multiplier. The fuel level itself belongs
/// to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelLeak {
    pub has_leak: bool,
    pub rate_multiplier: f32,
}

impl Default for FuelLeak {
    fn default() -> Self {
        Self {
            has_leak: false,
            rate_multiplier: 1.0,
        }
    }
}

impl FuelLeak {
    pub fn start(&mut self, rng: &mut impl RandomSource, t: &FluidTuning) {
        self.has_leak = true;
        self.rate_multiplier = rng.range(t.fuel_leak_multiplier_min, t.fuel_leak_multiplier_max);
    }

    pub fn fix(&mut self) {
        *self = Self::default();
    }

    /// Multiplier on host fuel usage.
    pub fn usage_multiplier(&self) -> f32 {
        if self.has_leak {
            self.rate_multiplier.max(1.0)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SimRng;

    #[test]
    fn severity_checkpoints() {
        assert!((severity_multiplier(1.0) - 1.0).abs() < 1e-6);
        assert!((severity_multiplier(0.5) - 2.0).abs() < 1e-6);
        assert!((severity_multiplier(0.2) - 2.6).abs() < 1e-6);
        assert!((severity_multiplier(0.0) - 3.0).abs() < 1e-6);
        assert_eq!(severity_multiplier(-4.0), 3.0);
        assert_eq!(severity_multiplier(7.0), 1.0);
        assert_eq!(severity_multiplier(f32::NAN), 3.0);
    }

    #[test]
    fn leak_multiplies_drain() {
        let t = FluidTuning::default();
        let mut sealed = FluidState::default();
        let mut leaking = FluidState {
            has_leak: true,
            leak_severity: 1.0,
            ..FluidState::default()
        };
        sealed.drain(0.02, 3_600_000, &t);
        leaking.drain(0.02, 3_600_000, &t);
        assert!((sealed.level - 0.98).abs() < 1e-5);
        assert!((leaking.level - (1.0 - 0.02 * 11.0)).abs() < 1e-5);
    }

    #[test]
    fn drain_stops_at_empty() {
        let t = FluidTuning::default();
        let mut fluid = FluidState {
            level: 0.001,
            ..FluidState::default()
        };
        fluid.drain(1.0, 3_600_000, &t);
        assert_eq!(fluid.level, 0.0);
    }

    #[test]
    fn warnings_fire_once_and_rearm() {
        let t = FluidTuning::default();
        let mut fluid = FluidState::default();
        assert_eq!(fluid.check_warnings(&t), None);

        fluid.level = 0.2;
        assert_eq!(fluid.check_warnings(&t), Some(FluidWarning::Low));
        assert_eq!(fluid.check_warnings(&t), None);

        fluid.level = 0.05;
        assert_eq!(fluid.check_warnings(&t), Some(FluidWarning::Critical));
        assert_eq!(fluid.check_warnings(&t), None);

        fluid.refill(1.0);
        assert_eq!(fluid.check_warnings(&t), None);
        assert!(!fluid.low_warning_shown);
        assert!(!fluid.critical_warning_shown);

        fluid.level = 0.01;
        assert_eq!(fluid.check_warnings(&t), Some(FluidWarning::Critical));
        assert_eq!(fluid.check_warnings(&t), None);
    }

    #[test]
    fn leaks_roll_within_band_and_fix_clears() {
        let t = FluidTuning::default();
        let mut rng = SimRng::new(11);
        let mut fluid = FluidState::default();
        fluid.start_leak(&mut rng, &t);
        assert!(fluid.has_leak);
        assert!((0.5..2.0).contains(&fluid.leak_severity));
        fluid.fix_leak();
        assert_eq!(fluid, FluidState::default());

        let mut fuel = FuelLeak::default();
        assert_eq!(fuel.usage_multiplier(), 1.0);
        fuel.start(&mut rng, &t);
        assert!((1.5..3.0).contains(&fuel.usage_multiplier()));
        fuel.fix();
        assert_eq!(fuel, FuelLeak::default());
    }
}

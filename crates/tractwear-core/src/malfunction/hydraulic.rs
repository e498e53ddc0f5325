//! Hydraulic surge and drift.

use super::{Phase, RollContext, roll_timed};
use crate::config::{DriftTuning, SurgeTuning};
use crate::rng::RandomSource;
use crate::sim::Millis;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Surge
// ---------------------------------------------------------------------------

/// Brief loss of steering authority that fades out before a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SurgeState {
    pub phase: Phase,
    pub direction: i8,
    pub strength: f32,
}

impl SurgeState {
    /// Fade-out progress in `[0, 1]`: zero until `fade_start` of the window
    /// has elapsed, then linear to one at the end.
    pub fn fade(&self, now: Millis, t: &SurgeTuning) -> f32 {
        let progress = self.phase.progress(now);
        if progress <= t.fade_start {
            return 0.0;
        }
        let span = (1.0 - t.fade_start).max(f32::EPSILON);
        ((progress - t.fade_start) / span).clamp(0.0, 1.0)
    }

    /// Signed steering pull while active.
    pub fn pull(&self, now: Millis, t: &SurgeTuning) -> Option<f32> {
        if !self.phase.is_active_at(now) {
            return None;
        }
        Some(self.direction as f32 * self.strength * (1.0 - self.fade(now, t)))
    }
}

pub fn roll_surge(
    state: &mut SurgeState,
    ctx: &RollContext,
    rng: &mut impl RandomSource,
    t: &SurgeTuning,
) -> bool {
    let started = roll_timed(
        &mut state.phase,
        &t.trigger,
        ctx.reliability.hydraulic,
        ctx.hydraulic_severity,
        1.0,
        ctx,
        rng,
    );
    if started {
        state.direction = rng.sign();
        state.strength = rng.range(t.strength_min, t.strength_max);
    }
    started
}

// ---------------------------------------------------------------------------
// Drift
// ---------------------------------------------------------------------------

/// One-shot notification bookkeeping for drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriftState {
    /// A joint has settled at the midpoint since the last hydraulic repair.
    pub midpoint_notified: bool,
}

/// Lower a raised, released implement joint for `dt_s` seconds.
///
/// Heights are normalized (1 = fully raised). Drift stops exactly at the
/// midpoint and never moves a joint that is already at or below it.
pub fn drift_height(
    height: f32,
    hydraulic_reliability: f32,
    damage: f32,
    severity: f32,
    dt_s: f32,
    t: &DriftTuning,
) -> f32 {
    if !height.is_finite() || height <= t.midpoint {
        return height;
    }
    let rate = t.rate_per_s
        * (1.0 - hydraulic_reliability).clamp(0.0, 1.0)
        * (1.0 + 2.0 * damage.clamp(0.0, 1.0))
        * severity;
    (height - rate * dt_s.max(0.0)).max(t.midpoint)
}

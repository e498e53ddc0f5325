//! Engine-side malfunctions: stall and recovery, misfire, overheat and
//! runaway. All of them scale with the oil severity multiplier.

use super::{Phase, RollContext, roll_timed};
use crate::config::{MalfunctionTuning, RunawayTuning, StallTuning};
use crate::rng::RandomSource;
use crate::sim::Millis;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stall
// ---------------------------------------------------------------------------

/// Stall and recovery window. While `phase` is active the motor cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StallState {
    pub phase: Phase,
    /// Set on vehicle entry; fires on the first tick the motor runs.
    pub first_start_pending: bool,
}

impl StallState {
    pub fn in_recovery(&self, now: Millis) -> bool {
        self.phase.is_active_at(now)
    }

    pub fn start(&mut self, now: Millis, t: &StallTuning) {
        self.phase.activate(now, t.recovery_ms);
        self.first_start_pending = false;
    }

    /// Fire a pending first-start stall once the motor is running.
    pub fn fire_pending(&mut self, motor_running: bool, now: Millis, t: &StallTuning) -> bool {
        if !self.first_start_pending || !motor_running {
            return false;
        }
        self.start(now, t);
        true
    }
}

/// Probability that entering a vehicle schedules a first-start stall.
pub fn entry_stall_probability(engine_reliability: f32, t: &StallTuning) -> f32 {
    ((t.entry_threshold - engine_reliability) * t.entry_scale).clamp(0.0, 1.0)
}

/// Roll the entry stall. Returns `true` if a first-start stall was scheduled.
pub fn roll_entry_stall(
    state: &mut StallState,
    engine_reliability: f32,
    rng: &mut impl RandomSource,
    t: &StallTuning,
) -> bool {
    let p = entry_stall_probability(engine_reliability, t);
    if rng.chance(p) {
        state.first_start_pending = true;
        return true;
    }
    false
}

/// Periodic stall roll while running.
pub fn roll_stall(
    state: &mut StallState,
    ctx: &RollContext,
    rng: &mut impl RandomSource,
    t: &StallTuning,
) -> bool {
    if !ctx.motor_running || !state.phase.can_trigger(ctx.now) {
        return false;
    }
    let unreliability = (1.0 - ctx.reliability.engine).clamp(0.0, 1.0);
    let p = t.chance_per_s * ctx.window_s * unreliability * unreliability * ctx.bias
        * ctx.oil_severity;
    if !rng.chance(p) {
        return false;
    }
    state.start(ctx.now, t);
    true
}

// ---------------------------------------------------------------------------
// Misfire and overheat
// ---------------------------------------------------------------------------

pub fn roll_misfire(
    phase: &mut Phase,
    ctx: &RollContext,
    rng: &mut impl RandomSource,
    t: &MalfunctionTuning,
) -> bool {
    ctx.motor_running
        && roll_timed(
            phase,
            &t.misfire,
            ctx.reliability.engine,
            ctx.oil_severity,
            ctx.oil_severity,
            ctx,
            rng,
        )
}

pub fn roll_overheat(
    phase: &mut Phase,
    ctx: &RollContext,
    rng: &mut impl RandomSource,
    t: &MalfunctionTuning,
) -> bool {
    ctx.motor_running
        && roll_timed(
            phase,
            &t.overheat,
            ctx.reliability.engine,
            ctx.oil_severity,
            ctx.oil_severity,
            ctx,
            rng,
        )
}

// ---------------------------------------------------------------------------
// Runaway
// ---------------------------------------------------------------------------

/// Runaway engine. Has no scheduled end: it stops when the motor is shut
/// off or the vehicle collides, then a cooldown applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunawayState {
    pub active: bool,
    pub started_at: Millis,
    pub cooldown_until: Millis,
}

impl RunawayState {
    pub fn can_trigger(&self, now: Millis) -> bool {
        !self.active && now >= self.cooldown_until
    }

    pub fn start(&mut self, now: Millis) {
        self.active = true;
        self.started_at = now;
    }

    pub fn stop(&mut self, now: Millis, cooldown: Millis) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.cooldown_until = now.saturating_add(cooldown);
        true
    }

    pub(crate) fn clear_cooldown(&mut self, now: Millis) {
        if !self.active && self.cooldown_until != 0 && self.cooldown_until <= now {
            self.cooldown_until = 0;
        }
    }

    /// Continuous check: the host reported motor off or a collision.
    pub fn check_stop(
        &mut self,
        motor_running: bool,
        collided: bool,
        now: Millis,
        t: &RunawayTuning,
    ) -> bool {
        if self.active && (!motor_running || collided) {
            return self.stop(now, t.cooldown_ms);
        }
        false
    }
}

/// Compound trigger: both oil and hydraulic fluid below `runaway_level`.
pub fn roll_runaway(
    state: &mut RunawayState,
    ctx: &RollContext,
    runaway_level: f32,
    rng: &mut impl RandomSource,
    t: &RunawayTuning,
) -> bool {
    if !ctx.motor_running
        || ctx.oil_level >= runaway_level
        || ctx.hydraulic_level >= runaway_level
        || !state.can_trigger(ctx.now)
    {
        return false;
    }
    // Severities are each at most 3, so the product is normalized by 9.
    let p = t.chance_per_s * ctx.window_s * ctx.oil_severity * ctx.hydraulic_severity / 9.0;
    if !rng.chance(p) {
        return false;
    }
    state.start(ctx.now);
    true
}

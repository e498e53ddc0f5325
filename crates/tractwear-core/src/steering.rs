//! Steering effect compositor.
//!
//! Several malfunctions want to bias steering at once. Directional pulls are
//! resolved by priority: only the first active source in
//! [`PullCandidates`] order contributes. Wander and slip are superimposed on
//! top regardless of priority. Every accumulation step is clamped to
//! `[-1, 1]`.
//!
//! The composed [`SteeringOutput`] is applied twice: to the logical input
//! value through [`SteeringOutput::apply_input`], and straight to the
//! physical wheel actuators through [`SteeringOutput::apply_to_wheels`],
//! bypassing host-side smoothing that would swallow small deltas.

use crate::config::SteeringTuning;
use crate::malfunction::Phase;
use crate::rng::RandomSource;
use crate::sim::Millis;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Directional pulls
// ---------------------------------------------------------------------------

/// Which source supplied the directional pull this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PullSource {
    HydraulicSurge,
    FlatTire,
    ImplementPull,
    ChronicPull,
}

/// Signed pull offered by each source, `None` when inactive.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PullCandidates {
    pub surge: Option<f32>,
    pub flat_tire: Option<f32>,
    pub implement: Option<f32>,
    pub chronic: Option<f32>,
}

impl PullCandidates {
    /// The highest-priority active pull.
    pub fn select(&self) -> Option<(PullSource, f32)> {
        [
            (PullSource::HydraulicSurge, self.surge),
            (PullSource::FlatTire, self.flat_tire),
            (PullSource::ImplementPull, self.implement),
            (PullSource::ChronicPull, self.chronic),
        ]
        .into_iter()
        .find_map(|(source, pull)| pull.map(|p| (source, p)))
    }
}

/// Steering-linkage slop from hydraulic degradation, in `[0, slop_cap]`.
///
/// Shared by chronic pull and wander.
pub fn slop_factor(hydraulic_reliability: f32, t: &SteeringTuning) -> f32 {
    if t.pull_threshold <= 0.0 {
        return 0.0;
    }
    ((t.pull_threshold - hydraulic_reliability) / t.pull_threshold).clamp(0.0, t.slop_cap)
}

/// Ramp from 0 at `pull_speed_min_kmh` to 1 at `pull_speed_max_kmh`.
pub fn speed_factor(speed_kmh: f32, t: &SteeringTuning) -> f32 {
    let span = t.pull_speed_max_kmh - t.pull_speed_min_kmh;
    if span <= 0.0 {
        return if speed_kmh.abs() >= t.pull_speed_max_kmh { 1.0 } else { 0.0 };
    }
    ((speed_kmh.abs() - t.pull_speed_min_kmh) / span).clamp(0.0, 1.0)
}

/// Chronic pull from worn hydraulics, `None` while the linkage is tight.
pub fn chronic_pull(
    hydraulic_reliability: f32,
    speed_kmh: f32,
    direction: i8,
    surging: bool,
    t: &SteeringTuning,
) -> Option<f32> {
    let slop = slop_factor(hydraulic_reliability, t);
    if slop <= 0.0 || direction == 0 {
        return None;
    }
    let surge = if surging { t.pull_surge_multiplier } else { 1.0 };
    Some(direction.signum() as f32 * slop * speed_factor(speed_kmh, t) * t.steering_pull_max * surge)
}

/// Periodic roll of the cooldown-gated chronic pull surge.
pub fn roll_pull_surge(
    phase: &mut Phase,
    slop: f32,
    now: Millis,
    window_s: f32,
    rng: &mut impl RandomSource,
    t: &SteeringTuning,
) -> bool {
    if slop <= 0.0 || !phase.can_trigger(now) {
        return false;
    }
    if !rng.chance(t.pull_surge_chance_scale * slop * window_s) {
        return false;
    }
    phase.activate(now, rng.range_ms(t.pull_surge_min_ms, t.pull_surge_max_ms));
    true
}

// ---------------------------------------------------------------------------
// Wander and slip
// ---------------------------------------------------------------------------

/// Runtime-only steering noise state. Not persisted or replicated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SteeringState {
    pub wander_current: f32,
    pub wander_target: f32,
    pub next_retarget: Millis,
}

impl SteeringState {
    /// Advance the wander random walk and return its current value.
    ///
    /// Below `wander_threshold` the target is re-rolled every
    /// `wander_retarget_*` window; the current value approaches it
    /// exponentially. Above the threshold it decays back to zero.
    pub fn advance_wander(
        &mut self,
        hydraulic_reliability: f32,
        now: Millis,
        dt_ms: Millis,
        rng: &mut impl RandomSource,
        t: &SteeringTuning,
    ) -> f32 {
        if hydraulic_reliability < t.wander_threshold {
            if now >= self.next_retarget {
                let slop = slop_factor(hydraulic_reliability, t);
                let amplitude = t.wander_max * slop / t.slop_cap.max(f32::EPSILON);
                self.wander_target = rng.range(-amplitude, amplitude);
                self.next_retarget =
                    now.saturating_add(rng.range_ms(t.wander_retarget_min_ms, t.wander_retarget_max_ms));
            }
        } else {
            self.wander_target = 0.0;
        }
        let tau = t.wander_time_constant_ms.max(1.0);
        let alpha = 1.0 - (-(dt_ms as f32) / tau).exp();
        self.wander_current += (self.wander_target - self.wander_current) * alpha;
        self.wander_current
    }
}

/// Wander contribution, damped by deliberate player input.
pub fn wander_contribution(current: f32, player_input: f32, t: &SteeringTuning) -> f32 {
    let damping = 1.0 - player_input.abs().min(1.0);
    current.clamp(-t.wander_max, t.wander_max) * damping
}

/// Rare one-tick slip impulse on badly worn hydraulics.
pub fn roll_slip(hydraulic_reliability: f32, rng: &mut impl RandomSource, t: &SteeringTuning) -> f32 {
    if hydraulic_reliability >= t.slip_threshold || !rng.chance(t.slip_chance_per_tick) {
        return 0.0;
    }
    rng.sign() as f32 * t.slip_magnitude
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Composed steering effect for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringOutput {
    /// Signed delta in `[-1, 1]`.
    pub delta: f32,
    /// Multiplier on steering travel (reduced turning).
    pub travel_scale: f32,
    pub source: Option<PullSource>,
}

impl Default for SteeringOutput {
    fn default() -> Self {
        Self {
            delta: 0.0,
            travel_scale: 1.0,
            source: None,
        }
    }
}

fn accumulate(acc: f32, term: f32) -> f32 {
    if term.is_finite() {
        (acc + term).clamp(-1.0, 1.0)
    } else {
        acc
    }
}

/// Combine the winning pull with the additive terms.
pub fn compose(pulls: &PullCandidates, wander: f32, slip: f32, travel_scale: f32) -> SteeringOutput {
    let selected = pulls.select();
    let mut delta = 0.0;
    if let Some((_, pull)) = selected {
        delta = accumulate(delta, pull);
    }
    delta = accumulate(delta, wander);
    delta = accumulate(delta, slip);
    let travel_scale = if travel_scale.is_nan() {
        1.0
    } else {
        travel_scale.clamp(0.0, 1.0)
    };
    SteeringOutput {
        delta,
        travel_scale,
        source: selected.map(|(source, _)| source),
    }
}

/// One physical steered wheel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelActuator {
    /// Fraction of the steering delta this wheel receives.
    pub authority: f32,
    /// Maximum physical angle (radians, positive).
    pub max_angle: f32,
    pub angle: f32,
}

impl SteeringOutput {
    /// Override for the logical steering input.
    pub fn apply_input(&self, host_default: f32) -> f32 {
        let base = if host_default.is_finite() { host_default } else { 0.0 };
        (base * self.travel_scale + self.delta).clamp(-1.0, 1.0)
    }

    /// Write the delta straight to the wheel actuators.
    pub fn apply_to_wheels(&self, wheels: &mut [WheelActuator]) {
        for wheel in wheels {
            let max_angle = wheel.max_angle.abs();
            let limit = max_angle * self.travel_scale;
            let angle = wheel.angle + self.delta * wheel.authority * max_angle;
            wheel.angle = angle.clamp(-limit, limit);
        }
    }
}

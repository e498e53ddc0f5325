//! Implement and steering-linkage malfunctions driven by hydraulic health:
//! stuck down, stuck up, pull, drag and reduced turning.

use super::{Phase, RollContext, roll_timed};
use crate::config::MalfunctionTuning;
use crate::rng::RandomSource;
use crate::sim::Millis;
use serde::{Deserialize, Serialize};

/// Implement pulling the vehicle to one side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImplementPullState {
    pub phase: Phase,
    pub direction: i8,
    pub strength: f32,
}

impl ImplementPullState {
    pub fn pull(&self, now: Millis) -> Option<f32> {
        self.phase
            .is_active_at(now)
            .then(|| self.direction as f32 * self.strength)
    }
}

/// Which implement malfunctions started in one roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImplementRolls {
    pub stuck_down: bool,
    pub stuck_up: bool,
    pub pull: bool,
    pub drag: bool,
    pub reduced_turning: bool,
}

/// Roll every implement-side malfunction for one periodic window.
///
/// Stuck-down and stuck-up are mutually exclusive: neither rolls while the
/// other is active.
#[allow(clippy::too_many_arguments)]
pub fn roll_implements(
    stuck_down: &mut Phase,
    stuck_up: &mut Phase,
    pull: &mut ImplementPullState,
    drag: &mut Phase,
    reduced_turning: &mut Phase,
    ctx: &RollContext,
    rng: &mut impl RandomSource,
    t: &MalfunctionTuning,
) -> ImplementRolls {
    let r_h = ctx.reliability.hydraulic;
    let sev = ctx.hydraulic_severity;
    let mut rolls = ImplementRolls::default();

    if ctx.has_implements {
        if !stuck_up.is_active_at(ctx.now) {
            rolls.stuck_down = roll_timed(stuck_down, &t.stuck_down, r_h, sev, sev, ctx, rng);
        }
        if !stuck_down.is_active_at(ctx.now) {
            rolls.stuck_up = roll_timed(stuck_up, &t.stuck_up, r_h, sev, sev, ctx, rng);
        }
    }

    if ctx.implement_lowered && ctx.moving {
        rolls.pull = roll_timed(&mut pull.phase, &t.implement_pull, r_h, sev, 1.0, ctx, rng);
        if rolls.pull {
            pull.direction = rng.sign();
            pull.strength =
                rng.range(t.implement_pull_strength_min, t.implement_pull_strength_max);
        }
    }

    if ctx.implement_lowered {
        rolls.drag = roll_timed(drag, &t.implement_drag, r_h, sev, 1.0, ctx, rng);
    }

    rolls.reduced_turning =
        roll_timed(reduced_turning, &t.reduced_turning, r_h, sev, 1.0, ctx, rng);
    rolls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerTuning;
    use crate::reliability::EffectiveReliability;
    use crate::rng::SimRng;

    fn ctx(r_h: f32) -> RollContext {
        RollContext {
            now: 0,
            window_s: 1.0,
            bias: 1.0,
            reliability: EffectiveReliability {
                engine: 1.0,
                hydraulic: r_h,
                electrical: 1.0,
            },
            oil_severity: 1.0,
            hydraulic_severity: 1.0,
            oil_level: 1.0,
            hydraulic_level: 1.0,
            motor_running: true,
            moving: true,
            has_implements: true,
            implement_lowered: true,
        }
    }

    fn certain(t: &mut TriggerTuning) {
        t.chance_per_s = 1000.0;
    }

    fn certain_tuning() -> MalfunctionTuning {
        let mut t = MalfunctionTuning::default();
        certain(&mut t.stuck_down);
        certain(&mut t.stuck_up);
        certain(&mut t.implement_pull);
        certain(&mut t.implement_drag);
        certain(&mut t.reduced_turning);
        t
    }

    #[test]
    fn healthy_hydraulics_roll_nothing() {
        let t = certain_tuning();
        let mut rng = SimRng::new(1);
        let (mut down, mut up, mut drag, mut turning) = Default::default();
        let mut pull = ImplementPullState::default();
        let rolls = roll_implements(
            &mut down, &mut up, &mut pull, &mut drag, &mut turning, &ctx(0.95), &mut rng, &t,
        );
        assert_eq!(rolls, ImplementRolls::default());
    }

    #[test]
    fn stuck_down_excludes_stuck_up() {
        let t = certain_tuning();
        let mut rng = SimRng::new(2);
        let (mut down, mut up, mut drag, mut turning) = Default::default();
        let mut pull = ImplementPullState::default();
        let rolls = roll_implements(
            &mut down, &mut up, &mut pull, &mut drag, &mut turning, &ctx(0.1), &mut rng, &t,
        );
        assert!(rolls.stuck_down && !rolls.stuck_up);
        assert!(rolls.pull && rolls.drag && rolls.reduced_turning);
        assert!(pull.direction == 1 || pull.direction == -1);
        assert!((0.10..0.25).contains(&pull.strength));
        assert!(pull.pull(0).is_some());
    }

    #[test]
    fn stuck_up_excludes_stuck_down() {
        let t = certain_tuning();
        let mut rng = SimRng::new(5);
        let (mut down, mut drag, mut turning) = Default::default();
        let mut up = Phase::Active {
            started_at: 0,
            ends_at: 10_000,
        };
        let mut pull = ImplementPullState::default();
        let rolls = roll_implements(
            &mut down, &mut up, &mut pull, &mut drag, &mut turning, &ctx(0.1), &mut rng, &t,
        );
        assert!(!rolls.stuck_down && !rolls.stuck_up);
        assert_eq!(down, Phase::Idle);
        assert!(up.is_active_at(0));
    }

    #[test]
    fn raised_implement_cannot_pull_or_drag() {
        let t = certain_tuning();
        let mut rng = SimRng::new(3);
        let (mut down, mut up, mut drag, mut turning) = Default::default();
        let mut pull = ImplementPullState::default();
        let mut c = ctx(0.1);
        c.implement_lowered = false;
        let rolls = roll_implements(
            &mut down, &mut up, &mut pull, &mut drag, &mut turning, &c, &mut rng, &t,
        );
        assert!(!rolls.pull && !rolls.drag);
        assert!(rolls.reduced_turning);
    }

    #[test]
    fn reduced_turning_has_its_own_threshold() {
        let t = certain_tuning();
        let mut rng = SimRng::new(4);
        let (mut down, mut up, mut drag, mut turning) = Default::default();
        let mut pull = ImplementPullState::default();
        let rolls = roll_implements(
            &mut down, &mut up, &mut pull, &mut drag, &mut turning, &ctx(0.55), &mut rng, &t,
        );
        assert!(rolls.stuck_down);
        assert!(!rolls.reduced_turning);
    }
}

//! Malfunction state machines.
//!
//! Every timed malfunction follows the same lifecycle, captured by
//! [`Phase`]:
//!
//! ```text
//! Idle --roll--> Active { started_at, ends_at } --expire--> Cooldown { ends_at } --expire--> Idle
//! ```
//!
//! Trigger rolls happen in the periodic queue; expiry happens every tick so
//! an `Active` phase whose end has passed never survives the next
//! evaluation. Each malfunction owns a nested state struct inside
//! [`Malfunctions`] rather than sharing flat fields.

pub mod hydraulic;
pub mod implement;
pub mod powertrain;

use crate::config::{Tuning, TriggerTuning};
use crate::id::Component;
use crate::reliability::EffectiveReliability;
use crate::rng::RandomSource;
use crate::sim::Millis;
use serde::{Deserialize, Serialize};

pub use hydraulic::{DriftState, SurgeState};
pub use implement::ImplementPullState;
pub use powertrain::{RunawayState, StallState};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle of one timed malfunction. Timestamps are absolute on the
/// simulation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Active { started_at: Millis, ends_at: Millis },
    Cooldown { ends_at: Millis },
}

impl Phase {
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Active { .. })
    }

    /// Active and not yet past its end. Effects read this so an expired
    /// window never leaks an effect even before expiry has run.
    pub fn is_active_at(self, now: Millis) -> bool {
        matches!(self, Phase::Active { ends_at, .. } if now < ends_at)
    }

    /// Whether a trigger roll may move this machine to `Active`.
    pub fn can_trigger(self, now: Millis) -> bool {
        match self {
            Phase::Idle => true,
            Phase::Cooldown { ends_at } => now >= ends_at,
            Phase::Active { .. } => false,
        }
    }

    pub fn activate(&mut self, now: Millis, duration: Millis) {
        *self = Phase::Active {
            started_at: now,
            ends_at: now.saturating_add(duration.max(1)),
        };
    }

    /// Advance past any elapsed deadline.
    ///
    /// An expired `Active` moves to `Cooldown { ends_at + cooldown }`, or
    /// straight to `Idle` when that is already in the past. Returns `true`
    /// when an active window ended.
    pub fn expire(&mut self, now: Millis, cooldown: Millis) -> bool {
        match *self {
            Phase::Active { ends_at, .. } if ends_at <= now => {
                *self = cooldown_or_idle(ends_at.saturating_add(cooldown), now);
                true
            }
            Phase::Cooldown { ends_at } if ends_at <= now => {
                *self = Phase::Idle;
                false
            }
            _ => false,
        }
    }

    /// End an active window early and start the cooldown from `now`.
    pub fn stop(&mut self, now: Millis, cooldown: Millis) -> bool {
        if !self.is_active() {
            return false;
        }
        *self = cooldown_or_idle(now.saturating_add(cooldown), now);
        true
    }

    /// Fraction of the active window elapsed, in `[0, 1]`.
    pub fn progress(self, now: Millis) -> f32 {
        match self {
            Phase::Active { started_at, ends_at } if ends_at > started_at => {
                let elapsed = now.saturating_sub(started_at) as f32;
                (elapsed / (ends_at - started_at) as f32).clamp(0.0, 1.0)
            }
            Phase::Active { .. } => 1.0,
            _ => 0.0,
        }
    }

    /// Flattened persisted form: `(active, start, end, cooldown_end)`.
    pub fn to_flat(self) -> (bool, Millis, Millis, Millis) {
        match self {
            Phase::Idle => (false, 0, 0, 0),
            Phase::Active { started_at, ends_at } => (true, started_at, ends_at, 0),
            Phase::Cooldown { ends_at } => (false, 0, 0, ends_at),
        }
    }

    /// Rebuild from the persisted form, re-validated against `now`.
    ///
    /// An active flag whose end time has already passed is treated as
    /// expired (logged at debug level), never resurrected.
    pub fn from_flat(
        name: &str,
        active: bool,
        started_at: Millis,
        ends_at: Millis,
        cooldown_end: Millis,
        now: Millis,
        cooldown: Millis,
    ) -> Self {
        if active {
            if ends_at > now {
                return Phase::Active {
                    started_at: started_at.min(now),
                    ends_at,
                };
            }
            log::debug!("{name}: stored as active but ended at {ends_at} (now {now}); loading as expired");
            return cooldown_or_idle(ends_at.saturating_add(cooldown), now);
        }
        cooldown_or_idle(cooldown_end, now)
    }
}

fn cooldown_or_idle(ends_at: Millis, now: Millis) -> Phase {
    if ends_at > now {
        Phase::Cooldown { ends_at }
    } else {
        Phase::Idle
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Every user-visible malfunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MalfunctionKind {
    Stall,
    Misfire,
    Overheat,
    HydraulicSurge,
    HydraulicDrift,
    ImplementStuckDown,
    ImplementStuckUp,
    ImplementPull,
    ImplementDrag,
    ReducedTurning,
    SteeringPullSurge,
    Runaway,
    FlatTire,
    Seized(Component),
}

impl MalfunctionKind {
    pub const fn key(self) -> &'static str {
        match self {
            MalfunctionKind::Stall => "stall",
            MalfunctionKind::Misfire => "misfire",
            MalfunctionKind::Overheat => "overheat",
            MalfunctionKind::HydraulicSurge => "hydraulic_surge",
            MalfunctionKind::HydraulicDrift => "hydraulic_drift",
            MalfunctionKind::ImplementStuckDown => "implement_stuck_down",
            MalfunctionKind::ImplementStuckUp => "implement_stuck_up",
            MalfunctionKind::ImplementPull => "implement_pull",
            MalfunctionKind::ImplementDrag => "implement_drag",
            MalfunctionKind::ReducedTurning => "reduced_turning",
            MalfunctionKind::SteeringPullSurge => "steering_pull_surge",
            MalfunctionKind::Runaway => "runaway",
            MalfunctionKind::FlatTire => "flat_tire",
            MalfunctionKind::Seized(Component::Engine) => "engine_seized",
            MalfunctionKind::Seized(Component::Hydraulic) => "hydraulic_seized",
            MalfunctionKind::Seized(Component::Electrical) => "electrical_seized",
        }
    }
}

// ---------------------------------------------------------------------------
// Roll context
// ---------------------------------------------------------------------------

/// Inputs shared by every periodic trigger roll for one vehicle.
#[derive(Debug, Clone, Copy)]
pub struct RollContext {
    pub now: Millis,
    /// Length of the periodic window being evaluated, in seconds.
    pub window_s: f32,
    /// Trait wear bias.
    pub bias: f32,
    pub reliability: EffectiveReliability,
    pub oil_severity: f32,
    pub hydraulic_severity: f32,
    pub oil_level: f32,
    pub hydraulic_level: f32,
    pub motor_running: bool,
    pub moving: bool,
    pub has_implements: bool,
    pub implement_lowered: bool,
}

/// Roll a reliability-gated timed malfunction.
///
/// Chance is `chance_per_s × window × (1 − r) × bias × severity`; the rolled
/// duration is scaled by `duration_scale`. Returns `true` if it started.
pub(crate) fn roll_timed(
    phase: &mut Phase,
    trigger: &TriggerTuning,
    reliability: f32,
    severity: f32,
    duration_scale: f32,
    ctx: &RollContext,
    rng: &mut impl RandomSource,
) -> bool {
    if reliability >= trigger.threshold || !phase.can_trigger(ctx.now) {
        return false;
    }
    let p = trigger.chance_per_s
        * ctx.window_s
        * (1.0 - reliability).clamp(0.0, 1.0)
        * ctx.bias
        * severity;
    if !rng.chance(p) {
        return false;
    }
    let base = rng.range_ms(trigger.min_duration_ms, trigger.max_duration_ms);
    let duration = (base as f32 * duration_scale.max(0.0)).round() as Millis;
    phase.activate(ctx.now, duration);
    true
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// All malfunction machines of one vehicle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Malfunctions {
    pub stall: StallState,
    pub misfire: Phase,
    pub overheat: Phase,
    pub surge: SurgeState,
    pub drift: DriftState,
    pub stuck_down: Phase,
    pub stuck_up: Phase,
    pub implement_pull: ImplementPullState,
    pub implement_drag: Phase,
    pub reduced_turning: Phase,
    pub pull_surge: Phase,
    pub runaway: RunawayState,
}

impl Malfunctions {
    /// Run expiry on every timed machine. Returns the kinds whose active
    /// window ended.
    pub fn expire_all(&mut self, now: Millis, t: &Tuning) -> Vec<MalfunctionKind> {
        let m = &t.malfunction;
        let mut ended = Vec::new();
        let mut check = |ended_now: bool, kind: MalfunctionKind| {
            if ended_now {
                ended.push(kind);
            }
        };
        check(self.stall.phase.expire(now, 0), MalfunctionKind::Stall);
        check(self.misfire.expire(now, m.misfire.cooldown_ms), MalfunctionKind::Misfire);
        check(self.overheat.expire(now, m.overheat.cooldown_ms), MalfunctionKind::Overheat);
        check(
            self.surge.phase.expire(now, m.surge.trigger.cooldown_ms),
            MalfunctionKind::HydraulicSurge,
        );
        check(
            self.stuck_down.expire(now, m.stuck_down.cooldown_ms),
            MalfunctionKind::ImplementStuckDown,
        );
        check(
            self.stuck_up.expire(now, m.stuck_up.cooldown_ms),
            MalfunctionKind::ImplementStuckUp,
        );
        check(
            self.implement_pull.phase.expire(now, m.implement_pull.cooldown_ms),
            MalfunctionKind::ImplementPull,
        );
        check(
            self.implement_drag.expire(now, m.implement_drag.cooldown_ms),
            MalfunctionKind::ImplementDrag,
        );
        check(
            self.reduced_turning.expire(now, m.reduced_turning.cooldown_ms),
            MalfunctionKind::ReducedTurning,
        );
        check(
            self.pull_surge.expire(now, t.steering.pull_surge_cooldown_ms),
            MalfunctionKind::SteeringPullSurge,
        );
        self.runaway.clear_cooldown(now);
        ended
    }

    /// Timed kinds currently active at `now`.
    pub fn active_timed(&self, now: Millis) -> Vec<MalfunctionKind> {
        [
            (self.stall.phase, MalfunctionKind::Stall),
            (self.misfire, MalfunctionKind::Misfire),
            (self.overheat, MalfunctionKind::Overheat),
            (self.surge.phase, MalfunctionKind::HydraulicSurge),
            (self.stuck_down, MalfunctionKind::ImplementStuckDown),
            (self.stuck_up, MalfunctionKind::ImplementStuckUp),
            (self.implement_pull.phase, MalfunctionKind::ImplementPull),
            (self.implement_drag, MalfunctionKind::ImplementDrag),
            (self.reduced_turning, MalfunctionKind::ReducedTurning),
            (self.pull_surge, MalfunctionKind::SteeringPullSurge),
        ]
        .into_iter()
        .filter(|(phase, _)| phase.is_active_at(now))
        .map(|(_, kind)| kind)
        .chain(self.runaway.active.then_some(MalfunctionKind::Runaway))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SimRng;

    fn ctx(now: Millis, r: f32) -> RollContext {
        RollContext {
            now,
            window_s: 1.0,
            bias: 1.0,
            reliability: EffectiveReliability {
                engine: r,
                hydraulic: r,
                electrical: r,
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

    #[test]
    fn expired_active_never_survives_expiry() {
        let mut phase = Phase::Idle;
        phase.activate(1000, 500);
        assert!(phase.is_active_at(1499));
        assert!(!phase.expire(1499, 2000));
        assert!(phase.expire(1500, 2000));
        assert_eq!(phase, Phase::Cooldown { ends_at: 3500 });
        assert!(!phase.can_trigger(3499));
        assert!(phase.can_trigger(3500));
        phase.expire(3500, 2000);
        assert_eq!(phase, Phase::Idle);
    }

    #[test]
    fn late_expiry_skips_elapsed_cooldown() {
        let mut phase = Phase::Active {
            started_at: 0,
            ends_at: 100,
        };
        assert!(phase.expire(10_000, 2000));
        assert_eq!(phase, Phase::Idle);
    }

    #[test]
    fn zero_duration_still_opens_a_window() {
        let mut phase = Phase::Idle;
        phase.activate(50, 0);
        assert_eq!(
            phase,
            Phase::Active {
                started_at: 50,
                ends_at: 51
            }
        );
    }

    #[test]
    fn progress_tracks_window() {
        let phase = Phase::Active {
            started_at: 1000,
            ends_at: 2000,
        };
        assert_eq!(phase.progress(1000), 0.0);
        assert!((phase.progress(1600) - 0.6).abs() < 1e-6);
        assert_eq!(phase.progress(5000), 1.0);
        assert_eq!(Phase::Idle.progress(5000), 0.0);
    }

    #[test]
    fn stop_starts_cooldown_from_now() {
        let mut phase = Phase::Active {
            started_at: 0,
            ends_at: u64::MAX,
        };
        assert!(phase.stop(500, 1000));
        assert_eq!(phase, Phase::Cooldown { ends_at: 1500 });
        assert!(!phase.stop(600, 1000));
    }

    #[test]
    fn from_flat_revalidates_against_clock() {
        let live = Phase::from_flat("misfire", true, 100, 900, 0, 500, 2000);
        assert_eq!(
            live,
            Phase::Active {
                started_at: 100,
                ends_at: 900
            }
        );

        let stale = Phase::from_flat("misfire", true, 100, 400, 0, 500, 2000);
        assert_eq!(stale, Phase::Cooldown { ends_at: 2400 });

        let long_gone = Phase::from_flat("misfire", true, 100, 400, 0, 50_000, 2000);
        assert_eq!(long_gone, Phase::Idle);

        let cooling = Phase::from_flat("misfire", false, 0, 0, 800, 500, 2000);
        assert_eq!(cooling, Phase::Cooldown { ends_at: 800 });
        assert_eq!(Phase::from_flat("misfire", false, 0, 0, 300, 500, 2000), Phase::Idle);
    }

    #[test]
    fn flat_form_round_trips_live_phases() {
        for phase in [
            Phase::Idle,
            Phase::Active {
                started_at: 10,
                ends_at: 900,
            },
            Phase::Cooldown { ends_at: 700 },
        ] {
            let (active, start, end, cooldown_end) = phase.to_flat();
            assert_eq!(Phase::from_flat("x", active, start, end, cooldown_end, 20, 0), phase);
        }
    }

    #[test]
    fn roll_timed_respects_threshold_and_cooldown() {
        let trigger = TriggerTuning {
            chance_per_s: 100.0,
            threshold: 0.5,
            min_duration_ms: 1000,
            max_duration_ms: 1000,
            cooldown_ms: 5000,
        };
        let mut rng = SimRng::new(1);
        let mut phase = Phase::Idle;

        assert!(!roll_timed(&mut phase, &trigger, 0.6, 1.0, 1.0, &ctx(0, 0.6), &mut rng));
        assert_eq!(phase, Phase::Idle);

        assert!(roll_timed(&mut phase, &trigger, 0.1, 1.0, 2.0, &ctx(0, 0.1), &mut rng));
        assert_eq!(
            phase,
            Phase::Active {
                started_at: 0,
                ends_at: 2000
            }
        );

        assert!(!roll_timed(&mut phase, &trigger, 0.1, 1.0, 1.0, &ctx(100, 0.1), &mut rng));
        phase.expire(2000, trigger.cooldown_ms);
        assert!(!roll_timed(&mut phase, &trigger, 0.1, 1.0, 1.0, &ctx(3000, 0.1), &mut rng));
        assert!(roll_timed(&mut phase, &trigger, 0.1, 1.0, 1.0, &ctx(7000, 0.1), &mut rng));
    }

    #[test]
    fn expire_all_reports_ended_kinds() {
        let t = Tuning::default();
        let mut m = Malfunctions::default();
        m.misfire.activate(0, 200);
        m.overheat.activate(0, 20_000);
        assert_eq!(m.active_timed(100), vec![MalfunctionKind::Misfire, MalfunctionKind::Overheat]);

        let ended = m.expire_all(200, &t);
        assert_eq!(ended, vec![MalfunctionKind::Misfire]);
        assert_eq!(m.misfire, Phase::Cooldown { ends_at: 2200 });
        assert_eq!(m.active_timed(200), vec![MalfunctionKind::Overheat]);
    }
}

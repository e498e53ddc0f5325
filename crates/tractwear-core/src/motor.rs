//! Motor-run gate.
//!
//! The host asks "may the motor run?" every tick and passes its own default
//! behaviour as a continuation. The gate either answers `false` itself or
//! defers to that continuation.

use crate::config::GovernorTuning;

/// Snapshot of everything the gate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorGateInput {
    pub engine_seized: bool,
    pub in_stall_recovery: bool,
    pub overheating: bool,
    pub misfiring: bool,
    pub runaway: bool,
    pub engine_reliability: f32,
    pub speed_kmh: f32,
    pub max_speed_kmh: f32,
    /// Per-vehicle gate evaluation counter.
    pub frame: u64,
}

/// Why the gate refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateBlock {
    Seized,
    StallRecovery,
    Overheat,
    Misfire,
    Governor,
    CompatVeto,
}

/// Reliability-derived speed ceiling, `None` when the governor is off.
pub fn governor_ceiling(engine_reliability: f32, max_speed_kmh: f32, t: &GovernorTuning) -> Option<f32> {
    if engine_reliability >= t.reliability_threshold || t.reliability_threshold <= 0.0 {
        return None;
    }
    let r = engine_reliability.clamp(0.0, t.reliability_threshold);
    let fraction = t.floor_fraction + (1.0 - t.floor_fraction) * r / t.reliability_threshold;
    Some(max_speed_kmh * fraction)
}

/// Rev-limiter feel: above the ceiling, refuse 2 of every 3 frames.
fn governor_blocks(input: &MotorGateInput, t: &GovernorTuning) -> bool {
    if input.runaway {
        return false;
    }
    match governor_ceiling(input.engine_reliability, input.max_speed_kmh, t) {
        Some(ceiling) => input.speed_kmh.abs() > ceiling + t.grace_kmh && input.frame % 3 != 0,
        None => false,
    }
}

/// The engine's own refusals, in evaluation order.
pub fn check(input: &MotorGateInput, t: &GovernorTuning) -> Option<GateBlock> {
    if input.engine_seized {
        Some(GateBlock::Seized)
    } else if input.in_stall_recovery {
        Some(GateBlock::StallRecovery)
    } else if input.overheating {
        Some(GateBlock::Overheat)
    } else if input.misfiring {
        Some(GateBlock::Misfire)
    } else if governor_blocks(input, t) {
        Some(GateBlock::Governor)
    } else {
        None
    }
}

/// Full gate: own checks, then the compatibility veto, then the host default.
/// Neither continuation runs once an earlier step has refused.
pub fn evaluate(
    input: &MotorGateInput,
    t: &GovernorTuning,
    compat_veto: impl FnOnce() -> bool,
    default: impl FnOnce() -> bool,
) -> bool {
    if let Some(block) = check(input, t) {
        log::trace!("motor gate refused: {block:?}");
        return false;
    }
    if compat_veto() {
        log::trace!("motor gate refused: {:?}", GateBlock::CompatVeto);
        return false;
    }
    default()
}

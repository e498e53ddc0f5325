//! Boundary types exchanged with the simulation host.
//!
//! The host reports per-vehicle [`VehicleInputs`] before each tick and reads
//! [`VehicleOutputs`] after it. An optional [`CompatLayer`] lets another
//! system adjust the reliability used for rolls, chain an external damage
//! check and veto the motor.

use crate::id::{JointId, VehicleId};
use crate::reliability::EffectiveReliability;
use crate::sim::Millis;
use crate::steering::SteeringOutput;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One implement attacher joint as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImplementJoint {
    pub joint: JointId,
    /// Normalized lift height, 1 = fully raised.
    pub height: f32,
    /// The player is actively raising or lowering this joint.
    pub player_moving: bool,
    /// The implement is in its working (lowered) position.
    pub lowered: bool,
}

/// Host state for one vehicle, refreshed every tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleInputs {
    pub speed_kmh: f32,
    pub max_speed_kmh: f32,
    pub motor_running: bool,
    /// Player steering input in `[-1, 1]`.
    pub steering_input: f32,
    /// Host-side body damage in `[0, 1]`.
    pub damage: f32,
    /// Distance travelled since the previous tick, in metres.
    pub distance_m: f32,
    /// The vehicle collided this tick.
    pub collided: bool,
    pub implements: Vec<ImplementJoint>,
}

impl VehicleInputs {
    pub fn has_implements(&self) -> bool {
        !self.implements.is_empty()
    }

    pub fn implement_lowered(&self) -> bool {
        self.implements.iter().any(|j| j.lowered)
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A joint height the engine wants the host to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointCommand {
    pub joint: JointId,
    pub height: f32,
}

/// Effects for the host to apply after a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleOutputs {
    pub steering: SteeringOutput,
    pub joint_commands: Vec<JointCommand>,
    /// Raising implements is withheld.
    pub lift_blocked: bool,
    /// Lowering implements is withheld.
    pub lower_blocked: bool,
    pub speed_cap_multiplier: f32,
    pub max_speed_multiplier: f32,
    pub brake_multiplier: f32,
    pub governor_disabled: bool,
    /// The host should shut the motor off (stall).
    pub request_motor_stop: bool,
    pub fuel_usage_multiplier: f32,
    pub traction_multiplier: f32,
}

impl Default for VehicleOutputs {
    fn default() -> Self {
        Self {
            steering: SteeringOutput::default(),
            joint_commands: Vec::new(),
            lift_blocked: false,
            lower_blocked: false,
            speed_cap_multiplier: 1.0,
            max_speed_multiplier: 1.0,
            brake_multiplier: 1.0,
            governor_disabled: false,
            request_motor_stop: false,
            fuel_usage_multiplier: 1.0,
            traction_multiplier: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Compatibility layer
// ---------------------------------------------------------------------------

/// Optional cross-system compatibility hooks.
///
/// Every method has a pass-through default, so an implementation only
/// overrides what it cares about. Without a layer installed the engine uses
/// native values.
pub trait CompatLayer: Send + Sync {
    /// Reliability used for probability rolls.
    fn effective_reliability(&self, _vehicle: VehicleId, native: EffectiveReliability) -> EffectiveReliability {
        native
    }

    /// Chain hook for the damage value used by drift. Call `next` to get
    /// the value the rest of the chain would produce.
    fn damage_check(&self, _vehicle: VehicleId, next: &dyn Fn() -> f32) -> f32 {
        next()
    }

    /// Return `true` to refuse the motor regardless of the host default.
    fn vetoes_motor_run(&self, _vehicle: VehicleId, _now: Millis) -> bool {
        false
    }
}

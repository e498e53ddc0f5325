//! The simulation engine: owns every vehicle's record and orchestrates the
//! six-phase tick pipeline.
//!
//! # Six-Phase Pipeline
//!
//! Each `tick(dt)` runs:
//! 1. **Expiry** -- advance the clock; end every malfunction whose window passed
//! 2. **Continuous** -- fluid drain, oil starvation, tire distance, drift,
//!    runaway stop, pending first-start stalls
//! 3. **Periodic** -- when the cadence accumulator fills: operating wear,
//!    breakdowns, leaks, flats and every malfunction trigger roll
//! 4. **Compose** -- steering composition and host outputs
//! 5. **Events** -- deliver buffered events and rate-limited notices
//! 6. **Bookkeeping** -- update tick counter, compute state hash
//!
//! Vehicles own disjoint state, so phases 1-4 run per vehicle, one vehicle
//! after another (or across threads with the `parallel` feature). Events are
//! merged in slot order either way, so both paths produce identical results.
//!
//! Only an [`Role::Authority`] engine runs phases 1-4. An observer advances
//! its clock, accepts replicated records and answers read queries; every
//! mutator is a no-op there.

use crate::config::Tuning;
use crate::event::{Event, EventBus, EventKind, LeakSource, NoticeLimiter, PassiveListener};
use crate::fluid::{FluidKind, FluidWarning};
use crate::host::{CompatLayer, JointCommand, VehicleInputs, VehicleOutputs};
use crate::id::{Component, VehicleId};
use crate::malfunction::{MalfunctionKind, RollContext, hydraulic, implement, powertrain};
use crate::motor::{self, MotorGateInput};
use crate::record::VehicleRecord;
use crate::reliability::{BreakdownOutcome, EffectiveReliability, TraitTier, sanitize_unit};
use crate::replication::{self, ReplicationError};
use crate::rng::{RandomSource, SimRng};
use crate::sim::{Cadence, MILLIS_PER_HOUR, Millis, Role, SimState, StateHash, TickReport};
use crate::steering::{self, PullCandidates, SteeringState, WheelActuator};
use crate::tire::TireQuality;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Vehicle
// ---------------------------------------------------------------------------

/// Engine-side slot for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub record: VehicleRecord,
    pub(crate) rng: SimRng,
    pub(crate) steering: SteeringState,
    /// Motor gate evaluation counter (governor frame index).
    pub(crate) gate_frames: u64,
    #[serde(skip)]
    pub(crate) inputs: VehicleInputs,
    #[serde(skip)]
    pub(crate) outputs: VehicleOutputs,
}

impl Vehicle {
    fn new(record: VehicleRecord, rng: SimRng) -> Self {
        Self {
            record,
            rng,
            steering: SteeringState::default(),
            gate_frames: 0,
            inputs: VehicleInputs::default(),
            outputs: VehicleOutputs::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    pub(crate) vehicles: SlotMap<VehicleId, Vehicle>,
    pub(crate) tuning: Tuning,
    pub(crate) role: Role,

    /// Simulation state (tick counter, clock).
    pub sim_state: SimState,

    /// Gate for the throttled periodic queue.
    pub(crate) periodic: Cadence,

    /// Base seed for per-vehicle RNG streams.
    pub(crate) seed: u64,

    /// Vehicles spawned so far; selects the next RNG stream.
    pub(crate) spawned: u64,

    pub(crate) paused: bool,

    /// The most recently computed state hash.
    pub(crate) last_state_hash: u64,

    /// Typed event bus; the host's notification surface.
    pub event_bus: EventBus,

    pub(crate) notices: NoticeLimiter,

    pub(crate) compat: Option<Box<dyn CompatLayer>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("vehicles", &self.vehicles.len())
            .field("role", &self.role)
            .field("sim_state", &self.sim_state)
            .field("periodic", &self.periodic)
            .field("seed", &self.seed)
            .field("paused", &self.paused)
            .field("compat", &self.compat.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(tuning: Tuning, role: Role, seed: u64) -> Self {
        let periodic = Cadence::new(tuning.scheduler.periodic_interval_ms);
        Self {
            vehicles: SlotMap::with_key(),
            tuning,
            role,
            sim_state: SimState::new(),
            periodic,
            seed,
            spawned: 0,
            paused: false,
            last_state_hash: 0,
            event_bus: EventBus::default(),
            notices: NoticeLimiter::default(),
            compat: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role.is_authority()
    }

    /// Promote or demote this engine (host migration).
    pub fn set_role(&mut self, role: Role) {
        if role != self.role {
            log::info!("engine role changed: {:?} -> {:?}", self.role, role);
        }
        self.role = role;
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Replace the tuning. The periodic interval takes effect immediately;
    /// accumulated time is kept.
    pub fn set_tuning(&mut self, tuning: Tuning) {
        self.periodic.interval = tuning.scheduler.periodic_interval_ms.max(1);
        self.tuning = tuning;
    }

    pub fn now(&self) -> Millis {
        self.sim_state.clock
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    // -----------------------------------------------------------------------
    // Vehicle management
    // -----------------------------------------------------------------------

    /// Create a vehicle with a freshly rolled record.
    ///
    /// Observers register the vehicle with a default record; the real one
    /// arrives through replication.
    pub fn spawn_vehicle(&mut self) -> VehicleId {
        let mut rng = self.next_rng();
        let record = if self.is_authority() {
            VehicleRecord::spawn(&mut rng)
        } else {
            VehicleRecord::default()
        };
        self.vehicles.insert(Vehicle::new(record, rng))
    }

    /// Register a vehicle with an existing record (load path).
    pub fn insert_vehicle(&mut self, mut record: VehicleRecord) -> VehicleId {
        record.tires.rebuild_multipliers();
        let rng = self.next_rng();
        self.vehicles.insert(Vehicle::new(record, rng))
    }

    pub fn remove_vehicle(&mut self, id: VehicleId) -> Option<VehicleRecord> {
        self.notices.forget(id);
        self.vehicles.remove(id).map(|v| v.record)
    }

    fn next_rng(&mut self) -> SimRng {
        let rng = SimRng::derive(self.seed, self.spawned);
        self.spawned += 1;
        rng
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.keys()
    }

    pub fn contains(&self, id: VehicleId) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn record(&self, id: VehicleId) -> Option<&VehicleRecord> {
        self.vehicles.get(id).map(|v| &v.record)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Report host state for the next tick. Returns `false` for unknown ids.
    pub fn set_inputs(&mut self, id: VehicleId, inputs: VehicleInputs) -> bool {
        match self.vehicles.get_mut(id) {
            Some(v) => {
                v.inputs = inputs;
                true
            }
            None => false,
        }
    }

    pub fn inputs(&self, id: VehicleId) -> Option<&VehicleInputs> {
        self.vehicles.get(id).map(|v| &v.inputs)
    }

    /// Effects computed by the last tick.
    pub fn outputs(&self, id: VehicleId) -> Option<&VehicleOutputs> {
        self.vehicles.get(id).map(|v| &v.outputs)
    }

    // -----------------------------------------------------------------------
    // Compatibility layer
    // -----------------------------------------------------------------------

    pub fn set_compat(&mut self, layer: Box<dyn CompatLayer>) {
        self.compat = Some(layer);
    }

    pub fn clear_compat(&mut self) -> Option<Box<dyn CompatLayer>> {
        self.compat.take()
    }

    /// Reliability used for rolls, after the compatibility layer.
    pub fn effective_reliability(&self, id: VehicleId) -> Option<EffectiveReliability> {
        let v = self.vehicles.get(id)?;
        Some(effective_reliability(
            self.compat.as_deref(),
            id,
            v.record.reliability.native(),
        ))
    }

    // -----------------------------------------------------------------------
    // Event system
    // -----------------------------------------------------------------------

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.event_bus.on_passive(kind, listener);
    }

    // -----------------------------------------------------------------------
    // State hash
    // -----------------------------------------------------------------------

    /// Get the most recently computed state hash.
    pub fn state_hash(&self) -> u64 {
        self.last_state_hash
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Pause the simulation. While paused, `tick()` is a no-op and the clock
    /// does not move, so no timeout can elapse.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the simulation by `dt` milliseconds.
    pub fn tick(&mut self, dt: Millis) -> TickReport {
        if self.paused {
            return TickReport::default();
        }
        let mut report = TickReport::default();

        // Phase 1 starts with the clock so every later phase sees the new time.
        self.sim_state.clock = self.sim_state.clock.saturating_add(dt);
        let now = self.sim_state.clock;

        if !self.role.is_authority() {
            self.phase_bookkeeping();
            return report;
        }

        let window = self.periodic.accumulate(dt);
        report.periodic_ran = window.is_some();
        if let Some(window) = window {
            log::trace!("periodic evaluation at {now} ms over {window} ms");
        }

        // Phases 1-4.
        let ctx = TickContext {
            now,
            dt,
            window,
            tuning: &self.tuning,
            compat: self.compat.as_deref(),
        };
        let events = evaluate_all(&mut self.vehicles, &ctx);
        report.vehicles = self.vehicles.len();
        report.events = events.len();

        // Phase 5.
        self.phase_events(events, now);

        // Phase 6.
        self.phase_bookkeeping();
        report
    }

    // -----------------------------------------------------------------------
    // Phase 5: Events
    // -----------------------------------------------------------------------

    fn phase_events(&mut self, events: Vec<Event>, now: Millis) {
        let min_interval = self.tuning.notices.min_interval_ms;
        for event in events {
            let notice = event.notice();
            let vehicle = event.vehicle();
            self.event_bus.emit(event);
            if let Some(notice) = notice
                && self.notices.admit(vehicle, notice, now, min_interval)
            {
                self.event_bus.emit(Event::Notice {
                    vehicle,
                    notice,
                    at: now,
                });
            }
        }
        self.event_bus.deliver();
    }

    // -----------------------------------------------------------------------
    // Phase 6: Bookkeeping
    // -----------------------------------------------------------------------

    fn phase_bookkeeping(&mut self) {
        self.sim_state.tick += 1;
        self.last_state_hash = self.compute_state_hash();
    }

    /// Compute a deterministic hash of the current simulation state.
    fn compute_state_hash(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.sim_state.tick);
        hasher.write_u64(self.sim_state.clock);
        // SlotMap iteration order is deterministic for a given history.
        for (_, v) in &self.vehicles {
            v.record.hash_reliability(&mut hasher);
            v.record.hash_fluids(&mut hasher);
            v.record.hash_tires(&mut hasher);
            v.record.hash_malfunctions(&mut hasher);
            hasher.write_u64(v.rng.state());
        }
        hasher.finish()
    }

    // -----------------------------------------------------------------------
    // Host hooks
    // -----------------------------------------------------------------------

    /// Motor-run hook. `default` is the host's own behaviour and is only
    /// called when nothing here refuses. Unknown vehicles defer to it.
    pub fn can_motor_run(&mut self, id: VehicleId, default: impl FnOnce() -> bool) -> bool {
        let now = self.sim_state.clock;
        let Some(v) = self.vehicles.get_mut(id) else {
            return default();
        };
        let frame = v.gate_frames;
        v.gate_frames = v.gate_frames.wrapping_add(1);

        let record = &v.record;
        let m = &record.malfunctions;
        let effective =
            effective_reliability(self.compat.as_deref(), id, record.reliability.native());
        let input = MotorGateInput {
            engine_seized: record.reliability.is_seized(Component::Engine),
            in_stall_recovery: m.stall.in_recovery(now),
            overheating: m.overheat.is_active_at(now),
            misfiring: m.misfire.is_active_at(now),
            runaway: m.runaway.active,
            engine_reliability: effective.engine,
            speed_kmh: v.inputs.speed_kmh,
            max_speed_kmh: v.inputs.max_speed_kmh,
            frame,
        };
        let compat = self.compat.as_deref();
        let veto = || compat.is_some_and(|c| c.vetoes_motor_run(id, now));
        motor::evaluate(&input, &self.tuning.governor, veto, default)
    }

    /// Steering-input hook: the host's value with the composed delta
    /// applied. Observers and unknown vehicles pass the default through.
    pub fn steering_input(&self, id: VehicleId, host_default: f32) -> f32 {
        match self.vehicles.get(id) {
            Some(v) if self.is_authority() => v.outputs.steering.apply_input(host_default),
            _ => host_default,
        }
    }

    /// Write the composed delta straight to the physical wheel actuators.
    pub fn apply_steering_to_wheels(&self, id: VehicleId, wheels: &mut [WheelActuator]) -> bool {
        match self.vehicles.get(id) {
            Some(v) if self.is_authority() => {
                v.outputs.steering.apply_to_wheels(wheels);
                true
            }
            _ => false,
        }
    }

    /// A driver entered the vehicle. Weak engines may schedule a stall on
    /// the first start. Returns whether one was scheduled.
    pub fn on_vehicle_enter(&mut self, id: VehicleId) -> bool {
        if !self.is_authority() {
            return false;
        }
        let Some(v) = self.vehicles.get_mut(id) else {
            return false;
        };
        let effective =
            effective_reliability(self.compat.as_deref(), id, v.record.reliability.native());
        let scheduled = powertrain::roll_entry_stall(
            &mut v.record.malfunctions.stall,
            effective.engine,
            &mut v.rng,
            &self.tuning.malfunction.stall,
        );
        if scheduled {
            log::debug!("first-start stall scheduled for {id:?}");
        }
        scheduled
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub fn quality_trait(&self, id: VehicleId) -> Option<f32> {
        self.record(id).map(|r| r.reliability.quality_trait())
    }

    pub fn trait_tier(&self, id: VehicleId) -> Option<TraitTier> {
        self.record(id)
            .map(|r| r.reliability.tier(&self.tuning.reliability))
    }

    pub fn lifetime_multiplier(&self, id: VehicleId) -> Option<f32> {
        self.record(id)
            .map(|r| r.reliability.lifetime_multiplier(&self.tuning.reliability))
    }

    pub fn fluid_level(&self, id: VehicleId, fluid: FluidKind) -> Option<f32> {
        self.record(id).map(|r| r.fluid(fluid).level)
    }

    pub fn active_malfunctions(&self, id: VehicleId) -> Option<Vec<MalfunctionKind>> {
        let now = self.sim_state.clock;
        self.record(id).map(|r| r.active_malfunctions(now))
    }

    /// `(repair_count, breakdown_count)`.
    pub fn degradation_counters(&self, id: VehicleId) -> Option<(u32, u32)> {
        self.record(id)
            .map(|r| (r.reliability.repair_count(), r.reliability.breakdown_count()))
    }

    // -----------------------------------------------------------------------
    // Mutators (authority only)
    // -----------------------------------------------------------------------

    fn authoritative_record(&mut self, id: VehicleId) -> Option<&mut VehicleRecord> {
        if !self.role.is_authority() {
            return None;
        }
        self.vehicles.get_mut(id).map(|v| &mut v.record)
    }

    /// Repair a component. Returns whether anything was applied.
    pub fn repair(&mut self, id: VehicleId, component: Component, amount: f32) -> bool {
        let t = self.tuning.reliability.clone();
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.reliability.repair(component, amount, &t);
        if component == Component::Hydraulic {
            record.malfunctions.drift.midpoint_notified = false;
        }
        true
    }

    pub fn repair_seizure(&mut self, id: VehicleId, component: Component) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.reliability.repair_seizure(component);
        if component == Component::Hydraulic {
            record.malfunctions.drift.midpoint_notified = false;
        }
        true
    }

    /// Field-repair tools: overwrite reliability, clamped to the ceiling.
    pub fn set_reliability(&mut self, id: VehicleId, component: Component, value: f32) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.reliability.set_reliability(component, value);
        true
    }

    /// Restoration collaborator: set the durability ceiling.
    pub fn restore_ceiling(&mut self, id: VehicleId, component: Component, ceiling: f32) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.reliability.restore_ceiling(component, ceiling);
        true
    }

    pub fn refill_fluid(&mut self, id: VehicleId, fluid: FluidKind, level: f32) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.fluid_mut(fluid).refill(level);
        true
    }

    pub fn fix_leak(&mut self, id: VehicleId, source: LeakSource) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        match source {
            LeakSource::Oil => record.oil.fix_leak(),
            LeakSource::Hydraulic => record.hydraulic_fluid.fix_leak(),
            LeakSource::Fuel => record.fuel_leak.fix(),
        }
        true
    }

    pub fn replace_tires(&mut self, id: VehicleId, quality: TireQuality) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.tires.replace(quality);
        true
    }

    pub fn service_flat(&mut self, id: VehicleId) -> bool {
        let Some(record) = self.authoritative_record(id) else {
            return false;
        };
        record.tires.service_flat();
        true
    }

    // -----------------------------------------------------------------------
    // Replication
    // -----------------------------------------------------------------------

    /// Full-state sync payload for one vehicle.
    pub fn replicate(&self, id: VehicleId) -> Option<Vec<u8>> {
        self.record(id).map(replication::encode_record)
    }

    /// Apply a replicated record on an observer. Returns `Ok(false)` on the
    /// authority or for unknown vehicles.
    pub fn apply_replication(&mut self, id: VehicleId, payload: &[u8]) -> Result<bool, ReplicationError> {
        if self.role.is_authority() {
            log::debug!("ignoring replicated record for {id:?} on the authority");
            return Ok(false);
        }
        let Some(v) = self.vehicles.get_mut(id) else {
            return Ok(false);
        };
        v.record = replication::decode_record(payload)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Per-vehicle evaluation
// ---------------------------------------------------------------------------

/// Read-only inputs shared by every vehicle's evaluation in one tick.
struct TickContext<'a> {
    now: Millis,
    dt: Millis,
    /// Periodic window, when the cadence fired this tick.
    window: Option<Millis>,
    tuning: &'a Tuning,
    compat: Option<&'a dyn CompatLayer>,
}

impl TickContext<'_> {
    fn damage(&self, id: VehicleId, host_damage: f32) -> f32 {
        let native = sanitize_unit(host_damage, 0.0);
        match self.compat {
            Some(layer) => sanitize_unit(layer.damage_check(id, &|| native), native),
            None => native,
        }
    }
}

/// Guarded call into the compatibility layer. Out-of-range values are
/// clamped and non-finite ones fall back to native.
fn effective_reliability(
    compat: Option<&dyn CompatLayer>,
    id: VehicleId,
    native: EffectiveReliability,
) -> EffectiveReliability {
    match compat {
        Some(layer) => {
            let adjusted = layer.effective_reliability(id, native);
            EffectiveReliability {
                engine: sanitize_unit(adjusted.engine, native.engine),
                hydraulic: sanitize_unit(adjusted.hydraulic, native.hydraulic),
                electrical: sanitize_unit(adjusted.electrical, native.electrical),
            }
        }
        None => native,
    }
}

#[cfg(not(feature = "parallel"))]
fn evaluate_all(vehicles: &mut SlotMap<VehicleId, Vehicle>, ctx: &TickContext) -> Vec<Event> {
    vehicles
        .iter_mut()
        .flat_map(|(id, v)| evaluate_vehicle(id, v, ctx))
        .collect()
}

#[cfg(feature = "parallel")]
fn evaluate_all(vehicles: &mut SlotMap<VehicleId, Vehicle>, ctx: &TickContext) -> Vec<Event> {
    use rayon::prelude::*;

    let slots: Vec<(VehicleId, &mut Vehicle)> = vehicles.iter_mut().collect();
    let per_vehicle: Vec<Vec<Event>> = slots
        .into_par_iter()
        .map(|(id, v)| evaluate_vehicle(id, v, ctx))
        .collect();
    per_vehicle.into_iter().flatten().collect()
}

fn evaluate_vehicle(id: VehicleId, v: &mut Vehicle, ctx: &TickContext) -> Vec<Event> {
    let mut events = Vec::new();
    let mut outputs = VehicleOutputs::default();

    phase_expiry(id, v, ctx, &mut events);
    phase_continuous(id, v, ctx, &mut outputs, &mut events);
    if let Some(window) = ctx.window {
        phase_periodic(id, v, ctx, window, &mut outputs, &mut events);
    }
    phase_compose(id, v, ctx, &mut outputs);

    v.outputs = outputs;
    events
}

// ---------------------------------------------------------------------------
// Phase 1: Expiry
// ---------------------------------------------------------------------------

fn phase_expiry(id: VehicleId, v: &mut Vehicle, ctx: &TickContext, events: &mut Vec<Event>) {
    for kind in v.record.malfunctions.expire_all(ctx.now, ctx.tuning) {
        events.push(Event::MalfunctionEnded {
            vehicle: id,
            kind,
            at: ctx.now,
        });
    }
}

// ---------------------------------------------------------------------------
// Phase 2: Continuous
// ---------------------------------------------------------------------------

fn phase_continuous(
    id: VehicleId,
    v: &mut Vehicle,
    ctx: &TickContext,
    outputs: &mut VehicleOutputs,
    events: &mut Vec<Event>,
) {
    let t = ctx.tuning;
    let now = ctx.now;
    let record = &mut v.record;
    let inputs = &v.inputs;
    let dt_s = ctx.dt as f32 / 1000.0;

    // Fluids.
    if inputs.motor_running {
        record.oil.drain(t.fluid.oil_drain_per_hour, ctx.dt, &t.fluid);
        record
            .hydraulic_fluid
            .drain(t.fluid.hydraulic_drain_per_hour, ctx.dt, &t.fluid);
    }
    for fluid in [FluidKind::Oil, FluidKind::Hydraulic] {
        let state = record.fluid_mut(fluid);
        let level = state.level;
        match state.check_warnings(&t.fluid) {
            Some(FluidWarning::Low) => events.push(Event::FluidLow {
                vehicle: id,
                fluid,
                level,
                at: now,
            }),
            Some(FluidWarning::Critical) => events.push(Event::FluidCritical {
                vehicle: id,
                fluid,
                level,
                at: now,
            }),
            None => {}
        }
    }
    if inputs.motor_running && record.oil.level < t.fluid.critical_level {
        record
            .reliability
            .degrade(Component::Engine, t.fluid.starvation_damage_per_s * dt_s);
    }

    // Tires.
    let bias = record.reliability.wear_bias(&t.reliability);
    record.tires.accrue_distance(inputs.distance_m, bias, &t.tire);

    // Drift.
    if !record.reliability.is_seized(Component::Hydraulic) {
        let native = record.reliability.native();
        let r_h = effective_reliability(ctx.compat, id, native).hydraulic;
        let damage = ctx.damage(id, inputs.damage);
        let severity = record.hydraulic_fluid.severity();
        for joint in &inputs.implements {
            if joint.player_moving || joint.height <= t.drift.midpoint {
                continue;
            }
            let height = hydraulic::drift_height(joint.height, r_h, damage, severity, dt_s, &t.drift);
            if height < joint.height {
                outputs.joint_commands.push(JointCommand {
                    joint: joint.joint,
                    height,
                });
            }
            if height <= t.drift.midpoint && !record.malfunctions.drift.midpoint_notified {
                record.malfunctions.drift.midpoint_notified = true;
                events.push(Event::DriftSettled {
                    vehicle: id,
                    at: now,
                });
            }
        }
    }

    // Runaway stop.
    if record.malfunctions.runaway.check_stop(
        inputs.motor_running,
        inputs.collided,
        now,
        &t.malfunction.runaway,
    ) {
        log::debug!("runaway stopped on {id:?}");
        events.push(Event::MalfunctionEnded {
            vehicle: id,
            kind: MalfunctionKind::Runaway,
            at: now,
        });
    }

    // Pending first-start stall.
    if record
        .malfunctions
        .stall
        .fire_pending(inputs.motor_running, now, &t.malfunction.stall)
    {
        outputs.request_motor_stop = true;
        events.push(Event::MalfunctionStarted {
            vehicle: id,
            kind: MalfunctionKind::Stall,
            at: now,
        });
    }
}

// ---------------------------------------------------------------------------
// Phase 3: Periodic
// ---------------------------------------------------------------------------

fn phase_periodic(
    id: VehicleId,
    v: &mut Vehicle,
    ctx: &TickContext,
    window: Millis,
    outputs: &mut VehicleOutputs,
    events: &mut Vec<Event>,
) {
    let t = ctx.tuning;
    let now = ctx.now;
    let rng = &mut v.rng;
    let record = &mut v.record;
    let inputs = &v.inputs;
    let window_s = window as f32 / 1000.0;
    let hours = window as f32 / MILLIS_PER_HOUR;
    let bias = record.reliability.wear_bias(&t.reliability);
    let oil_severity = record.oil.severity();
    let hydraulic_severity = record.hydraulic_fluid.severity();
    let moving = inputs.speed_kmh.abs() >= t.tire.moving_speed_kmh;
    let started = |kind: MalfunctionKind, events: &mut Vec<Event>| {
        log::debug!("{} started on {id:?}", kind.key());
        events.push(Event::MalfunctionStarted {
            vehicle: id,
            kind,
            at: now,
        });
    };

    // Operating wear.
    if inputs.motor_running {
        let rt = &t.reliability;
        record.reliability.apply_operating_wear(
            Component::Engine,
            rt.engine_wear_per_hour,
            hours,
            oil_severity,
            rt,
        );
        record.reliability.apply_operating_wear(
            Component::Electrical,
            rt.electrical_wear_per_hour,
            hours,
            1.0,
            rt,
        );
        if inputs.implements.iter().any(|j| j.player_moving) {
            record.reliability.apply_operating_wear(
                Component::Hydraulic,
                rt.hydraulic_wear_per_hour,
                hours,
                hydraulic_severity,
                rt,
            );
        }
    }

    let effective = effective_reliability(ctx.compat, id, record.reliability.native());

    // Breakdowns.
    if inputs.motor_running {
        for component in Component::ALL {
            let outcome = record.reliability.roll_breakdown(
                component,
                effective.get(component),
                window_s,
                now,
                rng,
                &t.reliability,
            );
            match outcome {
                Some(BreakdownOutcome::Breakdown) => {
                    events.push(Event::Breakdown {
                        vehicle: id,
                        component,
                        ceiling: record.reliability.ceiling(component),
                        at: now,
                    });
                    if component == Component::Engine
                        && record.malfunctions.stall.phase.can_trigger(now)
                    {
                        record.malfunctions.stall.start(now, &t.malfunction.stall);
                        outputs.request_motor_stop = true;
                        started(MalfunctionKind::Stall, events);
                    }
                }
                Some(BreakdownOutcome::Seized) => {
                    if component == Component::Engine {
                        outputs.request_motor_stop = true;
                    }
                    events.push(Event::Seized {
                        vehicle: id,
                        component,
                        at: now,
                    });
                }
                None => {}
            }
        }
    }

    // Leaks.
    if inputs.motor_running {
        let ft = &t.fluid;
        let engine_p = ft.leak_chance_per_s * window_s * (1.0 - effective.engine) * bias;
        let hydraulic_p = ft.leak_chance_per_s * window_s * (1.0 - effective.hydraulic) * bias;
        if !record.oil.has_leak && rng.chance(engine_p) {
            record.oil.start_leak(rng, ft);
            events.push(leak(id, LeakSource::Oil, now));
        }
        if !record.fuel_leak.has_leak && rng.chance(engine_p) {
            record.fuel_leak.start(rng, ft);
            events.push(leak(id, LeakSource::Fuel, now));
        }
        if !record.hydraulic_fluid.has_leak && rng.chance(hydraulic_p) {
            record.hydraulic_fluid.start_leak(rng, ft);
            events.push(leak(id, LeakSource::Hydraulic, now));
        }
    }

    // Flat tire.
    if moving && record.tires.roll_flat(window_s, bias, rng, &t.tire) {
        started(MalfunctionKind::FlatTire, events);
    }

    // Malfunction triggers.
    let roll = RollContext {
        now,
        window_s,
        bias,
        reliability: effective,
        oil_severity,
        hydraulic_severity,
        oil_level: record.oil.level,
        hydraulic_level: record.hydraulic_fluid.level,
        motor_running: inputs.motor_running,
        moving,
        has_implements: inputs.has_implements(),
        implement_lowered: inputs.implement_lowered(),
    };
    let m = &mut record.malfunctions;
    let mt = &t.malfunction;

    if !record.reliability.is_seized(Component::Engine) {
        if powertrain::roll_stall(&mut m.stall, &roll, rng, &mt.stall) {
            outputs.request_motor_stop = true;
            started(MalfunctionKind::Stall, events);
        }
        if powertrain::roll_misfire(&mut m.misfire, &roll, rng, mt) {
            started(MalfunctionKind::Misfire, events);
        }
        if powertrain::roll_overheat(&mut m.overheat, &roll, rng, mt) {
            started(MalfunctionKind::Overheat, events);
        }
        if powertrain::roll_runaway(&mut m.runaway, &roll, t.fluid.runaway_level, rng, &mt.runaway) {
            started(MalfunctionKind::Runaway, events);
        }
    }

    if !record.reliability.is_seized(Component::Hydraulic) {
        if hydraulic::roll_surge(&mut m.surge, &roll, rng, &mt.surge) {
            started(MalfunctionKind::HydraulicSurge, events);
        }
        let rolls = implement::roll_implements(
            &mut m.stuck_down,
            &mut m.stuck_up,
            &mut m.implement_pull,
            &mut m.implement_drag,
            &mut m.reduced_turning,
            &roll,
            rng,
            mt,
        );
        for (hit, kind) in [
            (rolls.stuck_down, MalfunctionKind::ImplementStuckDown),
            (rolls.stuck_up, MalfunctionKind::ImplementStuckUp),
            (rolls.pull, MalfunctionKind::ImplementPull),
            (rolls.drag, MalfunctionKind::ImplementDrag),
            (rolls.reduced_turning, MalfunctionKind::ReducedTurning),
        ] {
            if hit {
                started(kind, events);
            }
        }
        let slop = steering::slop_factor(effective.hydraulic, &t.steering);
        if steering::roll_pull_surge(&mut m.pull_surge, slop, now, window_s, rng, &t.steering) {
            started(MalfunctionKind::SteeringPullSurge, events);
        }
    }
}

fn leak(vehicle: VehicleId, source: LeakSource, at: Millis) -> Event {
    log::debug!("{source:?} leak started on {vehicle:?}");
    Event::LeakStarted { vehicle, source, at }
}

// ---------------------------------------------------------------------------
// Phase 4: Compose
// ---------------------------------------------------------------------------

fn phase_compose(id: VehicleId, v: &mut Vehicle, ctx: &TickContext, outputs: &mut VehicleOutputs) {
    let t = ctx.tuning;
    let now = ctx.now;
    let record = &v.record;
    let inputs = &v.inputs;
    let m = &record.malfunctions;
    let r_h = effective_reliability(ctx.compat, id, record.reliability.native()).hydraulic;

    let pulls = PullCandidates {
        surge: m.surge.pull(now, &t.malfunction.surge),
        flat_tire: record.tires.flat_pull(inputs.speed_kmh, &t.tire),
        implement: m.implement_pull.pull(now),
        chronic: steering::chronic_pull(
            r_h,
            inputs.speed_kmh,
            record.chronic_pull_direction,
            m.pull_surge.is_active_at(now),
            &t.steering,
        ),
    };
    let wander = v
        .steering
        .advance_wander(r_h, now, ctx.dt, &mut v.rng, &t.steering);
    let wander = steering::wander_contribution(wander, inputs.steering_input, &t.steering);
    let slip = steering::roll_slip(r_h, &mut v.rng, &t.steering);
    let travel_scale = if m.reduced_turning.is_active_at(now) {
        t.malfunction.reduced_turning_scale
    } else {
        1.0
    };
    outputs.steering = steering::compose(&pulls, wander, slip, travel_scale);

    let hydraulics_seized = record.reliability.is_seized(Component::Hydraulic);
    outputs.lift_blocked = hydraulics_seized || m.stuck_down.is_active_at(now);
    outputs.lower_blocked = hydraulics_seized || m.stuck_up.is_active_at(now);
    if m.implement_drag.is_active_at(now) {
        outputs.speed_cap_multiplier = t.malfunction.implement_drag_speed_scale;
    }
    if m.runaway.active {
        outputs.governor_disabled = true;
        outputs.max_speed_multiplier = t.malfunction.runaway.max_speed_multiplier;
        outputs.brake_multiplier = t.malfunction.runaway.brake_multiplier;
    }
    outputs.fuel_usage_multiplier = record.fuel_leak.usage_multiplier();
    outputs.traction_multiplier = record.tires.multipliers().traction;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malfunction::Phase;
    use crate::test_utils::*;

    #[test]
    fn tick_advances_clock_and_counter() {
        let mut engine = test_engine();
        let report = engine.tick(16);
        assert_eq!(engine.now(), 16);
        assert_eq!(engine.sim_state.tick, 1);
        assert!(!report.periodic_ran);
        assert_ne!(engine.state_hash(), 0);
    }

    #[test]
    fn periodic_runs_once_per_interval() {
        let mut engine = test_engine();
        engine.spawn_vehicle();
        let ran: Vec<bool> = (0..125).map(|_| engine.tick(16).periodic_ran).collect();
        // Fires once at 1008 ms; the remaining 992 ms stay accumulated.
        assert_eq!(ran.iter().filter(|&&r| r).count(), 1);
        assert!(engine.tick(5000).periodic_ran);
        assert!(!engine.tick(16).periodic_ran);
    }

    #[test]
    fn paused_engine_does_not_move() {
        let mut engine = test_engine();
        engine.pause();
        assert_eq!(engine.tick(1000), TickReport::default());
        assert_eq!(engine.now(), 0);
        engine.resume();
        engine.tick(1000);
        assert_eq!(engine.now(), 1000);
    }

    #[test]
    fn spawned_records_differ_by_stream() {
        let mut engine = test_engine();
        let a = engine.spawn_vehicle();
        let b = engine.spawn_vehicle();
        assert_ne!(engine.quality_trait(a), engine.quality_trait(b));
    }

    #[test]
    fn expired_malfunction_ends_on_next_tick() {
        let mut engine = test_engine();
        let id = engine.insert_vehicle(VehicleRecord::default());
        engine.vehicles[id].record.malfunctions.misfire = Phase::Active {
            started_at: 0,
            ends_at: 10,
        };
        engine.tick(10);
        assert!(!engine.record(id).unwrap().malfunctions.misfire.is_active());
    }

    #[test]
    fn missing_vehicle_operations_are_noops() {
        let mut engine = test_engine();
        let id = engine.spawn_vehicle();
        engine.remove_vehicle(id);

        assert!(!engine.set_inputs(id, VehicleInputs::default()));
        assert!(!engine.repair(id, Component::Engine, 0.5));
        assert!(!engine.on_vehicle_enter(id));
        assert!(engine.can_motor_run(id, || true));
        assert_eq!(engine.steering_input(id, 0.25), 0.25);
        assert_eq!(engine.record(id), None);
        assert_eq!(engine.active_malfunctions(id), None);
        assert_eq!(engine.replicate(id), None);
    }

    #[test]
    fn observer_mutators_are_noops() {
        let mut engine = Engine::new(Tuning::default(), Role::Observer, 1);
        let id = engine.spawn_vehicle();
        let before = engine.record(id).cloned();
        assert!(!engine.repair(id, Component::Engine, 0.5));
        assert!(!engine.refill_fluid(id, FluidKind::Oil, 0.2));
        assert!(!engine.on_vehicle_enter(id));
        engine.set_inputs(id, running_inputs(30.0));
        engine.tick(5000);
        assert_eq!(engine.record(id).cloned(), before);
        assert_eq!(engine.steering_input(id, 0.4), 0.4);
    }

    #[test]
    fn motor_gate_respects_seizure_and_recovery() {
        let mut engine = test_engine();
        let id = engine.insert_vehicle(VehicleRecord::default());
        assert!(engine.can_motor_run(id, || true));

        engine.vehicles[id]
            .record
            .malfunctions
            .stall
            .start(0, &crate::config::StallTuning::default());
        assert!(!engine.can_motor_run(id, || true));

        engine.tick(5000);
        assert!(engine.can_motor_run(id, || true));

        engine.vehicles[id]
            .record
            .reliability
            .component_mut(Component::Engine)
            .seizure
            .is_seized = true;
        assert!(!engine.can_motor_run(id, || true));
        assert!(engine.repair_seizure(id, Component::Engine));
        assert!(engine.can_motor_run(id, || true));
    }

    #[test]
    fn hydraulic_repair_rearms_drift_notice() {
        let mut engine = test_engine();
        let id = engine.insert_vehicle(VehicleRecord::default());
        engine.vehicles[id].record.malfunctions.drift.midpoint_notified = true;
        engine.repair(id, Component::Hydraulic, 0.1);
        assert!(!engine.record(id).unwrap().malfunctions.drift.midpoint_notified);
    }
}

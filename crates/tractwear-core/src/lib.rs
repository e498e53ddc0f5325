//! Tractwear Core -- vehicle degradation and malfunction simulation.
//!
//! Each vehicle carries a persistent reliability record: per-component
//! reliability with a durability ceiling that only ever shrinks, a quality
//! trait rolled at spawn, fluid levels and leaks, tire wear and a set of
//! malfunction state machines. The engine turns that record into effects the
//! host applies: motor refusals, steering deltas, speed caps, implement
//! locks and joint drift.
//!
//! # Six-Phase Tick Pipeline
//!
//! Each call to [`engine::Engine::tick`] advances the simulation clock by
//! `dt` milliseconds through the following phases:
//!
//! 1. **Expiry** -- End every malfunction whose window has passed.
//! 2. **Continuous** -- Fluid drain, oil starvation, tire distance, implement
//!    drift, runaway stop and pending first-start stalls.
//! 3. **Periodic** -- Once the cadence accumulator reaches its interval:
//!    operating wear, breakdowns, leaks, flats and malfunction trigger rolls.
//! 4. **Compose** -- Steering composition and the remaining host outputs.
//! 5. **Events** -- Deliver buffered events and rate-limited notices.
//! 6. **Bookkeeping** -- Increment tick counter and compute the state hash.
//!
//! # Host Hooks
//!
//! The host keeps its own behaviour and hands it in as a continuation:
//!
//! ```rust,ignore
//! let may_run = engine.can_motor_run(id, || host_default_motor_check());
//! let steer = engine.steering_input(id, player_steering);
//! ```
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Vehicle registry and pipeline orchestrator.
//! - [`record::VehicleRecord`] -- Everything persisted and replicated per vehicle.
//! - [`reliability::Reliability`] -- Reliability, ceilings, trait and seizures.
//! - [`malfunction::Malfunctions`] -- One state machine per malfunction kind.
//! - [`steering::SteeringOutput`] -- Composed steering delta.
//! - [`host::CompatLayer`] -- Optional hooks for cooperating systems.
//! - [`event::EventBus`] -- Typed events with buffered delivery.
//! - [`persist::PersistedRecord`] -- Flat, lenient save format.
//! - [`replication`] -- Fixed-order full-state sync to observers.
//! - [`serialize`] -- Versioned engine snapshots via bitcode.

pub mod config;
pub mod engine;
pub mod event;
pub mod fluid;
pub mod host;
pub mod id;
pub mod malfunction;
pub mod motor;
pub mod persist;
pub mod record;
pub mod reliability;
pub mod replication;
pub mod rng;
pub mod serialize;
pub mod sim;
pub mod steering;
pub mod tire;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

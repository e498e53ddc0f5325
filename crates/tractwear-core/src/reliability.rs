//! Per-vehicle reliability model.
//!
//! Each [`Component`] carries a reliability in `[0, 1]` bounded above by a
//! durability ceiling. Repairs and breakdowns erode the ceiling according to
//! the vehicle's immutable quality trait, which produces two opposite
//! feedback loops:
//!
//! - low-trait vehicles ("lemons") lose ceiling on every repair and a large
//!   slice on every breakdown, spiralling toward permanent unreliability;
//! - elite vehicles (trait ≥ `elite_trait`) lose nothing on repair and only
//!   a fraction of the breakdown loss, approaching effective immortality.
//!
//! The only way to raise a ceiling is [`Reliability::restore_ceiling`], used
//! by the external restoration collaborator.

use crate::config::ReliabilityTuning;
use crate::id::Component;
use crate::rng::RandomSource;
use crate::sim::Millis;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trait tiers
// ---------------------------------------------------------------------------

/// Coarse classification of the quality trait, for UI and API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraitTier {
    Lemon,
    Average,
    Workhorse,
    Legendary,
}

impl TraitTier {
    pub fn classify(quality_trait: f32, elite_trait: f32) -> Self {
        if quality_trait >= elite_trait {
            TraitTier::Legendary
        } else if quality_trait >= 0.70 {
            TraitTier::Workhorse
        } else if quality_trait >= 0.30 {
            TraitTier::Average
        } else {
            TraitTier::Lemon
        }
    }
}

// ---------------------------------------------------------------------------
// Component state
// ---------------------------------------------------------------------------

/// Terminal failure bookkeeping for one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeizureState {
    pub is_seized: bool,
    /// Clock time of the seizure; meaningful only while `is_seized`.
    pub seized_at: Millis,
    /// Breakdowns suffered while reliability was already at zero.
    pub zero_strikes: u8,
}

/// Reliability, ceiling and seizure state of one component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub(crate) reliability: f32,
    pub(crate) ceiling: f32,
    pub seizure: SeizureState,
}

impl Default for ComponentState {
    fn default() -> Self {
        Self {
            reliability: 1.0,
            ceiling: 1.0,
            seizure: SeizureState::default(),
        }
    }
}

impl ComponentState {
    pub fn reliability(&self) -> f32 {
        self.reliability
    }

    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    fn clamp_to_ceiling(&mut self) {
        self.reliability = self.reliability.clamp(0.0, self.ceiling);
    }
}

/// Outcome of a breakdown roll that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakdownOutcome {
    /// Ordinary breakdown: ceiling loss plus reliability damage.
    Breakdown,
    /// The breakdown pushed the component into its terminal seized state.
    Seized,
}

// ---------------------------------------------------------------------------
// Effective reliability
// ---------------------------------------------------------------------------

/// Reliability values used for probability rolls, after the optional
/// compatibility layer has had its say.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveReliability {
    pub engine: f32,
    pub hydraulic: f32,
    pub electrical: f32,
}

impl EffectiveReliability {
    pub fn get(&self, component: Component) -> f32 {
        match component {
            Component::Engine => self.engine,
            Component::Hydraulic => self.hydraulic,
            Component::Electrical => self.electrical,
        }
    }
}

// ---------------------------------------------------------------------------
// Reliability model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reliability {
    pub(crate) engine: ComponentState,
    pub(crate) hydraulic: ComponentState,
    pub(crate) electrical: ComponentState,
    pub(crate) quality_trait: f32,
    pub(crate) repair_count: u32,
    pub(crate) breakdown_count: u32,
}

impl Default for Reliability {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Reliability {
    /// A factory-fresh model with the given trait.
    pub fn new(quality_trait: f32) -> Self {
        Self {
            engine: ComponentState::default(),
            hydraulic: ComponentState::default(),
            electrical: ComponentState::default(),
            quality_trait: sanitize_unit(quality_trait, 0.5),
            repair_count: 0,
            breakdown_count: 0,
        }
    }

    /// Roll the quality trait for a newly spawned vehicle.
    ///
    /// The mean of two uniform draws keeps extremes rare.
    pub fn roll(rng: &mut impl RandomSource) -> Self {
        let quality_trait = (rng.next_unit() + rng.next_unit()) * 0.5;
        Self::new(quality_trait)
    }

    pub fn quality_trait(&self) -> f32 {
        self.quality_trait
    }

    pub fn tier(&self, t: &ReliabilityTuning) -> TraitTier {
        TraitTier::classify(self.quality_trait, t.elite_trait)
    }

    pub fn is_elite(&self, t: &ReliabilityTuning) -> bool {
        self.quality_trait >= t.elite_trait
    }

    pub fn repair_count(&self) -> u32 {
        self.repair_count
    }

    pub fn breakdown_count(&self) -> u32 {
        self.breakdown_count
    }

    pub fn component(&self, component: Component) -> &ComponentState {
        match component {
            Component::Engine => &self.engine,
            Component::Hydraulic => &self.hydraulic,
            Component::Electrical => &self.electrical,
        }
    }

    pub(crate) fn component_mut(&mut self, component: Component) -> &mut ComponentState {
        match component {
            Component::Engine => &mut self.engine,
            Component::Hydraulic => &mut self.hydraulic,
            Component::Electrical => &mut self.electrical,
        }
    }

    pub fn reliability(&self, component: Component) -> f32 {
        self.component(component).reliability
    }

    pub fn ceiling(&self, component: Component) -> f32 {
        self.component(component).ceiling
    }

    pub fn is_seized(&self, component: Component) -> bool {
        self.component(component).seizure.is_seized
    }

    /// Native (pre-compatibility) reliability of all components.
    pub fn native(&self) -> EffectiveReliability {
        EffectiveReliability {
            engine: self.engine.reliability,
            hydraulic: self.hydraulic.reliability,
            electrical: self.electrical.reliability,
        }
    }

    /// Multiplier handed to durability-consuming collaborators, in
    /// `[lifetime_min, lifetime_max]`.
    pub fn lifetime_multiplier(&self, t: &ReliabilityTuning) -> f32 {
        t.lifetime_min + (t.lifetime_max - t.lifetime_min) * self.quality_trait
    }

    /// Rate multiplier for wear and failure chances: lemons wear faster.
    pub fn wear_bias(&self, t: &ReliabilityTuning) -> f32 {
        t.wear_bias_lemon + (t.wear_bias_workhorse - t.wear_bias_lemon) * self.quality_trait
    }

    // -- Mutations --

    /// Reduce reliability, clamped to `[0, ceiling]`.
    pub fn degrade(&mut self, component: Component, amount: f32) {
        if amount.is_nan() || amount <= 0.0 {
            return;
        }
        let state = self.component_mut(component);
        state.reliability -= amount;
        state.clamp_to_ceiling();
    }

    /// Increase reliability, clamped to `[0, ceiling]`.
    ///
    /// Non-elite vehicles permanently lose a trait-scaled slice of the
    /// ceiling on every repair.
    pub fn repair(&mut self, component: Component, amount: f32, t: &ReliabilityTuning) {
        if amount.is_nan() || amount <= 0.0 {
            return;
        }
        let loss = if self.is_elite(t) {
            0.0
        } else {
            t.repair_ceiling_loss_max * (1.0 - self.quality_trait)
        };
        self.repair_count = self.repair_count.saturating_add(1);
        let state = self.component_mut(component);
        state.reliability += amount;
        state.clamp_to_ceiling();
        state.ceiling = (state.ceiling * (1.0 - loss)).clamp(0.0, 1.0);
        state.clamp_to_ceiling();
    }

    /// Apply the ceiling loss of a breakdown.
    pub fn on_breakdown(&mut self, component: Component, t: &ReliabilityTuning) {
        let mut loss = t.breakdown_ceiling_loss_min
            + (t.breakdown_ceiling_loss_max - t.breakdown_ceiling_loss_min)
                * (1.0 - self.quality_trait);
        if self.is_elite(t) {
            loss *= t.elite_breakdown_scale;
        }
        self.breakdown_count = self.breakdown_count.saturating_add(1);
        let state = self.component_mut(component);
        state.ceiling = (state.ceiling * (1.0 - loss)).clamp(0.0, 1.0);
        state.clamp_to_ceiling();
    }

    /// Overwrite reliability (field-repair tools). Clamped to `[0, ceiling]`.
    pub fn set_reliability(&mut self, component: Component, value: f32) {
        let state = self.component_mut(component);
        state.reliability = sanitize_unit(value, state.reliability);
        state.clamp_to_ceiling();
    }

    /// Raise or set the ceiling (long-duration restoration). Clamped to
    /// `[0, 1]`; reliability is re-clamped if the ceiling dropped.
    pub fn restore_ceiling(&mut self, component: Component, ceiling: f32) {
        let state = self.component_mut(component);
        state.ceiling = sanitize_unit(ceiling, state.ceiling);
        state.clamp_to_ceiling();
    }

    /// Clear a seizure. The component keeps whatever reliability it had.
    pub fn repair_seizure(&mut self, component: Component) {
        let state = self.component_mut(component);
        if state.seizure.is_seized {
            log::info!("{} seizure repaired", component.key());
        }
        state.seizure = SeizureState::default();
    }

    /// Degrade by an operating-hours wear amount, scaled by trait and a
    /// fluid severity multiplier.
    pub fn apply_operating_wear(
        &mut self,
        component: Component,
        per_hour: f32,
        hours: f32,
        severity: f32,
        t: &ReliabilityTuning,
    ) {
        let amount = per_hour * hours * self.wear_bias(t) * severity;
        self.degrade(component, amount);
    }

    /// Periodic breakdown roll for one component.
    ///
    /// `effective` is the reliability used for the probability (it may have
    /// been adjusted by a compatibility layer); damage always lands on the
    /// native value. A breakdown suffered while native reliability is
    /// already zero counts as a strike; enough strikes seize the component.
    pub fn roll_breakdown(
        &mut self,
        component: Component,
        effective: f32,
        window_s: f32,
        now: Millis,
        rng: &mut impl RandomSource,
        t: &ReliabilityTuning,
    ) -> Option<BreakdownOutcome> {
        if self.is_seized(component) {
            return None;
        }
        let unreliability = (1.0 - effective).clamp(0.0, 1.0);
        let p = t.breakdown_chance_per_s * window_s * unreliability * unreliability
            * self.wear_bias(t);
        if !rng.chance(p) {
            return None;
        }
        Some(self.apply_breakdown(component, now, t))
    }

    /// Apply a breakdown that has already been decided.
    pub fn apply_breakdown(
        &mut self,
        component: Component,
        now: Millis,
        t: &ReliabilityTuning,
    ) -> BreakdownOutcome {
        let was_zero = self.reliability(component) <= 0.0;
        self.on_breakdown(component, t);
        self.degrade(component, t.breakdown_damage);
        log::info!(
            "{} breakdown (ceiling now {:.3})",
            component.key(),
            self.ceiling(component)
        );
        if !was_zero {
            return BreakdownOutcome::Breakdown;
        }
        let state = self.component_mut(component);
        state.seizure.zero_strikes = state.seizure.zero_strikes.saturating_add(1);
        if state.seizure.zero_strikes >= t.seizure_strikes.max(1) {
            state.seizure.is_seized = true;
            state.seizure.seized_at = now;
            log::info!("{} seized at {now} ms", component.key());
            BreakdownOutcome::Seized
        } else {
            BreakdownOutcome::Breakdown
        }
    }
}

/// Clamp to `[0, 1]`, replacing non-finite values with `fallback`.
pub(crate) fn sanitize_unit(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback.clamp(0.0, 1.0)
    }
}

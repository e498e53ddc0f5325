//! Property-based tests for the Tractwear core.
//!
//! Uses proptest to generate random records, mutation sequences and host
//! inputs, then verify the structural invariants hold.

use tractwear_core::config::{ReliabilityTuning, Tuning};
use tractwear_core::engine::Engine;
use tractwear_core::fluid::{FluidState, severity_multiplier};
use tractwear_core::host::VehicleInputs;
use tractwear_core::id::Component;
use tractwear_core::malfunction::Phase;
use tractwear_core::motor::{self, MotorGateInput};
use tractwear_core::persist::PersistedRecord;
use tractwear_core::record::VehicleRecord;
use tractwear_core::reliability::Reliability;
use tractwear_core::replication::{decode_record, encode_record};
use tractwear_core::sim::{Millis, Role};
use tractwear_core::steering::{PullCandidates, SteeringOutput, compose};
use tractwear_core::test_utils::*;
use tractwear_core::tire::{TireQuality, TireState};
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_component() -> impl Strategy<Value = Component> {
    prop_oneof![
        Just(Component::Engine),
        Just(Component::Hydraulic),
        Just(Component::Electrical),
    ]
}

/// A phase that reloads unchanged at clock 0.
fn arb_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::Idle),
        (1..100_000u64).prop_map(|ends_at| Phase::Active {
            started_at: 0,
            ends_at,
        }),
        (1..100_000u64).prop_map(|ends_at| Phase::Cooldown { ends_at }),
    ]
}

fn arb_side() -> impl Strategy<Value = i8> {
    prop_oneof![Just(-1i8), Just(1i8)]
}

fn arb_fluid() -> impl Strategy<Value = FluidState> {
    (0.0f32..=1.0, any::<bool>(), 0.0f32..3.0, any::<bool>(), any::<bool>()).prop_map(
        |(level, has_leak, severity, low, critical)| FluidState {
            level,
            has_leak,
            leak_severity: if has_leak { severity } else { 0.0 },
            low_warning_shown: low,
            critical_warning_shown: critical,
        },
    )
}

fn arb_tires() -> impl Strategy<Value = TireState> {
    (
        prop_oneof![
            Just(TireQuality::Retread),
            Just(TireQuality::Normal),
            Just(TireQuality::Quality),
        ],
        0.0f32..=1.0,
        proptest::option::of(arb_side()),
        0.0f32..1.0e6,
    )
        .prop_map(|(quality, condition, flat, distance_m)| {
            let mut tires = TireState::new(quality);
            tires.condition = condition;
            tires.has_flat = flat.is_some();
            tires.flat_side = flat.unwrap_or(0);
            tires.distance_m = distance_m;
            tires
        })
}

fn arb_reliability() -> impl Strategy<Value = Reliability> {
    (
        0.0f32..=1.0,
        proptest::collection::vec((0.0f32..=1.0, 0.0f32..=1.0, any::<bool>()), 3),
    )
        .prop_map(|(quality_trait, components)| {
            let t = ReliabilityTuning::default();
            let mut r = Reliability::new(quality_trait);
            for (c, (ceiling, value, seized)) in Component::ALL.into_iter().zip(components) {
                r.restore_ceiling(c, ceiling);
                r.set_reliability(c, value);
                if seized {
                    r.set_reliability(c, 0.0);
                    for _ in 0..t.seizure_strikes {
                        r.apply_breakdown(c, 0, &t);
                    }
                }
            }
            r
        })
}

prop_compose! {
    fn arb_record()(
        reliability in arb_reliability(),
        oil in arb_fluid(),
        hydraulic_fluid in arb_fluid(),
        fuel_leak in proptest::option::of(1.0f32..3.0),
        tires in arb_tires(),
        chronic_pull_direction in arb_side(),
        phases in proptest::collection::vec(arb_phase(), 10),
        surge in (arb_side(), 0.0f32..=1.0),
        pull in (arb_side(), 0.0f32..=1.0),
        flags in (any::<bool>(), any::<bool>(), any::<bool>()),
    ) -> VehicleRecord {
        let mut record = VehicleRecord {
            reliability,
            oil,
            hydraulic_fluid,
            tires,
            chronic_pull_direction,
            ..VehicleRecord::default()
        };
        if let Some(multiplier) = fuel_leak {
            record.fuel_leak.has_leak = true;
            record.fuel_leak.rate_multiplier = multiplier;
        }
        let m = &mut record.malfunctions;
        m.stall.phase = phases[0];
        m.misfire = phases[1];
        m.overheat = phases[2];
        m.surge.phase = phases[3];
        m.stuck_down = phases[4];
        m.stuck_up = phases[5];
        m.implement_pull.phase = phases[6];
        m.implement_drag = phases[7];
        m.reduced_turning = phases[8];
        m.pull_surge = phases[9];
        (m.surge.direction, m.surge.strength) = surge;
        (m.implement_pull.direction, m.implement_pull.strength) = pull;
        (m.stall.first_start_pending, m.drift.midpoint_notified, m.runaway.active) = flags;
        record
    }
}

#[derive(Debug, Clone)]
enum ReliabilityOp {
    Degrade(Component, f32),
    Repair(Component, f32),
    Breakdown(Component),
    Set(Component, f32),
}

fn arb_op() -> impl Strategy<Value = ReliabilityOp> {
    prop_oneof![
        (arb_component(), -0.5f32..1.5).prop_map(|(c, a)| ReliabilityOp::Degrade(c, a)),
        (arb_component(), -0.5f32..1.5).prop_map(|(c, a)| ReliabilityOp::Repair(c, a)),
        arb_component().prop_map(ReliabilityOp::Breakdown),
        (arb_component(), -2.0f32..2.0).prop_map(|(c, v)| ReliabilityOp::Set(c, v)),
    ]
}

/// Finite or not, anything a misbehaving host might hand over.
fn arb_any_f32() -> impl Strategy<Value = f32> {
    prop_oneof![
        -10.0f32..10.0,
        Just(f32::NAN),
        Just(f32::INFINITY),
        Just(f32::NEG_INFINITY),
    ]
}

// ===========================================================================
// Reliability invariants
// ===========================================================================

proptest! {
    #[test]
    fn reliability_stays_within_ceiling(
        quality_trait in 0.0f32..=1.0,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let t = ReliabilityTuning::default();
        let mut r = Reliability::new(quality_trait);
        let mut last_ceiling = Component::ALL.map(|c| r.ceiling(c));

        for op in ops {
            match op {
                ReliabilityOp::Degrade(c, a) => r.degrade(c, a),
                ReliabilityOp::Repair(c, a) => r.repair(c, a, &t),
                ReliabilityOp::Breakdown(c) => {
                    r.apply_breakdown(c, 0, &t);
                }
                ReliabilityOp::Set(c, v) => r.set_reliability(c, v),
            }
            for (i, c) in Component::ALL.into_iter().enumerate() {
                let ceiling = r.ceiling(c);
                let value = r.reliability(c);
                prop_assert!((0.0..=1.0).contains(&ceiling));
                prop_assert!(value >= 0.0 && value <= ceiling, "{c:?}: {value} > {ceiling}");
                // Nothing but a ceiling restore may raise it.
                prop_assert!(ceiling <= last_ceiling[i]);
                last_ceiling[i] = ceiling;
            }
        }
    }

    #[test]
    fn non_elite_breakdowns_strictly_shrink_ceiling(
        quality_trait in 0.0f32..0.89,
        breakdowns in 1usize..40,
    ) {
        let t = ReliabilityTuning::default();
        let mut r = Reliability::new(quality_trait);
        for _ in 0..breakdowns {
            let before = r.ceiling(Component::Engine);
            r.apply_breakdown(Component::Engine, 0, &t);
            prop_assert!(r.ceiling(Component::Engine) < before);
        }
        prop_assert_eq!(r.breakdown_count() as usize, breakdowns);
    }

    #[test]
    fn elite_repairs_keep_ceiling(
        quality_trait in 0.9f32..=1.0,
        amounts in proptest::collection::vec(0.01f32..0.5, 1..20),
    ) {
        let t = ReliabilityTuning::default();
        let mut r = Reliability::new(quality_trait);
        r.set_reliability(Component::Hydraulic, 0.0);
        for amount in amounts {
            r.repair(Component::Hydraulic, amount, &t);
        }
        prop_assert_eq!(r.ceiling(Component::Hydraulic), 1.0);
    }

    #[test]
    fn lower_trait_never_loses_less_on_breakdown(a in 0.0f32..0.89, b in 0.0f32..0.89) {
        let t = ReliabilityTuning::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut lemon = Reliability::new(lo);
        let mut better = Reliability::new(hi);
        lemon.apply_breakdown(Component::Electrical, 0, &t);
        better.apply_breakdown(Component::Electrical, 0, &t);
        prop_assert!(lemon.ceiling(Component::Electrical) <= better.ceiling(Component::Electrical));
    }
}

// ===========================================================================
// Fluids, motor gate and steering
// ===========================================================================

proptest! {
    #[test]
    fn severity_is_monotone(a in arb_any_f32(), b in arb_any_f32()) {
        let sa = severity_multiplier(a);
        let sb = severity_multiplier(b);
        prop_assert!((1.0..=3.0).contains(&sa));
        if a.is_finite() && b.is_finite() && a <= b {
            prop_assert!(sa >= sb);
        }
    }

    #[test]
    fn seized_engine_never_runs(
        stall in any::<bool>(),
        overheat in any::<bool>(),
        misfire in any::<bool>(),
        runaway in any::<bool>(),
        engine_reliability in arb_any_f32(),
        speed_kmh in arb_any_f32(),
        frame in any::<u64>(),
        veto in any::<bool>(),
    ) {
        let input = MotorGateInput {
            engine_seized: true,
            in_stall_recovery: stall,
            overheating: overheat,
            misfiring: misfire,
            runaway,
            engine_reliability,
            speed_kmh,
            max_speed_kmh: 40.0,
            frame,
        };
        let t = Tuning::default();
        prop_assert!(!motor::evaluate(&input, &t.governor, || veto, || true));
    }

    #[test]
    fn composed_steering_stays_in_range(
        pulls in proptest::collection::vec(proptest::option::of(arb_any_f32()), 4),
        wander in arb_any_f32(),
        slip in arb_any_f32(),
        travel_scale in arb_any_f32(),
        host in arb_any_f32(),
    ) {
        let candidates = PullCandidates {
            surge: pulls[0],
            flat_tire: pulls[1],
            implement: pulls[2],
            chronic: pulls[3],
        };
        let out: SteeringOutput = compose(&candidates, wander, slip, travel_scale);
        prop_assert!((-1.0..=1.0).contains(&out.delta));
        let applied = out.apply_input(host);
        prop_assert!((-1.0..=1.0).contains(&applied), "applied {applied}");
    }
}

// ===========================================================================
// Engine invariants
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn expired_windows_never_survive_a_tick(
        record in arb_record(),
        dts in proptest::collection::vec(1..5_000u64, 1..30),
        speed in 0.0f32..40.0,
    ) {
        let mut engine = test_engine();
        let id = engine.insert_vehicle(record);
        engine.set_inputs(id, running_inputs(speed));
        for dt in dts {
            engine.tick(dt);
            let now = engine.now();
            let m = &engine.record(id).unwrap().malfunctions;
            for phase in [
                m.stall.phase,
                m.misfire,
                m.overheat,
                m.surge.phase,
                m.stuck_down,
                m.stuck_up,
                m.implement_pull.phase,
                m.implement_drag,
                m.reduced_turning,
                m.pull_surge,
            ] {
                if let Phase::Active { ends_at, .. } = phase {
                    prop_assert!(ends_at > now, "active window ended at {ends_at}, now {now}");
                }
            }
            let outputs = engine.outputs(id).unwrap();
            prop_assert!((-1.0..=1.0).contains(&outputs.steering.delta));
        }
    }

    #[test]
    fn ticking_keeps_record_bounds(
        record in arb_record(),
        dts in proptest::collection::vec(1..10_000u64, 1..20),
        damage in arb_any_f32(),
    ) {
        let mut engine = test_engine();
        let id = engine.insert_vehicle(record);
        engine.set_inputs(id, VehicleInputs { damage, ..running_inputs(12.0) });
        for dt in dts {
            engine.tick(dt);
        }
        let record = engine.record(id).unwrap();
        for c in Component::ALL {
            let ceiling = record.reliability.ceiling(c);
            prop_assert!(record.reliability.reliability(c) <= ceiling);
            prop_assert!((0.0..=1.0).contains(&ceiling));
        }
        prop_assert!((0.0..=1.0).contains(&record.oil.level));
        prop_assert!((0.0..=1.0).contains(&record.hydraulic_fluid.level));
        prop_assert!((0.0..=1.0).contains(&record.tires.condition));
    }

    #[test]
    fn observer_clock_moves_but_record_does_not(
        record in arb_record(),
        dts in proptest::collection::vec(1..10_000u64, 1..20),
    ) {
        let mut engine = Engine::new(Tuning::default(), Role::Observer, TEST_SEED);
        let id = engine.insert_vehicle(record.clone());
        engine.set_inputs(id, running_inputs(25.0));
        let total: Millis = dts.iter().sum();
        for dt in dts {
            engine.tick(dt);
        }
        prop_assert_eq!(engine.now(), total);
        prop_assert_eq!(engine.record(id).unwrap(), &record);
    }
}

// ===========================================================================
// Wire and save formats
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replication_reproduces_record(record in arb_record()) {
        let decoded = decode_record(&encode_record(&record)).unwrap();
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn persisted_record_reloads_at_same_clock(record in arb_record()) {
        let json = PersistedRecord::capture(&record).to_json().unwrap();
        let restored = PersistedRecord::from_json(&json)
            .unwrap()
            .restore(0, &Tuning::default());
        prop_assert_eq!(restored, record);
    }

    #[test]
    fn truncated_payloads_are_rejected(record in arb_record(), cut in 0usize..200) {
        let payload = encode_record(&record);
        let cut = cut.min(payload.len().saturating_sub(1));
        prop_assert!(decode_record(&payload[..cut]).is_err());
    }
}

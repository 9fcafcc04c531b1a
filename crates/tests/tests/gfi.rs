//! Generative function interface properties across program kinds.

use stoch_foundation::Value;
use stoch_ir::Atom;
use stoch_runtime::{bernoulli, beta, gen, ChoiceMap, Error, Program, ProbabilisticStager};
use stoch_tests::{and_model, assert_close, chain_model, gaussian_model, TestHarness};

fn programs() -> Vec<(Program, Vec<Value>)> {
    vec![
        (gaussian_model(), vec![Value::f64(0.5)]),
        (chain_model(), vec![]),
        (gaussian_model().repeat(4), vec![Value::f64(-1.0)]),
        (
            gaussian_model().vmap(vec![Some(0)], None),
            vec![Value::from_f64s(&[0.0, 1.0, 2.0])],
        ),
    ]
}

/// Simulated scores are the negated assessed densities.
#[test]
fn test_density_consistency() {
    let mut h = TestHarness::seeded(1);
    for (program, args) in programs() {
        for _ in 0..5 {
            let trace = h.simulate(&program, &args);
            let (w, retval) = program.assess(h.ctx(), &args, &trace.choices()).unwrap();
            assert_close(trace.score(), -w, 1e-9);
            assert_eq!(retval, trace.retval_values(), "{}", program.name());
        }
    }
}

/// `update` weighs the new choices against the old trace.
#[test]
fn test_update_matches_assess() {
    let mut h = TestHarness::seeded(2);
    let program = gaussian_model();
    let args = [Value::f64(0.0)];
    for x in [-1.0, 0.25, 3.0] {
        let trace = h.simulate(&program, &args);
        let new = ChoiceMap::from_values([("x", Value::f64(x))]);
        let up = trace.update(h.ctx(), &args, &new).unwrap();
        let expected = h.assess(&program, &args, &up.trace.choices()) + trace.score();
        assert_close(up.weight(), expected, 1e-9);
        assert_eq!(up.discarded.value("x"), trace.value("x").as_ref());
        assert_eq!(up.trace.value("y"), trace.value("y"));
    }
}

/// Moving every choice makes the weight a plain density ratio.
#[test]
fn test_full_update_is_density_ratio() {
    let mut h = TestHarness::seeded(3);
    let program = chain_model();
    let trace = h.simulate(&program, &[]);
    let new = ChoiceMap::from_values([
        ("a", Value::bool(true)),
        ("b", Value::bool(false)),
        ("c", Value::bool(true)),
    ]);
    let up = program.update(h.ctx(), &trace, &[], &new).unwrap();
    let old_density = -trace.score();
    let new_density = h.assess(&program, &[], &new);
    assert_close(up.weight(), new_density - old_density, 1e-12);
    assert_close(up.trace.score(), -new_density, 1e-12);
}

/// `generate` weights are the density of the constrained choices given the rest.
#[test]
fn test_generate_weight_with_observation() {
    let mut h = TestHarness::seeded(4);
    let program = and_model();
    let constraint = ChoiceMap::from_values([("x", Value::bool(true)), ("y", Value::bool(true))]);
    let (trace, w) = program.generate(h.ctx(), &[], &constraint).unwrap();
    assert_close(w, (0.5f64 * 0.3).ln(), 1e-12);
    assert_close(trace.score(), -w, 1e-12);

    let impossible = ChoiceMap::from_values([("x", Value::bool(true)), ("y", Value::bool(false))]);
    let (_, w) = program.generate(h.ctx(), &[], &impossible).unwrap();
    assert_eq!(w, f64::NEG_INFINITY);
}

#[test]
fn test_assess_requires_every_address() {
    let mut h = TestHarness::unseeded();
    let partial = ChoiceMap::from_values([("a", Value::bool(true)), ("b", Value::bool(true))]);
    let err = chain_model().assess(h.ctx(), &[], &partial).unwrap_err();
    assert!(matches!(err, Error::AddressNotFound { ref address } if address == "c"));
    assert_eq!(h.ctx().handler_depth(), 0);
}

#[test]
fn test_nested_program_addresses() {
    let inner = chain_model();
    let outer = stoch_runtime::gen("outer", move |s, _| {
        use stoch_runtime::ProbabilisticStager;
        let first = s.trace("first", &inner, &[])?;
        let second = s.trace("second", &inner, &[])?;
        Ok(vec![first[0].clone(), second[0].clone()])
    });
    let mut h = TestHarness::seeded(5);
    let trace = h.simulate(&outer, &[]);
    let choices = trace.choices();
    assert_eq!(choices.leaves().len(), 6);
    assert!(choices.get("first").and_then(|t| t.get("b")).is_some());
    let w = h.assess(&outer, &[], &choices);
    assert_close(trace.score(), -w, 1e-12);
}

/// A beta-distributed rate feeding a coin scores as the product of both densities.
#[test]
fn test_beta_rate_model() {
    let program = gen("rate", |s, _| {
        let p = s.choose("p", &beta(), &[Atom::from(2.0), Atom::from(3.0)])?;
        let x = s.choose("x", &bernoulli(), &[p.clone()])?;
        Ok(vec![p, x])
    });
    let mut h = TestHarness::seeded(6);
    for _ in 0..5 {
        let trace = h.simulate(&program, &[]);
        let p = trace.value("p").and_then(|v| v.as_f64()).unwrap();
        assert!((0.0..=1.0).contains(&p));
        let w = h.assess(&program, &[], &trace.choices());
        assert_close(trace.score(), -w, 1e-9);
    }

    let choices = ChoiceMap::from_values([("p", Value::f64(0.5)), ("x", Value::bool(true))]);
    assert_close(h.assess(&program, &[], &choices), (1.5f64 * 0.5).ln(), 1e-9);
}

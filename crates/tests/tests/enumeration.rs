//! Exact enumeration, tagged elimination and the reflective rewrites feeding them.

use stoch_foundation::Value;
use stoch_ir::Atom;
use stoch_runtime::distributions::{attach_discretization, normal_grid_around_mean};
use stoch_runtime::{bernoulli, categorical, gen, normal, sel, ChoiceMap, Error, ProbabilisticStager};
use stoch_tests::{and_model, assert_close, chain_model, coin_addresses, coins_model, TestHarness};

#[test]
fn test_two_coin_conjunction() {
    let mut h = TestHarness::unseeded();
    let measure = and_model().project(ChoiceMap::empty()).unwrap();
    let e = h.enumerate(&measure, &[]);
    assert_eq!(e.len(), 4);

    // Rows are (F,F), (F,T), (T,F), (T,T).
    assert_eq!(e.choices_at(0).unwrap().value("x"), Some(&Value::bool(false)));
    assert_eq!(e.choices_at(3).unwrap().value("y"), Some(&Value::bool(true)));
    assert_eq!(&e.scores[..3], &[f64::NEG_INFINITY; 3]);
    assert_close(e.scores[3], (0.5f64 * 0.3).ln(), 1e-12);
    assert_close(e.log_normalizer(), 0.15f64.ln(), 1e-12);
    assert_eq!(e.retval_at(3).unwrap(), vec![Value::bool(true), Value::bool(true)]);
}

/// `k` binary choices give `2^k` rows whose total mass matches brute force.
#[test]
fn test_enumeration_is_complete() {
    let mut h = TestHarness::unseeded();
    for k in 1..=6 {
        let program = coins_model(k);
        let e = program.enumerate(h.ctx(), &[]).unwrap();
        assert_eq!(e.len(), 1 << k);
        let exact = h.brute_force_log_marginal(&program, &[], &coin_addresses(k));
        assert_close(e.log_normalizer(), exact, 1e-9);

        let mut rows: Vec<Vec<bool>> = (0..e.len())
            .map(|i| {
                let c = e.choices_at(i).unwrap();
                coin_addresses(k)
                    .iter()
                    .map(|a| c.value(a).and_then(Value::as_bool).unwrap())
                    .collect()
            })
            .collect();
        rows.dedup();
        assert_eq!(rows.len(), 1 << k);
    }
}

/// Tagged elimination returns the same table as enumeration.
#[test]
fn test_elimination_agrees_with_enumeration() {
    let mut h = TestHarness::unseeded();
    let program = gen("mixture", |s, _| {
        let probs = s.constant(Value::from_f64s(&[0.2, 0.5, 0.3]));
        let k = s.choose("k", &categorical(), &[probs])?;
        let means = s.constant(Value::from_f64s(&[-1.0, 0.0, 2.0]));
        let mean = s.index(&means, &k)?;
        let flip = s.choose("flip", &bernoulli(), &[Atom::from(0.4)])?;
        let shift = s.select(&flip, 0.5, 0.0)?;
        let loc = s.add(&mean, &shift)?;
        s.observe(&normal(), Value::f64(0.3), &[loc.clone(), Atom::from(1.0)])?;
        Ok(vec![loc])
    });
    for constraint in [ChoiceMap::empty(), ChoiceMap::from_values([("flip", Value::bool(true))])] {
        let measure = program.project(constraint).unwrap();
        let a = h.enumerate(&measure, &[]);
        let b = h.eliminate(&measure, &[]);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.scores.iter().zip(&b.scores) {
            assert_close(*x, *y, 1e-12);
        }
        assert_eq!(a.choices, b.choices);
        assert!(a.retval[0].all_close(&b.retval[0], 1e-12));
    }
}

#[test]
fn test_constraints_shrink_the_table() {
    let mut h = TestHarness::unseeded();
    let measure = chain_model()
        .project(ChoiceMap::from_values([("b", Value::bool(true))]))
        .unwrap();
    let e = h.enumerate(&measure, &[]);
    // a and c stay free.
    assert_eq!(e.len(), 4);
    assert!(e.choices.get("b").is_none());
    // p(b = true) = 0.5 * 0.9 + 0.5 * 0.1
    assert_close(e.log_normalizer(), 0.5f64.ln(), 1e-12);
}

/// A continuous latent, discretised onto a grid, has its posterior mode at
/// the grid point nearest the analytic posterior mean.
#[test]
fn test_discretized_posterior_mode() {
    let gridded = attach_discretization(normal(), normal_grid_around_mean(3.0, 7));
    let program = gen("regression", move |s, _| {
        let x = s.choose("x", &gridded, &[Atom::from(0.0), Atom::from(1.0)])?;
        let y = s.choose("y", &normal(), &[x.clone(), Atom::from(0.5)])?;
        Ok(vec![y])
    });

    let mut h = TestHarness::unseeded();
    let continuous = program.project(ChoiceMap::empty()).unwrap();
    let err = continuous.enumerate(h.ctx(), &[]).unwrap_err();
    assert!(matches!(err, Error::NotEnumerable { .. }));

    // Posterior mean of x given y = 1 is 0.8; the grid is -3, -2, ..., 3.
    let discrete = program.discretize(&[], &sel("x")).unwrap();
    let measure = discrete
        .project(ChoiceMap::from_values([("y", Value::f64(1.0))]))
        .unwrap();
    let e = h.enumerate(&measure, &[]);
    assert_eq!(e.len(), 7);
    let best = e.argmax().unwrap();
    assert_eq!(e.choices_at(best).unwrap().value("x"), Some(&Value::f64(1.0)));
    let total: f64 = e.posterior().iter().sum();
    assert_close(total, 1.0, 1e-12);

    // Discretising the measure instead of the program gives the same table.
    let via_measure = program
        .project(ChoiceMap::from_values([("y", Value::f64(1.0))]))
        .unwrap()
        .discretize(&sel("x"))
        .unwrap();
    assert_eq!(h.enumerate(&via_measure, &[]).scores, e.scores);
}

#[test]
fn test_discretize_without_grid() {
    let err = chain_model().discretize(&[], &sel("a")).unwrap_err();
    assert!(matches!(err, Error::SelectionMismatch { ref address, .. } if address == "a"));
}

/// The blanket of `a` keeps its child `b` as evidence and fixes `c`.
#[test]
fn test_blanket_posterior() {
    let mut h = TestHarness::seeded(21);
    let program = chain_model();
    let trace = h.simulate(&program, &[]);
    let b = trace.value("b").and_then(|v| v.as_bool()).unwrap();

    let blanket = trace.blanket(&sel("a")).unwrap();
    assert!(blanket.constraint().get("b").is_some());
    let e = h.enumerate(&blanket, &[]);
    assert_eq!(e.len(), 2);
    assert!(e.choices.get("c").is_none());

    let p_true = e.posterior()[1];
    let expected = if b { 0.9 } else { 0.1 };
    assert_close(p_true, expected, 1e-12);
}

#[test]
fn test_enumeration_json() {
    let mut h = TestHarness::unseeded();
    let e = h.enumerate(&and_model().project(ChoiceMap::empty()).unwrap(), &[]);
    let json = e.to_json().unwrap();
    assert!(json.contains("\"x\""));
    assert!(json.contains("\"scores\""));
}

//! Vectorised programs draw independently per element.

use stoch_foundation::{DType, Key, Shape, Value};
use stoch_ir::{stage, Atom, Aval};
use stoch_runtime::{modular_vmap, normal, seed, ChoiceMap, Context, Error, ProbabilisticStager};
use stoch_tests::{assert_close, branch_choice_model, gated_observation_model, gaussian_model, TestHarness};

#[test]
fn test_repeat_elements_are_distinct() {
    let mut h = TestHarness::seeded(10);
    let n = 16;
    let trace = h.simulate(&gaussian_model().repeat(n), &[Value::f64(0.0)]);
    let xs = trace.value("x").unwrap();
    assert_eq!(xs.shape(), &Shape::new(vec![n]));
    let mut sorted = xs.data().to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sorted.dedup();
    assert_eq!(sorted.len(), n);
}

/// The batched score is the sum of what each element scores on its own.
#[test]
fn test_batched_score_is_sum_of_elements() {
    let mut h = TestHarness::seeded(11);
    let inner = gaussian_model();
    let means = [0.0, 1.0, -2.0, 4.0];
    let program = inner.vmap(vec![Some(0)], None);
    let trace = h.simulate(&program, &[Value::from_f64s(&means)]);
    let xs = trace.value("x").unwrap();
    let ys = trace.value("y").unwrap();
    let mut total = 0.0;
    for (i, mean) in means.iter().enumerate() {
        let choices = ChoiceMap::from_values([
            ("x", Value::f64(xs.data()[i])),
            ("y", Value::f64(ys.data()[i])),
        ]);
        total += h.assess(&inner, &[Value::f64(*mean)], &choices);
    }
    assert_close(trace.score(), -total, 1e-9);
}

/// Element draws follow the unbatched distribution.
#[test]
fn test_repeat_matches_unbatched_moments() {
    let mut h = TestHarness::seeded(12);
    let n = 4000;
    let trace = h.simulate(&gaussian_model().repeat(n), &[Value::f64(2.0)]);
    let xs = trace.value("x").unwrap();
    let mean = xs.data().iter().sum::<f64>() / n as f64;
    let var = xs.data().iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    assert_close(mean, 2.0, 0.1);
    assert_close(var, 1.0, 0.1);
}

#[test]
fn test_nested_repeat() {
    let mut h = TestHarness::seeded(13);
    let program = gaussian_model().repeat(3).repeat(2);
    let trace = h.simulate(&program, &[Value::f64(0.0)]);
    let xs = trace.value("x").unwrap();
    assert_eq!(xs.shape(), &Shape::new(vec![2, 3]));
    let w = h.assess(&program, &[Value::f64(0.0)], &trace.choices());
    assert_close(trace.score(), -w, 1e-9);
}

#[test]
fn test_modular_vmap_of_graph() {
    let graph = stage::<Error, _>(&[Aval::scalar(DType::F64)], |s, xs| {
        let x = s.sample(&normal(), &[xs[0].clone(), Atom::from(1.0)])?;
        Ok(vec![s.add(&x, &xs[0])?])
    })
    .unwrap();
    let mut ctx = Context::new();
    let run = |ctx: &mut Context| {
        modular_vmap(ctx, &graph, &[Some(0)], None, &[Value::from_f64s(&[0.0, 0.0, 0.0, 0.0, 0.0])])
    };
    let a = seed(&mut ctx, Key::new(7), run).unwrap();
    let b = seed(&mut ctx, Key::new(7), run).unwrap();
    assert_eq!(a, b);
    let out = &a[0];
    assert_eq!(out.shape(), &Shape::new(vec![5]));
    for i in 0..5 {
        for j in i + 1..5 {
            assert_ne!(out.data()[i], out.data()[j]);
        }
    }
}

#[test]
fn test_mismatched_axis_sizes() {
    let program = gaussian_model().vmap(vec![Some(0)], Some(3));
    let err = program
        .simulate(&mut Context::seeded(Key::new(1)), &[Value::from_f64s(&[0.0, 1.0])])
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));
}

/// An observation under a sampled branch only scores the lanes that took it.
#[test]
fn test_observe_under_sampled_branch() {
    let mut h = TestHarness::seeded(14);
    let n = 32;
    let program = gated_observation_model().repeat(n);
    let trace = h.simulate(&program, &[]);
    let on = trace.value("x").unwrap().data().iter().filter(|x| **x != 0.0).count();
    assert!(on > 0 && on < n);
    let gated = &trace.retval_values()[1];
    assert_eq!(gated.data().iter().filter(|g| **g == 1.0).count(), on);

    let lp_observed = -0.5 * 0.25 - 0.5 * (2.0 * std::f64::consts::PI).ln();
    let expected = n as f64 * 0.5f64.ln() + on as f64 * lp_observed;
    assert_close(trace.score(), -expected, 1e-9);
    assert_close(h.assess(&program, &[], &trace.choices()), expected, 1e-9);
}

/// Each element of a batch with choices under a sampled branch scores what
/// the unbatched program scores on that element's choices.
#[test]
fn test_choice_under_sampled_branch() {
    let mut h = TestHarness::seeded(15);
    let n = 24;
    let inner = branch_choice_model(false);
    let trace = h.simulate(&inner.repeat(n), &[]);
    let xs = trace.value("x").unwrap();
    let ys = trace.value("y").unwrap();
    let zs = trace.value("z").unwrap();
    let drawn = &trace.retval_values()[1];
    assert_eq!(ys.shape(), &Shape::new(vec![n]));

    let mut total = 0.0;
    for i in 0..n {
        let x = xs.data()[i] != 0.0;
        let (addr, value) = if x { ("y", ys.data()[i]) } else { ("z", zs.data()[i]) };
        assert_eq!(drawn.data()[i], value);
        let choices = ChoiceMap::from_values([("x", Value::bool(x)), (addr, Value::f64(value))]);
        total += h.assess(&inner, &[], &choices);
    }
    assert_close(trace.score(), -total, 1e-9);
}

/// Branches that draw the same address from disjoint lanes share one entry.
#[test]
fn test_shared_address_across_branches() {
    let mut h = TestHarness::seeded(16);
    let n = 24;
    let inner = branch_choice_model(true);
    let program = inner.repeat(n);
    let trace = h.simulate(&program, &[]);
    let xs = trace.value("x").unwrap();
    let ys = trace.value("y").unwrap();
    assert!(trace.value("z").is_none());

    let mut total = 0.0;
    for i in 0..n {
        let x = xs.data()[i] != 0.0;
        let y = ys.data()[i];
        let centre = if x { 0.0 } else { 10.0 };
        assert!((y - centre).abs() < 6.0, "lane {} drew {}", i, y);
        let choices = ChoiceMap::from_values([("x", Value::bool(x)), ("y", Value::f64(y))]);
        total += h.assess(&inner, &[], &choices);
    }
    assert_close(trace.score(), -total, 1e-9);
    assert_close(h.assess(&program, &[], &trace.choices()), total, 1e-9);
}

//! Deterministic key replay.

use std::sync::Arc;

use stoch_foundation::{DType, Key, RuntimePolicy, UnseededPolicy, Value};
use stoch_ir::{stage, Atom, Aval};
use stoch_runtime::{normal, seed, Context, Error, ProbabilisticStager, SeededKernel, Trace};
use stoch_tests::{branching_model, chain_model, gaussian_model, TestHarness};

fn seeded_trace(ctx: &mut Context, key: u64, program: &stoch_runtime::Program, args: &[Value]) -> Trace {
    seed(ctx, Key::new(key), |ctx| program.simulate(ctx, args)).unwrap()
}

#[test]
fn test_same_key_replays_bit_for_bit() {
    let mut h = TestHarness::unseeded();
    let args = [Value::f64(0.0)];
    for program in [gaussian_model(), gaussian_model().repeat(3)] {
        let a = seeded_trace(h.ctx(), 42, &program, &args);
        let b = seeded_trace(h.ctx(), 42, &program, &args);
        assert_eq!(a.choices(), b.choices());
        assert_eq!(a.retval_values(), b.retval_values());
        assert_eq!(a.score().to_bits(), b.score().to_bits());
    }
}

#[test]
fn test_distinct_keys_give_distinct_traces() {
    let mut h = TestHarness::unseeded();
    let program = gaussian_model();
    let args = [Value::f64(0.0)];
    let traces: Vec<_> = (0..8).map(|k| seeded_trace(h.ctx(), k, &program, &args)).collect();
    for i in 0..traces.len() {
        for j in i + 1..traces.len() {
            assert_ne!(traces[i].value("x"), traces[j].value("x"), "keys {} and {}", i, j);
        }
    }
}

/// Seeding a scope leaves the surrounding key stream untouched.
#[test]
fn test_seed_scope_restores_outer_stream() {
    let program = chain_model();
    let mut with_scope = Context::seeded(Key::new(9));
    let mut without = Context::seeded(Key::new(9));
    seeded_trace(&mut with_scope, 1, &program, &[]);
    let a = program.simulate(&mut with_scope, &[]).unwrap();
    let b = program.simulate(&mut without, &[]).unwrap();
    assert_eq!(a.choices(), b.choices());
}

/// Both branches consume the same keys, so draws after the branch agree.
#[test]
fn test_branch_does_not_shift_later_draws() {
    let program = branching_model();
    for key in 0..16 {
        let mut ctx = Context::new();
        let (t_true, splits_true) = seed(&mut ctx, Key::new(key), |ctx| {
            let t = program.simulate(ctx, &[Value::bool(true)])?;
            Ok((t, ctx.splits()))
        })
        .unwrap();
        let (t_false, splits_false) = seed(&mut ctx, Key::new(key), |ctx| {
            let t = program.simulate(ctx, &[Value::bool(false)])?;
            Ok((t, ctx.splits()))
        })
        .unwrap();
        assert_eq!(splits_true, splits_false);
        assert_eq!(t_true.value("z"), t_false.value("z"), "key {}", key);
    }
}

#[test]
fn test_unseeded_policy() {
    let program = gaussian_model();
    let args = [Value::f64(0.0)];

    let mut strict = Context::with_policy(RuntimePolicy::strict());
    let err = program.simulate(&mut strict, &args).unwrap_err();
    assert!(matches!(err, Error::UnseededSampling { .. }));

    let policy = RuntimePolicy {
        unseeded: UnseededPolicy::Ignore,
        ..RuntimePolicy::default()
    };
    let mut lenient = Context::with_policy(policy);
    let a = program.simulate(&mut lenient, &args).unwrap();
    let b = program.simulate(&mut lenient, &args).unwrap();
    assert_ne!(a.value("x"), b.value("x"));

    // A seed scope makes even a strict context deterministic.
    let c = seeded_trace(&mut strict, 5, &program, &args);
    let d = seeded_trace(&mut strict, 5, &program, &args);
    assert_eq!(c.choices(), d.choices());
}

#[test]
fn test_seeded_kernel_is_pure() {
    let graph = stage::<Error, _>(&[Aval::scalar(DType::F64)], |s, xs| {
        let a = s.sample(&normal(), &[xs[0].clone(), Atom::from(1.0)])?;
        let b = s.sample(&normal(), &[a.clone(), Atom::from(1.0)])?;
        Ok(vec![a, b])
    })
    .unwrap();
    let kernel = SeededKernel::new(Arc::new(graph), Key::new(3));
    let first = kernel.call(&[Value::f64(1.0)]).unwrap();
    for _ in 0..3 {
        assert_eq!(kernel.call(&[Value::f64(1.0)]).unwrap(), first);
    }
    assert_ne!(first[0], first[1]);
    let other = SeededKernel::new(Arc::new(kernel.graph().clone()), Key::new(4));
    assert_ne!(other.call(&[Value::f64(1.0)]).unwrap(), first);
}

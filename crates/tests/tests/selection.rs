//! Selection algebra over the addresses of real traces.

use stoch_foundation::Value;
use stoch_runtime::{sel, sel_all, sel_none, ChoiceMap, Selection};
use stoch_tests::{chain_model, TestHarness};

const ADDRESSES: [&str; 6] = ["a", "b", "c", "a/b", "x/y/z", ""];

fn selections() -> Vec<Selection> {
    vec![
        sel_all(),
        sel_none(),
        sel("a"),
        sel("a/b"),
        !sel("a"),
        sel("a") & sel("b"),
        !(sel("a") & !sel_all()),
        Selection::dict([("a", sel("b")), ("c", sel_all())]),
    ]
}

/// Every level of every address gets a verdict and a residual.
#[test]
fn test_match_is_total() {
    for s in selections() {
        for addr in ADDRESSES {
            let mut current = s.clone();
            for key in addr.split('/') {
                let (_, residual) = current.matches(key);
                current = residual;
            }
        }
    }
}

#[test]
fn test_all_and_its_complement() {
    for addr in ADDRESSES {
        let (hit, residual) = sel_all().matches(addr);
        assert!(hit, "{}", addr);
        assert_eq!(residual, Selection::All);
        assert!(!(!sel_all()).matches(addr).0, "{}", addr);
        assert!(!sel_none().matches(addr).0, "{}", addr);
    }
}

#[test]
fn test_residuals_descend_one_level() {
    let (hit, rest) = sel("a/b").matches("a");
    assert!(hit);
    assert!(rest.matches("b").0);
    assert!(!rest.matches("c").0);

    let d = Selection::dict([("a", sel("b"))]);
    assert!(d.matches("a").1.matches("b").0);
    assert!(!d.matches("z").0);
}

/// A selection and its complement split any choice map.
#[test]
fn test_complement_partitions_choices() {
    let mut h = TestHarness::seeded(30);
    let trace = h.simulate(&chain_model(), &[]);
    let choices = trace.choices();
    for s in selections() {
        let inside = choices.filter(&s);
        let outside = choices.filter(&!s.clone());
        assert_eq!(
            inside.leaves().len() + outside.leaves().len(),
            choices.leaves().len(),
            "{}",
            s
        );
        assert_eq!(inside.merge(&outside).leaves().len(), choices.leaves().len());
    }
}

#[test]
fn test_intersection_with_complement_is_empty() {
    let choices = ChoiceMap::from_values([
        ("a", Value::bool(true)),
        ("b", Value::bool(false)),
        ("c", Value::bool(true)),
    ]);
    for name in ["a", "b", "c"] {
        let s = sel(name) & !sel(name);
        assert!(choices.filter(&s).leaves().is_empty(), "{}", s);
        for addr in ["a", "b", "c"] {
            assert!(!s.matches(addr).0);
        }
    }
}

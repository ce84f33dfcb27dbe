use rstest::rstest;

use super::*;

fn nested() -> Value {
    Value::map([
        ("a", Value::from(1)),
        ("b", Value::map([("c", Value::list([Value::from(2), Value::from("x")]))])),
        ("d", Value::date(5)),
        ("e", Value::from(f64::NAN)),
    ])
}

#[rstest]
#[case::default("default")]
#[case::strict("strict")]
#[case::shallow("shallow")]
#[case::shallow2("shallow2")]
#[case::shallow3("shallow3")]
#[case::deep("deep")]
fn reflexive(#[case] name: &str) {
    let eq = resolve_equality(name).unwrap();
    let v = nested();
    assert!(eq.eq(&v, &v));
    assert!(eq.eq(&Value::Null, &Value::Null));
    assert!(eq.eq(&Value::from(f64::NAN), &Value::from(f64::NAN)));
}

#[rstest]
#[case("strict", false)]
#[case("shallow", false)]
#[case("shallow2", false)]
#[case("shallow3", true)]
#[case("deep", true)]
fn structural_copy(#[case] name: &str, #[case] expected: bool) {
    let build = || {
        Value::map([
            ("a", Value::from(1)),
            ("b", Value::map([("c", Value::list([Value::from(2), Value::from("x")]))])),
        ])
    };
    let eq = resolve_equality(name).unwrap();
    assert_eq!(eq.eq(&build(), &build()), expected);
}

#[test]
fn shallow_compares_entries_by_identity() {
    let inner = Value::map([("x", Value::from(1))]);
    let a = Value::map([("k", inner.clone()), ("n", Value::from(1))]);
    let b = Value::map([("k", inner), ("n", Value::from(1))]);
    assert!(!strict_eq(&a, &b));
    assert!(shallow_eq(&a, &b));

    let c = Value::map([("k", Value::map([("x", Value::from(1))])), ("n", Value::from(1))]);
    assert!(!shallow_eq(&a, &c));
    assert!(shallow_n_eq(&a, &c, 2));
}

#[test]
fn shallow_requires_same_key_set() {
    let a = Value::map([("a", Value::from(1))]);
    let b = Value::map([("a", Value::from(1)), ("b", Value::Null)]);
    assert!(!shallow_eq(&a, &b));
    assert!(!shallow_eq(&b, &a));
    assert!(!deep_eq(&a, &b));
}

#[test]
fn shallow_n_is_shallow_nested() {
    let leaf = |n: i64| Value::map([("n", Value::from(n))]);
    let a = Value::list([leaf(1), leaf(2)]);
    let b = Value::list([leaf(1), leaf(2)]);
    assert!(!shallow_n_eq(&a, &b, 1));
    assert!(shallow_n_eq(&a, &b, 2));
    assert_eq!(
        shallow_n_eq(&a, &b, 2),
        a.as_list()
            .unwrap()
            .iter()
            .zip(b.as_list().unwrap())
            .all(|(x, y)| shallow_eq(x, y))
    );
}

#[test]
fn strict_primitives() {
    assert!(strict_eq(&Value::from("a"), &Value::from("a")));
    assert!(strict_eq(&Value::from(1), &Value::from(1)));
    assert!(!strict_eq(&Value::from(1), &Value::from(1.0)));
    assert!(!strict_eq(&Value::from(0.0), &Value::from(-0.0)));
    assert!(deep_eq(&Value::from(0.0), &Value::from(-0.0)));
}

#[test]
fn default_compares_dates_by_timestamp() {
    let a = Value::date(100);
    let b = Value::date(100);
    assert!(!strict_eq(&a, &b));
    assert!(default_eq(&a, &b));
    assert!(!default_eq(&a, &Value::date(101)));

    let la = Value::list([Value::from(1)]);
    let lb = Value::list([Value::from(1)]);
    assert!(!default_eq(&la, &lb));
}

#[rstest]
#[case("")]
#[case("loose")]
#[case("shallow0")]
#[case("shallowx")]
#[case("Deep")]
fn unknown_names_fail(#[case] name: &str) {
    let e = resolve_equality(name).unwrap_err();
    assert!(matches!(e, Error::InvalidEquality { .. }), "{e}");
}

#[test]
fn names_round_trip_through_debug() {
    for name in ["default", "strict", "shallow", "shallow4", "deep"] {
        assert_eq!(format!("{:?}", resolve_equality(name).unwrap()), name);
    }
}

#[test]
fn custom_equality() {
    let same_parity = Equality::custom(|a, b| match (a.as_int(), b.as_int()) {
        (Some(a), Some(b)) => a % 2 == b % 2,
        _ => false,
    });
    assert!(same_parity.eq(&1.into(), &3.into()));
    assert!(!same_parity.eq(&1.into(), &2.into()));
    assert!(same_parity.is_same_strategy(&same_parity.clone()));
    assert!(!same_parity.is_same_strategy(&Equality::custom(|_, _| true)));
}

#[test]
fn stabilize_keeps_previous_reference() {
    let prev = Value::map([("a", Value::from(1))]);
    let next = Value::map([("a", Value::from(1))]);
    let kept = stabilize(&prev, next.clone(), &Equality::Deep);
    assert!(strict_eq(&kept, &prev));

    let replaced = stabilize(&prev, next.clone(), &Equality::Strict);
    assert!(strict_eq(&replaced, &next));

    let changed = Value::map([("a", Value::from(2))]);
    let out = stabilize(&prev, changed.clone(), &Equality::Deep);
    assert!(strict_eq(&out, &changed));
}

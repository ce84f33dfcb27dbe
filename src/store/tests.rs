use std::cell::RefCell;

use assert_call::{call, CallRecorder};

use super::*;
use crate::{utils::test_helpers::counter_spec, Container, Equality};

fn counter() -> (Container, Store) {
    let c = Container::new();
    let s = c.get(&counter_spec("counter")).unwrap();
    (c, s)
}

#[test]
fn increment_three_times() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    let _sub = s.on_change("count", |c| call!("{:?} -> {:?}", c.prev, c.next));
    for _ in 0..3 {
        s.dispatch("increment", &[]).unwrap();
    }
    assert_eq!(s.peek("count"), Value::from(3));
    cr.verify(["0 -> 1", "1 -> 2", "2 -> 3"]);
}

#[test]
fn dispatch_returns_action_result() {
    let (_c, s) = counter();
    assert_eq!(s.dispatch("add", &[5.into()]).unwrap(), Value::from(5));
    assert_eq!(s.dispatch("add", &[2.into()]).unwrap(), Value::from(7));
}

#[test]
fn listener_order() {
    let mut cr = CallRecorder::new();
    let spec = StoreSpec::builder("s")
        .field("a", 0)
        .field("b", 0)
        .setup(|_| {
            Ok(Actions::new().add("both", |ac, _| {
                ac.set("b", 1);
                ac.set("a", 1);
                Ok(Value::Null)
            }))
        })
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let _subs = [
        s.on_dispatch(None, |call| call!("* {}", call.name)),
        s.on_dispatch(Some("both"), |call| call!("action {}", call.name)),
        s.on_change("b", |c| call!("field {}", c.field)),
        s.on_change("a", |c| call!("field {}", c.field)),
    ];
    s.dispatch("both", &[]).unwrap();
    cr.verify(["field a", "field b", "action both", "* both"]);
}

#[test]
fn changes_are_batched_per_pass() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    let _sub = s.on_change("count", |c| call!("{:?}", c.next));
    s.mutate(|ac| {
        ac.set("count", 1);
        ac.set("count", 2);
        ac.set("count", 3);
        Ok(())
    })
    .unwrap();
    cr.verify("3");
}

#[test]
fn writing_same_value_does_not_notify() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    let _sub = s.on_change("count", |_| call!("changed"));
    s.mutate(|ac| {
        ac.set("count", 5);
        ac.set("count", 0);
        Ok(())
    })
    .unwrap();
    cr.verify(());
}

#[test]
fn field_equality_decides_change() {
    let mut cr = CallRecorder::new();
    let spec = StoreSpec::builder("s")
        .field("strict", Value::map([("x", Value::from(1))]))
        .field("deep", Value::map([("x", Value::from(1))]))
        .equality("deep", Equality::Deep)
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let _subs = [
        s.on_change("strict", |_| call!("strict")),
        s.on_change("deep", |_| call!("deep")),
    ];
    s.mutate(|ac| {
        ac.set("strict", Value::map([("x", Value::from(1))]));
        ac.set("deep", Value::map([("x", Value::from(1))]));
        Ok(())
    })
    .unwrap();
    cr.verify("strict");
}

#[test]
fn failed_action_rolls_back() {
    let mut cr = CallRecorder::new();
    let spec = StoreSpec::builder("s")
        .field("count", 0)
        .setup(|_| {
            Ok(Actions::new().add("fail", |ac, _| {
                ac.set("count", 10);
                Err(Error::UnknownAction {
                    store: "s".into(),
                    action: "inner".into(),
                })
            }))
        })
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let _subs = [
        s.on_change("count", |_| call!("changed")),
        s.on_dispatch(None, |_| call!("dispatched")),
    ];
    assert!(s.dispatch("fail", &[]).is_err());
    assert_eq!(s.peek("count"), Value::from(0));
    cr.verify(());
    let fail = s.action("fail").unwrap();
    assert_eq!(fail.count(), 1);
    assert_eq!(fail.last().map(|c| c.index), Some(1));
}

#[test]
fn nested_dispatch_joins_the_pass() {
    let mut cr = CallRecorder::new();
    let spec = StoreSpec::builder("s")
        .field("count", 0)
        .field("log", 0)
        .setup(|_| {
            Ok(Actions::new()
                .add("inc", |ac, _| {
                    ac.update("count", |v| Value::from(v.as_int().unwrap_or(0) + 1));
                    Ok(Value::Null)
                })
                .add("inc_twice", |ac, _| {
                    ac.dispatch("inc", &[])?;
                    ac.dispatch("inc", &[])?;
                    ac.set("log", 1);
                    Ok(Value::Null)
                }))
        })
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let _subs = [
        s.on_change("count", |c| call!("count {:?}", c.next)),
        s.on_dispatch(None, |call| call!("{}", call.name)),
    ];
    s.dispatch("inc_twice", &[]).unwrap();
    cr.verify(["count 2", "inc_twice", "inc", "inc"]);
    assert_eq!(s.action("inc").unwrap().count(), 2);
}

#[test]
fn listener_can_dispatch() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    let s2 = s.clone();
    let _sub = s.on_change("count", move |c| {
        call!("{:?}", c.next);
        if c.next == Value::from(1) {
            s2.dispatch("increment", &[]).unwrap();
        }
    });
    s.dispatch("increment", &[]).unwrap();
    cr.verify(["1", "2"]);
}

#[test]
fn unsubscribe_during_emit() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    let second: Rc<RefCell<Option<Subscription>>> = Rc::default();
    let second2 = second.clone();
    let _first = s.on_change("count", move |_| {
        call!("first");
        second2.borrow_mut().take();
    });
    *second.borrow_mut() = Some(s.on_change("count", |_| call!("second")));
    s.dispatch("increment", &[]).unwrap();
    cr.verify("first");
}

#[test]
fn dropping_subscription_stops_notifications() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    let sub = s.on_change("count", |_| call!("changed"));
    s.dispatch("increment", &[]).unwrap();
    cr.verify("changed");
    drop(sub);
    s.dispatch("increment", &[]).unwrap();
    cr.verify(());
}

#[test]
fn invalid_action_names() {
    for (name, actions) in [
        ("empty", Actions::new().add("", |_, _| Ok(Value::Null))),
        ("wildcard", Actions::new().add("*", |_, _| Ok(Value::Null))),
        (
            "duplicate",
            Actions::new()
                .add("a", |_, _| Ok(Value::Null))
                .add("a", |_, _| Ok(Value::Null)),
        ),
    ] {
        let spec = StoreSpec::builder(name)
            .setup(move |_| Ok(actions.clone()))
            .build();
        let c = Container::new();
        let e = c.get(&spec).unwrap_err();
        assert!(matches!(e, Error::InvalidActionShape { .. }), "{name}: {e}");
        assert!(c.peek(&spec).is_none());
    }
}

#[test]
fn unknown_action() {
    let (_c, s) = counter();
    let e = s.dispatch("missing", &[]).unwrap_err();
    assert!(matches!(e, Error::UnknownAction { .. }), "{e}");
    assert!(s.action("missing").is_err());
    assert_eq!(
        s.action_names().iter().map(|n| &**n).collect::<Vec<_>>(),
        ["add", "increment"]
    );
}

#[test]
fn disposed_store_rejects_writes() {
    let (c, s) = counter();
    c.dispose();
    assert!(s.is_disposed());
    assert!(s.dispatch("increment", &[]).unwrap_err().is_disposed());
    assert!(s.set("count", 1).unwrap_err().is_disposed());
    assert!(s.on_change("count", |_| {}).is_empty());
}

#[test]
fn on_dispose_runs_in_reverse() {
    let mut cr = CallRecorder::new();
    let (c, s) = counter();
    s.on_dispose(|| call!("first"));
    s.on_dispose(|| call!("second"));
    c.dispose();
    cr.verify(["second", "first"]);
    s.on_dispose(|| call!("late"));
    cr.verify("late");
}

#[test]
fn action_handle_tracks_calls() {
    let (_c, s) = counter();
    let add = s.action("add").unwrap();
    assert_eq!(add.count(), 0);
    assert_eq!(add.last(), None);
    add.call(&[3.into()]).unwrap();
    add.call(&[4.into()]).unwrap();
    assert_eq!(add.count(), 2);
    let last = add.last().unwrap();
    assert_eq!(last.index, 2);
    assert_eq!(&*last.args, &[Value::from(4)]);
    assert_eq!(format!("{add:?}"), "counter.add()");

    let mut rc = ReadContext::untracked();
    assert_eq!(s.last_dispatch(&mut rc).map(|c| c.name), Some("add".into()));
}

#[test]
fn setup_overrides_initial_state() {
    let spec = StoreSpec::builder("s")
        .field("count", 0)
        .setup(|cx| {
            cx.set("count", 10);
            Ok(Actions::new())
        })
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    assert_eq!(s.peek("count"), Value::from(10));
    assert!(!s.dirty(None));
}

#[test]
fn dirty_and_reset() {
    let mut cr = CallRecorder::new();
    let (_c, s) = counter();
    assert!(!s.dirty(None));
    s.dispatch("add", &[2.into()]).unwrap();
    assert!(s.dirty(None));
    assert!(s.dirty(Some("count")));
    assert!(!s.dirty(Some("other")));

    let _sub = s.on_change("count", |c| call!("{:?}", c.next));
    s.reset(Some("count")).unwrap();
    cr.verify("0");
    assert!(!s.dirty(None));

    s.set("extra", 1).unwrap();
    assert!(s.dirty(None));
    s.reset(None).unwrap();
    assert!(!s.dirty(None));
    assert_eq!(s.peek("extra"), Value::Null);
}

#[test]
fn dehydrate_and_hydrate() {
    let mut cr = CallRecorder::new();
    let spec = StoreSpec::builder("session")
        .field("user", "alice")
        .field("token", "secret")
        .normalize(|mut state| {
            state.remove("token");
            state
        })
        .denormalize(|mut data| {
            data.insert("restored".into(), true.into());
            data
        })
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let data = s.dehydrate();
    assert_eq!(Value::from(data.clone()), Value::map([("user", "alice".into())]));

    let _sub = s.on_change("user", |c| call!("user {:?}", c.next));
    let mut data = data;
    data.insert("user".into(), "bob".into());
    s.hydrate(data).unwrap();
    cr.verify(r#"user "bob""#);
    assert_eq!(s.peek("restored"), Value::from(true));
    assert_eq!(s.peek("token"), Value::from("secret"));
}

#[test]
fn subscribe_key_display() {
    assert_eq!(SubscribeKey::field("a").to_string(), "a");
    assert_eq!(SubscribeKey::action("inc").to_string(), "inc()");
    assert_eq!(SubscribeKey::AnyAction.to_string(), "*");
}

#[test]
fn lifetime_display() {
    assert_eq!(Lifetime::Singleton.to_string(), "singleton");
    assert_eq!(Lifetime::AutoDispose.to_string(), "auto-dispose");
}

use super::*;
use assert_call::{call, CallRecorder};
use std::cell::Cell;

#[test]
fn from_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    {
        let _s = Subscription::from_fn(|| call!("drop"));
    }
    cr.verify("drop");
}

#[test]
fn unsubscribe_calls_once() {
    let mut cr = CallRecorder::new();
    let s = Subscription::from_fn(|| call!("drop"));
    s.unsubscribe();
    cr.verify("drop");
}

#[test]
fn from_weak_fn_calls_when_alive() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(9));
    {
        let _s = Subscription::from_weak_fn(Rc::downgrade(&rc), |rc| call!("{}", rc.get()));
    }
    cr.verify("9");
}

#[test]
fn from_weak_fn_noop_when_dead() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(1));
    let weak = Rc::downgrade(&rc);
    drop(rc);
    {
        let _s = Subscription::from_weak_fn(weak, |rc| call!("{}", rc.get()));
    }
    cr.verify(());
}

#[test]
fn collected_subscriptions_drop_in_order() {
    let mut cr = CallRecorder::new();
    let s: Subscription = ["a", "b", "c"]
        .into_iter()
        .map(|name| Subscription::from_fn(move || call!("{}", name)))
        .collect();
    assert!(!s.is_empty());
    drop(s);
    cr.verify(["a", "b", "c"]);
}

#[test]
fn empty_is_empty() {
    assert!(Subscription::empty().is_empty());
    let s: Subscription = [Subscription::empty(), Subscription::default()]
        .into_iter()
        .collect();
    assert!(s.is_empty());
}

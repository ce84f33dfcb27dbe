use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};
use sigmut_store::{
    Actions, Binding, Container, Pool, ReadContext, ReadError, Store, StoreSpec, Value,
};

fn counter() -> StoreSpec {
    StoreSpec::builder("counter")
        .field("count", 0)
        .setup(|_| {
            Ok(Actions::new().add("increment", |ac, _| {
                ac.update("count", |v| Value::from(v.as_int().unwrap_or(0) + 1));
                Ok(Value::Null)
            }))
        })
        .build()
}

#[test]
fn counter_increments() {
    let mut cr = CallRecorder::new();
    let c = Container::new();
    let s = c.get(&counter()).unwrap();
    let _sub = s.on_change("count", |change| call!("{:?} -> {:?}", change.prev, change.next));
    for _ in 0..3 {
        s.dispatch("increment", &[]).unwrap();
    }
    assert_eq!(s.state().get("count"), Some(&Value::from(3)));
    cr.verify(["0 -> 1", "1 -> 2", "2 -> 3"]);
}

#[test]
fn pool_creates_once() {
    let mut cr = CallRecorder::new();
    let pool = Pool::new(|key: &&'static str| {
        call!("factory {key}");
        key.len()
    });
    let a = pool.get(&"a");
    let b = pool.get(&"a");
    assert!(Rc::ptr_eq(&a, &b));
    cr.verify("factory a");
}

#[test]
fn focus_with_fallback() {
    let spec = StoreSpec::builder("user").field("profile", Value::Null).build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let name = s.focus_with(
        "profile.name",
        sigmut_store::FocusOptions::new().fallback(|| "Guest".into()),
    );
    assert_eq!(name.get(&mut ReadContext::untracked()), Value::from("Guest"));
    name.set("Alice").unwrap();
    assert_eq!(
        s.peek("profile"),
        Value::map([("name", Value::from("Alice"))])
    );
}

struct Stores {
    a: Store,
    b: Store,
}

fn conditional(stores: &Stores) -> impl Fn(&mut ReadContext) -> Result<Value, ReadError> + '_ {
    move |rc: &mut ReadContext| {
        if stores.a.get("x", rc).as_bool() == Some(true) {
            Ok(stores.b.get("y", rc))
        } else {
            Ok(Value::Null)
        }
    }
}

#[test]
fn conditional_dependencies_follow_the_last_render() {
    let mut cr = CallRecorder::new();
    let c = Container::new();
    let stores = Stores {
        a: c.get(&StoreSpec::builder("a").field("x", false).build()).unwrap(),
        b: c.get(&StoreSpec::builder("b").field("y", 0).build()).unwrap(),
    };
    let binding = Binding::new(&c, || call!("update"));
    binding.render(conditional(&stores)).unwrap();
    binding.commit().unwrap();
    stores.b.set("y", 1).unwrap();
    cr.verify(());

    stores.a.set("x", true).unwrap();
    cr.verify("update");
    assert_eq!(binding.render(conditional(&stores)).unwrap(), Value::from(1));
    binding.commit().unwrap();
    stores.b.set("y", 2).unwrap();
    cr.verify("update");
}

#[test]
fn only_last_render_stays_subscribed() {
    let mut cr = CallRecorder::new();
    let c = Container::new();
    let s = c
        .get(&StoreSpec::builder("s").field("x", 0).field("y", 0).build())
        .unwrap();
    let binding = Binding::new(&c, || call!("update"));
    binding.render(|rc| Ok(s.get("x", rc))).unwrap();
    binding.render(|rc| Ok(s.get("y", rc))).unwrap();
    binding.commit().unwrap();
    s.set("x", 1).unwrap();
    cr.verify(());
    s.set("y", 1).unwrap();
    cr.verify("update");
}

#[test]
fn cleanup_is_idempotent() {
    let mut cr = CallRecorder::new();
    let c = Container::new();
    let s = c.get(&counter()).unwrap();
    let binding = Binding::new(&c, || {});
    binding.on_dispose(|| call!("dispose"));
    binding.render(|rc| Ok(s.get("count", rc))).unwrap();
    binding.commit().unwrap();
    for _ in 0..3 {
        binding.cleanup();
    }
    assert_eq!(c.runtime().pending_timers(), 1);
    c.runtime().advance(c.runtime().config().detach_grace);
    cr.verify("dispose");
}

#[test]
fn host_loop() {
    let c = Container::new();
    let s = c.get(&counter()).unwrap();
    let renders = Rc::new(RefCell::new(Vec::new()));
    let pending = Rc::new(RefCell::new(false));
    let pending2 = pending.clone();
    let binding = Binding::new(&c, move || *pending2.borrow_mut() = true);

    let render = |binding: &Binding| {
        let v = binding.render(|rc| Ok(s.get("count", rc))).unwrap();
        renders.borrow_mut().push(v);
        binding.commit().unwrap();
    };
    render(&binding);
    for _ in 0..2 {
        s.dispatch("increment", &[]).unwrap();
        c.runtime().update();
        if pending.replace(false) {
            render(&binding);
        }
    }
    assert_eq!(
        *renders.borrow(),
        [Value::from(0), Value::from(1), Value::from(2)]
    );
    c.dispose();
    assert!(s.is_disposed());
}

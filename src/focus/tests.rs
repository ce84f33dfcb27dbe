use assert_call::{call, CallRecorder};

use super::*;
use crate::{strict_eq, Binding, Container, ReadSet, StoreSpec};

fn profile_store() -> (Container, Store) {
    let spec = StoreSpec::builder("user")
        .field("profile", Value::Null)
        .field("other", 0)
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    (c, s)
}

#[test]
fn fallback_and_auto_create() {
    let (_c, s) = profile_store();
    let name = s.focus_with(
        "profile.name",
        FocusOptions::new().fallback(|| "Guest".into()),
    );
    assert_eq!(name.peek(), Value::from("Guest"));
    name.set("Alice").unwrap();
    assert_eq!(
        s.peek("profile"),
        Value::map([("name", Value::from("Alice"))])
    );
    assert_eq!(name.peek(), Value::from("Alice"));
}

#[test]
fn same_path_returns_cached_focus() {
    let (_c, s) = profile_store();
    let a = s.focus("profile.name");
    let b = s.focus(".profile..name");
    assert!(a.ptr_eq(&b));
    assert_eq!(b.path(), "profile.name");
    assert!(!a.ptr_eq(&s.focus("profile")));
}

#[test]
fn first_options_win() {
    let (_c, s) = profile_store();
    let first = s.focus_with("profile.name", FocusOptions::new().fallback(|| "A".into()));
    let second = s.focus_with("profile.name", FocusOptions::new().fallback(|| "B".into()));
    assert!(first.ptr_eq(&second));
    assert_eq!(second.peek(), Value::from("A"));
}

#[test]
fn get_tracks_root_field() {
    let (_c, s) = profile_store();
    let name = s.focus("profile.name");
    let mut reads = ReadSet::new();
    name.get(&mut ReadContext::new(&mut reads));
    assert_eq!(
        reads.keys().cloned().collect::<Vec<_>>(),
        [crate::ReadKey::Field(s.id(), "profile".into())]
    );
}

#[test]
fn relative_focus() {
    let (_c, s) = profile_store();
    let profile = s.focus("profile");
    let city = profile.to("address.city");
    assert_eq!(city.path(), "profile.address.city");
    assert!(city.ptr_eq(&s.focus("profile.address.city")));
    city.set("Paris").unwrap();
    assert_eq!(
        profile.peek(),
        Value::map([("address", Value::map([("city", Value::from("Paris"))]))])
    );
}

#[test]
fn set_keeps_sibling_identity() {
    let (_c, s) = profile_store();
    s.focus("profile").set(Value::map([
        ("name", Value::from("A")),
        ("tags", Value::list([Value::from("x")])),
    ]))
    .unwrap();
    let tags = s.focus("profile.tags").peek();
    s.focus("profile.name").set("B").unwrap();
    assert!(strict_eq(&tags, &s.focus("profile.tags").peek()));
}

#[test]
fn writing_an_equal_value_does_not_notify() {
    let mut cr = CallRecorder::new();
    let (c, s) = profile_store();
    let name = s.focus("profile.name");
    name.set("Alice").unwrap();
    let profile = s.peek("profile");

    let _sub = s.on_change("profile", |_| call!("profile changed"));
    let b = Binding::new(&c, || call!("update"));
    let f = name.clone();
    b.render(move |rc| Ok(f.get(rc))).unwrap();
    b.commit().unwrap();

    name.set("Alice").unwrap();
    cr.verify(());
    assert!(strict_eq(&profile, &s.peek("profile")));

    name.set("Bob").unwrap();
    cr.verify(["profile changed", "update"]);
}

#[test]
fn update_and_modify() {
    let (_c, s) = profile_store();
    let visits = s.focus("profile.visits");
    visits
        .update(|v| Value::from(v.as_int().unwrap_or(0) + 1))
        .unwrap();
    visits
        .update(|v| Value::from(v.as_int().unwrap_or(0) + 1))
        .unwrap();
    assert_eq!(visits.peek(), Value::from(2));

    let tags = s.focus_with("profile.tags", FocusOptions::new().fallback(|| Value::list([])));
    tags.modify(|v| {
        if let Some(list) = v.as_list_mut() {
            list.push("new".into());
        }
    })
    .unwrap();
    assert_eq!(tags.peek(), Value::list([Value::from("new")]));
}

#[test]
fn on_reports_changes_at_path() {
    let mut cr = CallRecorder::new();
    let (_c, s) = profile_store();
    let name = s.focus("profile.name");
    let _sub = name.on(|next, prev| call!("{:?} <- {:?}", next, prev));
    name.set("Alice").unwrap();
    cr.verify(r#""Alice" <- null"#);

    s.focus("profile.age").set(3).unwrap();
    cr.verify(());
    s.set("other", 1).unwrap();
    cr.verify(());
}

#[test]
fn on_with_equality() {
    let mut cr = CallRecorder::new();
    let (_c, s) = profile_store();
    let address = s.focus_with("profile.address", FocusOptions::new().equality(Equality::Deep));
    let _sub = address.on(|_, _| call!("changed"));
    address.set(Value::map([("city", Value::from("Paris"))])).unwrap();
    cr.verify("changed");
    address.set(Value::map([("city", Value::from("Paris"))])).unwrap();
    cr.verify(());
}

#[test]
fn dirty_and_reset() {
    let spec = StoreSpec::builder("user")
        .field("profile", Value::map([("name", Value::from("A")), ("age", Value::from(1))]))
        .build();
    let c = Container::new();
    let s = c.get(&spec).unwrap();
    let name = s.focus("profile.name");
    let age = s.focus("profile.age");
    name.set("B").unwrap();
    assert!(name.dirty());
    assert!(!age.dirty());
    name.reset().unwrap();
    assert!(!name.dirty());
    assert_eq!(name.peek(), Value::from("A"));
}

#[test]
fn root_focus_reads_whole_state() {
    let (_c, s) = profile_store();
    let root = s.focus("");
    assert_eq!(root.peek().key("other"), Some(&Value::from(0)));
    root.set(Value::map([("other", Value::from(5))])).unwrap();
    assert_eq!(s.peek("other"), Value::from(5));
    root.set(1).unwrap();
    assert_eq!(s.peek("other"), Value::from(5));
    assert!(root.on(|_, _| {}).is_empty());
    assert!(root.dirty());
    root.reset().unwrap();
    assert!(!root.dirty());
}

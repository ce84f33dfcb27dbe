use futures::channel::oneshot;
use rt_local::{runtime::core::test, spawn_local, wait_for_idle};

use super::*;

#[test]
fn resolved_is_settled() {
    let p = Promise::resolved(Value::from(1));
    assert!(p.is_settled());
    assert_eq!(p.peek(), Some(Value::from(1)));
}

#[test]
fn value_round_trip_keeps_identity() {
    let p = Promise::resolved(Value::Null);
    let v = p.to_value();
    assert_eq!(Promise::from_value(&v), Some(p.clone()));
    assert_eq!(Promise::from_value(&Value::from(1)), None);
    assert!(v.is_promise());
}

#[test]
async fn settles_when_sender_completes() {
    let (tx, rx) = oneshot::channel::<Value>();
    let p = Promise::new(async move { rx.await.unwrap_or_default() });
    assert!(!p.is_settled());

    let ready = p.ready();
    let task = spawn_local(async move { ready.await });
    wait_for_idle().await;
    assert_eq!(p.peek(), None);

    tx.send(Value::from("done")).unwrap();
    assert_eq!(task.await, Value::from("done"));
    assert_eq!(p.peek(), Some(Value::from("done")));
}

use assert_call::call;

use crate::{Actions, Dispose, StoreSpec, Value};

/// Store with `count: 0` and the actions `increment()` and `add(n)`.
pub fn counter_spec(name: &str) -> StoreSpec {
    StoreSpec::builder(name)
        .field("count", 0)
        .setup(|_| {
            Ok(Actions::new()
                .add("increment", |ac, _| {
                    ac.update("count", |v| Value::from(v.as_int().unwrap_or(0) + 1));
                    Ok(Value::Null)
                })
                .add("add", |ac, args| {
                    let n = args.first().and_then(Value::as_int).unwrap_or(0);
                    ac.update("count", |v| Value::from(v.as_int().unwrap_or(0) + n));
                    Ok(ac.get("count"))
                }))
        })
        .build()
}

/// Records `dispose {name}` when disposed.
pub struct Probe(pub &'static str);

impl Dispose for Probe {
    fn dispose(&self) {
        call!("dispose {}", self.0);
    }
}

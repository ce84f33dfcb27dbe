use std::{future::Future, rc::Rc};

use futures::{
    future::{self, LocalBoxFuture, Shared},
    FutureExt,
};

use crate::{utils::next_id, Value};

#[cfg(test)]
mod tests;

/// Value that becomes available later.
///
/// Stores may hold a `Promise` in a field (through [`Promise::to_value`]).
/// A read pass that needs the settled value calls [`ReadContext::wait`](crate::ReadContext::wait),
/// which suspends the pass with [`ReadError::Pending`](crate::ReadError::Pending)
/// until the promise has completed.
#[derive(Clone)]
pub struct Promise(Rc<PromiseNode>);

struct PromiseNode {
    id: u64,
    future: Shared<LocalBoxFuture<'static, Value>>,
}

impl Promise {
    pub fn new(future: impl Future<Output = Value> + 'static) -> Self {
        let future = future.boxed_local().shared();
        // settles futures that are already ready, so `peek` sees them without an executor
        let _ = future.clone().now_or_never();
        Self(Rc::new(PromiseNode {
            id: next_id(),
            future,
        }))
    }
    pub fn resolved(value: Value) -> Self {
        Self::new(future::ready(value))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Returns the settled value, polling the underlying future once if it has not completed yet.
    pub fn peek(&self) -> Option<Value> {
        if let Some(value) = self.0.future.peek() {
            return Some(value.clone());
        }
        self.0.future.clone().now_or_never()
    }
    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }

    /// Future that completes with the settled value.
    pub fn ready(&self) -> impl Future<Output = Value> + 'static {
        self.0.future.clone()
    }

    pub fn to_value(&self) -> Value {
        Value::opaque(self.clone())
    }
    pub fn from_value(value: &Value) -> Option<Promise> {
        value.downcast::<Promise>().map(|p| (*p).clone())
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.0.id)
            .field("settled", &self.0.future.peek().is_some())
            .finish()
    }
}
